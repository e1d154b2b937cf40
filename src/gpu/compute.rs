//! The simulation kernels: per-sub-tick `update` and the end-of-frame
//! `compact` (delete) pass.
//!
//! Both kernels share one bind group layout over the same seven buffers.
//! `update` binds come in two variants that swap the particle read/write
//! buffers; the orchestrator alternates them every sub-tick so that a
//! particle pass only ever reads the snapshot its whole dispatch reads
//! (the collision-symmetry fix), and the even sub-tick count keeps the
//! primary buffer authoritative at frame end.
//!
//! Beam forces flow to particles through a fixed-point `i32` atomic
//! scratch: beams `atomicAdd` scaled contributions, particles
//! `atomicExchange` the accumulator back to zero when integrating. No
//! barrier separates beam work from particle work inside a dispatch; a
//! contribution committed after its target particle drained simply lands
//! on the next sub-tick.

use crate::params::EngineOptions;

/// Invocations per workgroup, shared by both kernels.
pub const WORKGROUP_SIZE: u32 = 64;

/// Fixed-point scale for beam-force accumulation in `i32` atomics.
/// Tuned to source behavior; changing it trades force range for
/// precision.
pub const FORCE_SCALE: f32 = 65536.0;

/// Scale from raw beam force to the stress field read by the renderer.
pub const STRESS_SCALE: f32 = 1.0 / 20.0;

/// Workgroups needed to cover both populations.
pub fn workgroup_count(options: &EngineOptions) -> u32 {
    options.max_particles.max(options.max_beams).div_ceil(WORKGROUP_SIZE)
}

/// WGSL struct declarations mirrored from [`crate::layout`]. Shared with
/// the render shaders.
pub const WGSL_TYPES: &str = r#"
struct ParticleData {
    position: vec2f,
    velocity: vec2f,
    acceleration: vec2f,
}

struct BeamData {
    endpoints: u32,
    original_len: f32,
    target_len: f32,
    last_len: f32,
    spring: f32,
    damp: f32,
    yield_strain: f32,
    break_limit: f32,
    strain: f32,
    stress: f32,
}

struct Metadata {
    particle_draw: array<u32, 5>,
    beam_draw: array<u32, 5>,
    max_particles: u32,
    max_beams: u32,
    gravity: vec2f,
    border_elasticity: f32,
    border_friction: f32,
    pair_elasticity: f32,
    pair_friction: f32,
    drag_coeff: f32,
    drag_exp: f32,
    user_force: f32,
    cursor_active: u32,
    cursor_pos: vec2f,
    cursor_vel: vec2f,
    key_force: vec2f,
}
"#;

/// Generate the compute shader for the given engine options.
///
/// Radius, bounds, capacities, and the sub-tick delta are compile-time
/// constants of the generated module; everything tunable at runtime
/// lives in the metadata buffer.
pub fn shader_source(options: &EngineOptions) -> String {
    let radius = options.particle_radius;
    format!(
        r#"{types}

@group(0) @binding(0) var<storage, read> particles_src: array<ParticleData>;
@group(0) @binding(1) var<storage, read_write> particles_dst: array<ParticleData>;
@group(0) @binding(2) var<storage, read_write> beams: array<BeamData>;
@group(0) @binding(3) var<storage, read_write> mapping: array<u32>;
@group(0) @binding(4) var<storage, read_write> forces: array<atomic<i32>>;
@group(0) @binding(5) var<storage, read_write> delete_bits: array<atomic<u32>>;
@group(0) @binding(6) var<storage, read_write> sim: Metadata;

const RADIUS: f32 = {radius:?};
const BOUNDS: f32 = {bounds:?};
const DT: f32 = {dt:?};
const SLOT_CAP: u32 = {max_particles}u;
const CURSOR_RANGE: f32 = {cursor_range:?};
const FORCE_SCALE: f32 = {force_scale:?};
const STRESS_SCALE: f32 = {stress_scale:?};

fn mark_deleted(index: u32) {{
    atomicOr(&delete_bits[index >> 5u], 1u << (index & 31u));
}}

fn bit_is_set(index: u32) -> bool {{
    return (atomicLoad(&delete_bits[index >> 5u]) & (1u << (index & 31u))) != 0u;
}}

fn beam_tick(lane: u32) {{
    let slot = mapping[SLOT_CAP + lane];
    var beam = beams[slot];
    let slot_a = beam.endpoints & 0xffffu;
    let slot_b = beam.endpoints >> 16u;

    var diff = particles_src[slot_b].position - particles_src[slot_a].position;
    if (diff.x == 0.0 && diff.y == 0.0) {{
        diff = vec2f(0.0, -1e-10);
    }}
    let len = length(diff);
    let dir = diff / len;

    let force = (beam.target_len - len) * beam.spring + (beam.last_len - len) * beam.damp;

    // Plastic yield: drag the target length toward the current length by
    // one yield increment, clamping future elastic response.
    let strain = (len - beam.target_len) / beam.original_len;
    if (abs(strain) > beam.yield_strain) {{
        beam.target_len += sign(strain) * beam.yield_strain * beam.original_len;
    }}

    // Fracture is scheduled, not applied: particles in this dispatch
    // still observe the force.
    if (abs(len - beam.original_len) > beam.original_len * beam.break_limit) {{
        mark_deleted(SLOT_CAP + lane);
    }}

    beam.stress = force * STRESS_SCALE;
    beam.strain = abs(strain) / beam.yield_strain;
    beam.last_len = len;
    beams[slot] = beam;

    let fv = dir * force * FORCE_SCALE;
    atomicAdd(&forces[slot_a * 2u], i32(-fv.x));
    atomicAdd(&forces[slot_a * 2u + 1u], i32(-fv.y));
    atomicAdd(&forces[slot_b * 2u], i32(fv.x));
    atomicAdd(&forces[slot_b * 2u + 1u], i32(fv.y));
}}

fn particle_tick(lane: u32) {{
    let slot = mapping[lane];
    var p = particles_src[slot];

    // Pairwise collision against the dispatch-wide snapshot, self only.
    let count = sim.particle_draw[1];
    for (var i = 0u; i < count; i++) {{
        if (i == lane) {{
            continue;
        }}
        let other = particles_src[mapping[i]];
        let rel = other.position - p.position;
        let dist = length(rel);
        if (dist == 0.0) {{
            p.position.y += sign(f32(lane) - f32(i));
        }} else if (dist < 2.0 * RADIUS) {{
            let n = rel / dist;
            let t = vec2f(-n.y, n.x);
            let v = p.velocity - other.velocity;
            let jn = (sim.pair_elasticity + 1.0) * 0.5 * dot(v, n);
            let mu = jn * sim.pair_friction;
            let jt = min(max(dot(v, t), -mu), mu);
            p.velocity -= jn * n + jt * t;
            p.position -= n * (2.0 * RADIUS - dist) * 0.5;
        }}
    }}

    p.acceleration += sim.gravity;

    // Drag is deliberately anisotropic: per component, not along the
    // velocity direction.
    if (length(p.velocity) > 0.0) {{
        p.acceleration -=
            sim.drag_coeff * pow(abs(p.velocity), vec2f(sim.drag_exp)) * sign(p.velocity);
    }}

    p.acceleration += sim.key_force * sim.user_force;
    if (sim.cursor_active != 0u && distance(p.position, sim.cursor_pos) < CURSOR_RANGE) {{
        // Drag the particle toward the cursor's velocity, cancelling
        // gravity so it sticks.
        p.acceleration += (sim.cursor_vel - p.velocity) * sim.user_force - sim.gravity;
    }}

    // Drain the beam-force accumulator and reset it in one operation.
    let fx = atomicExchange(&forces[slot * 2u], 0);
    let fy = atomicExchange(&forces[slot * 2u + 1u], 0);
    p.acceleration += vec2f(f32(fx), f32(fy)) / FORCE_SCALE;

    // Semi-implicit Euler.
    p.velocity += p.acceleration * DT;
    p.position += p.velocity * DT;
    p.acceleration = vec2f(0.0, 0.0);

    // Border contact. The friction impulse opposes the orthogonal
    // velocity and lands on the orthogonal acceleration (carried into
    // the next sub-tick), clamped to at most the acceleration that
    // cancels that velocity in one step: it can slow sliding, never
    // reverse it.
    let lo = RADIUS;
    let hi = BOUNDS - RADIUS;
    if (p.position.x < lo || p.position.x > hi) {{
        p.position.x = clamp(p.position.x, lo, hi);
        p.velocity.x = -p.velocity.x * sim.border_elasticity;
        let grip = sim.border_friction * abs(p.velocity.x);
        p.acceleration.y -= sign(p.velocity.y) * min(abs(p.velocity.y) / DT, grip);
    }}
    if (p.position.y < lo || p.position.y > hi) {{
        p.position.y = clamp(p.position.y, lo, hi);
        p.velocity.y = -p.velocity.y * sim.border_elasticity;
        let grip = sim.border_friction * abs(p.velocity.y);
        p.acceleration.x -= sign(p.velocity.x) * min(abs(p.velocity.x) / DT, grip);
    }}

    particles_dst[slot] = p;
}}

@compute @workgroup_size({workgroup_size})
fn update(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {{
    // Beam lanes count down from the top so the two workloads spread
    // across different invocations when one population is smaller.
    let beam_lane = groups.x * {workgroup_size}u - gid.x - 1u;
    if (beam_lane < sim.beam_draw[1]) {{
        beam_tick(beam_lane);
    }}
    if (gid.x < sim.particle_draw[1]) {{
        particle_tick(gid.x);
    }}
}}

var<workgroup> particle_cursor: atomic<i32>;
var<workgroup> beam_cursor: atomic<i32>;

@compute @workgroup_size({workgroup_size})
fn compact(@builtin(local_invocation_id) lid: vec3<u32>) {{
    let particle_count = sim.particle_draw[1];
    let beam_count = sim.beam_draw[1];
    if (lid.x == 0u) {{
        atomicStore(&particle_cursor, i32(particle_count) - 1);
        atomicStore(&beam_cursor, i32(beam_count) - 1);
    }}
    workgroupBarrier();

    // Compact-by-overwrite: each marked logical id claims the current
    // last live id and inherits its physical slot. The record itself
    // never moves, so beam endpoint slots stay valid.
    for (var id = lid.x; id < particle_count; id += {workgroup_size}u) {{
        if (bit_is_set(id)) {{
            let replacement = atomicSub(&particle_cursor, 1);
            if (replacement >= 0) {{
                mapping[id] = mapping[u32(replacement)];
            }}
        }}
    }}
    for (var id = lid.x; id < beam_count; id += {workgroup_size}u) {{
        if (bit_is_set(SLOT_CAP + id)) {{
            let replacement = atomicSub(&beam_cursor, 1);
            if (replacement >= 0) {{
                mapping[SLOT_CAP + id] = mapping[SLOT_CAP + u32(replacement)];
            }}
        }}
    }}

    workgroupBarrier();
    storageBarrier();

    if (lid.x == 0u) {{
        sim.particle_draw[1] = u32(max(atomicLoad(&particle_cursor) + 1, 0));
        sim.beam_draw[1] = u32(max(atomicLoad(&beam_cursor) + 1, 0));
        let words = arrayLength(&delete_bits);
        for (var w = 0u; w < words; w++) {{
            atomicStore(&delete_bits[w], 0u);
        }}
    }}
}}
"#,
        types = WGSL_TYPES,
        radius = radius,
        bounds = options.bounds,
        dt = options.delta_time(),
        max_particles = options.max_particles,
        cursor_range = radius * 10.0,
        force_scale = FORCE_SCALE,
        stress_scale = STRESS_SCALE,
        workgroup_size = WORKGROUP_SIZE,
    )
}

/// The two compute pipelines and their shared bind group layout.
pub struct ComputePipelines {
    pub update: wgpu::ComputePipeline,
    pub delete: wgpu::ComputePipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

impl ComputePipelines {
    pub fn new(device: &wgpu::Device, options: &EngineOptions) -> Self {
        let source = shader_source(options);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Simulation Shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let storage_entry = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Simulation Bind Group Layout"),
            entries: &[
                storage_entry(0, true),  // particle read buffer
                storage_entry(1, false), // particle write buffer
                storage_entry(2, false), // beams
                storage_entry(3, false), // mapping
                storage_entry(4, false), // force scratch
                storage_entry(5, false), // delete bitmap
                storage_entry(6, false), // metadata
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Simulation Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let update = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Update Pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("update"),
            compilation_options: Default::default(),
            cache: None,
        });

        let delete = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Delete Pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("compact"),
            compilation_options: Default::default(),
            cache: None,
        });

        Self {
            update,
            delete,
            bind_group_layout,
        }
    }
}
