//! Indirect-draw rendering of particles and beams.
//!
//! Both pipelines pull their data from the simulation's storage buffers
//! in the vertex stage and take instance counts from the metadata buffer
//! via `draw_indirect`, so the host never knows (or needs to know) how
//! many entities survived the frame's delete pass. The mapping table
//! provides the logical-to-physical indirection; it is bound as read-only
//! storage because instance-step vertex attributes cannot be redirected
//! through an index buffer.

use crate::params::EngineOptions;

use super::compute::WGSL_TYPES;

/// Alpha of the per-frame clear color. Clearing to a translucent black
/// over a premultiplied surface leaves a motion trail.
pub const CLEAR_BLUR: f64 = 0.4;

/// Generate the render shader for the given engine options.
pub fn shader_source(options: &EngineOptions) -> String {
    format!(
        r#"{types}

@group(0) @binding(0) var<storage, read> particles: array<ParticleData>;
@group(0) @binding(1) var<storage, read> beams: array<BeamData>;
@group(0) @binding(2) var<storage, read> mapping: array<u32>;

const RADIUS: f32 = {radius:?};
const BOUNDS: f32 = {bounds:?};
const SLOT_CAP: u32 = {max_particles}u;

fn to_clip(position: vec2f) -> vec4f {{
    return vec4f(position * (2.0 / BOUNDS) - vec2f(1.0, 1.0), 0.0, 1.0);
}}

struct ParticleVsOut {{
    @builtin(position) clip: vec4f,
    // Offset from the particle center, in simulation units.
    @location(0) local: vec2f,
}}

@vertex
fn vs_particle(
    @builtin(vertex_index) vertex: u32,
    @builtin(instance_index) instance: u32,
) -> ParticleVsOut {{
    // Bounding triangle of the unit circle, scaled by the radius.
    var corners = array<vec2f, 3>(
        vec2f(0.0, 2.0),
        vec2f(-1.7320508, -1.0),
        vec2f(1.7320508, -1.0),
    );
    let center = particles[mapping[instance]].position;
    let local = corners[vertex] * RADIUS;

    var out: ParticleVsOut;
    out.clip = to_clip(center + local);
    out.local = local;
    return out;
}}

@fragment
fn fs_particle(in: ParticleVsOut) -> @location(0) vec4f {{
    let dist = length(in.local);
    if (dist > RADIUS) {{
        discard;
    }}
    if (dist > RADIUS * 0.8) {{
        return vec4f(0.85, 0.92, 1.0, 1.0);
    }}
    // Premultiplied translucent fill.
    return vec4f(0.10, 0.35, 0.55, 1.0) * 0.6;
}}

struct BeamVsOut {{
    @builtin(position) clip: vec4f,
    @location(0) color: vec4f,
}}

@vertex
fn vs_beam(
    @builtin(vertex_index) vertex: u32,
    @builtin(instance_index) instance: u32,
) -> BeamVsOut {{
    let beam = beams[mapping[SLOT_CAP + instance]];
    var endpoint = beam.endpoints & 0xffffu;
    if (vertex == 1u) {{
        endpoint = beam.endpoints >> 16u;
    }}

    // Red falls with tension, green with compression, blue as the
    // strain approaches yield.
    let tension = max(-beam.stress, 0.0);
    let compression = max(beam.stress, 0.0);

    var out: BeamVsOut;
    out.clip = to_clip(particles[endpoint].position);
    out.color = vec4f(
        1.0 - min(tension, 1.0),
        1.0 - min(compression, 1.0),
        1.0 - min(abs(beam.strain), 1.0),
        1.0,
    );
    return out;
}}

@fragment
fn fs_beam(in: BeamVsOut) -> @location(0) vec4f {{
    return in.color;
}}
"#,
        types = WGSL_TYPES,
        radius = options.particle_radius,
        bounds = options.bounds,
        max_particles = options.max_particles,
    )
}

/// The particle and beam render pipelines with their shared bind group
/// layout.
pub struct RenderPipelines {
    pub particles: wgpu::RenderPipeline,
    pub beams: wgpu::RenderPipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

impl RenderPipelines {
    pub fn new(
        device: &wgpu::Device,
        options: &EngineOptions,
        surface_format: wgpu::TextureFormat,
    ) -> Self {
        let source = shader_source(options);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Render Shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let storage_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Render Bind Group Layout"),
            entries: &[storage_entry(0), storage_entry(1), storage_entry(2)],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Render Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let target = [Some(wgpu::ColorTargetState {
            format: surface_format,
            blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
            write_mask: wgpu::ColorWrites::ALL,
        })];

        let pipeline = |label: &str, vs: &str, fs: &str, topology: wgpu::PrimitiveTopology| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some(vs),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some(fs),
                    targets: &target,
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        let particles = pipeline(
            "Particle Render Pipeline",
            "vs_particle",
            "fs_particle",
            wgpu::PrimitiveTopology::TriangleStrip,
        );
        let beams = pipeline(
            "Beam Render Pipeline",
            "vs_beam",
            "fs_beam",
            wgpu::PrimitiveTopology::LineStrip,
        );

        Self {
            particles,
            beams,
            bind_group_layout,
        }
    }
}
