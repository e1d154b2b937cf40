//! Device resources: adapter/device acquisition and the typed buffer set
//! every pipeline binds.
//!
//! The simulation owns seven buffers: double-buffered particles, beams,
//! the mapping table, metadata, the fixed-point force scratch, and the
//! delete bitmap. Bind groups come in two compute variants (A reads the
//! primary particle buffer and writes the secondary; B swaps them) plus
//! one render bind group fixed on the primary buffer, which the even
//! sub-tick count keeps authoritative at frame end.

mod compute;
mod render;

pub use compute::{workgroup_count, ComputePipelines, FORCE_SCALE, STRESS_SCALE, WORKGROUP_SIZE};
pub use render::{RenderPipelines, CLEAR_BLUR};

use crate::error::EngineError;
use crate::layout::{Metadata, BEAM_STRIDE, METADATA_SIZE, PARTICLE_STRIDE};
use crate::params::EngineOptions;

pub use compute::shader_source as compute_shader_source;
pub use render::shader_source as render_shader_source;

/// Acquire an adapter and device, preferring a high-performance adapter
/// compatible with `surface` when one is given.
pub async fn request_device(
    instance: &wgpu::Instance,
    surface: Option<&wgpu::Surface<'static>>,
) -> Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue), EngineError> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface,
            force_fallback_adapter: false,
        })
        .await
        .ok_or(EngineError::UnsupportedDevice)?;

    log::info!("Using adapter: {:?}", adapter.get_info().name);

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Softbody Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        )
        .await?;

    Ok((adapter, device, queue))
}

/// The simulation's device-resident buffers and bind groups.
///
/// Some buffers are never read directly from here; they must stay alive
/// because the bind groups hold references to them.
pub struct DeviceBuffers {
    /// Primary particle buffer; authoritative at frame end and read by
    /// the render pass.
    pub particles_a: wgpu::Buffer,
    /// Secondary particle buffer for the read/write alternation.
    pub particles_b: wgpu::Buffer,
    pub beams: wgpu::Buffer,
    /// Mapping table, one `u32` word per entry on the device.
    pub mapping: wgpu::Buffer,
    /// Metadata record; also the indirect-draw argument source.
    pub metadata: wgpu::Buffer,
    /// Fixed-point `i32` force accumulators, two per particle slot.
    pub forces: wgpu::Buffer,
    /// Delete bitmap words.
    pub delete_bits: wgpu::Buffer,
    /// Compute bind group for even sub-ticks (read A, write B).
    pub compute_a: wgpu::BindGroup,
    /// Compute bind group for odd sub-ticks (read B, write A).
    pub compute_b: wgpu::BindGroup,
    pub render: Option<wgpu::BindGroup>,
}

impl DeviceBuffers {
    pub fn new(
        device: &wgpu::Device,
        options: &EngineOptions,
        compute_layout: &wgpu::BindGroupLayout,
        render_layout: Option<&wgpu::BindGroupLayout>,
    ) -> Self {
        let max_particles = options.max_particles as u64;
        let max_beams = options.max_beams as u64;

        let storage = |label: &str, size: u64, extra: wgpu::BufferUsages| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | extra,
                mapped_at_creation: false,
            })
        };

        let particle_size = max_particles * PARTICLE_STRIDE as u64;
        let particles_a = storage("Particle Buffer A", particle_size, wgpu::BufferUsages::COPY_SRC);
        let particles_b = storage("Particle Buffer B", particle_size, wgpu::BufferUsages::empty());
        let beams = storage(
            "Beam Buffer",
            max_beams * BEAM_STRIDE as u64,
            wgpu::BufferUsages::COPY_SRC,
        );
        let mapping = storage(
            "Mapping Buffer",
            (max_particles + max_beams) * 4,
            wgpu::BufferUsages::COPY_SRC,
        );
        let metadata = storage(
            "Metadata Buffer",
            METADATA_SIZE as u64,
            wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::COPY_SRC,
        );
        let forces = storage("Force Scratch Buffer", max_particles * 2 * 4, wgpu::BufferUsages::empty());
        let bitmap_words = (max_particles + max_beams).div_ceil(32);
        let delete_bits = storage("Delete Bitmap Buffer", bitmap_words * 4, wgpu::BufferUsages::empty());

        let compute_group = |label: &str, read: &wgpu::Buffer, write: &wgpu::Buffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: compute_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: read.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: write.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: beams.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: mapping.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: forces.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: delete_bits.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 6,
                        resource: metadata.as_entire_binding(),
                    },
                ],
            })
        };

        let compute_a = compute_group("Compute Bind Group A", &particles_a, &particles_b);
        let compute_b = compute_group("Compute Bind Group B", &particles_b, &particles_a);

        let render = render_layout.map(|layout| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Render Bind Group"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: particles_a.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: beams.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: mapping.as_entire_binding(),
                    },
                ],
            })
        });

        Self {
            particles_a,
            particles_b,
            beams,
            mapping,
            metadata,
            forces,
            delete_bits,
            compute_a,
            compute_b,
            render,
        }
    }

    /// Zero the per-substep scratch and the secondary particle buffer.
    /// Used on scene upload and snapshot load.
    pub fn reset_scratch(&self, queue: &wgpu::Queue) {
        let zeros = vec![0u8; self.forces.size() as usize];
        queue.write_buffer(&self.forces, 0, &zeros);
        let zeros = vec![0u8; self.delete_bits.size() as usize];
        queue.write_buffer(&self.delete_bits, 0, &zeros);
        let zeros = vec![0u8; self.particles_b.size() as usize];
        queue.write_buffer(&self.particles_b, 0, &zeros);
    }

    /// Queue-write a full metadata record.
    pub fn write_metadata(&self, queue: &wgpu::Queue, metadata: &Metadata) {
        queue.write_buffer(&self.metadata, 0, bytemuck::bytes_of(metadata));
    }
}
