//! The engine: device ownership, per-frame orchestration, scene upload
//! and readback, snapshot transfer, and the message-channel dispatcher.
//!
//! The host thread is the only mutator of device state, and every
//! mutating operation goes through `&mut self`, so the serialization the
//! simulation depends on is enforced by the borrow checker rather than a
//! runtime lock. GPU submissions are totally ordered; a frame's delete
//! pass runs strictly after its update passes within one submission.

use std::sync::Arc;

use winit::window::Window;

use crate::error::{EngineError, SnapshotError};
use crate::gpu::{
    self, ComputePipelines, DeviceBuffers, RenderPipelines, CLEAR_BLUR,
};
use crate::input::{InputFrame, InputTracker};
use crate::layout::{
    self, Beam, MappingTable, Metadata, Particle, BEAM_STRIDE, META_CONSTANTS_OFFSET,
    META_INPUT_OFFSET, METADATA_SIZE, PARTICLE_STRIDE,
};
use crate::messages::{EngineRequest, EngineResponse};
use crate::params::{EngineOptions, PhysicsConstants};
use crate::scene::{PackedScene, SceneStore};
use crate::snapshot::Snapshot;
use crate::time::FrameClock;

/// Number of random writes one corrupt-buffers request performs.
const CORRUPT_WRITES: usize = 8;

struct SurfaceState {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
}

/// A live simulation bound to one GPU device.
pub struct Engine {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: Option<SurfaceState>,
    compute: ComputePipelines,
    render: Option<RenderPipelines>,
    buffers: DeviceBuffers,
    options: EngineOptions,
    constants: PhysicsConstants,
    input: InputTracker,
    clock: FrameClock,
    workgroups: u32,
    hidden: bool,
    destroyed: bool,
}

impl Engine {
    /// Create an engine rendering to `window`.
    pub async fn with_window(window: Arc<Window>, options: EngineOptions) -> Result<Self, EngineError> {
        options.validate()?;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let size = window.inner_size();
        let surface = instance.create_surface(window)?;
        let (adapter, device, queue) = gpu::request_device(&instance, Some(&surface)).await?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(caps.formats[0]);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let surface = Some(SurfaceState { surface, config });
        Self::finish(device, queue, surface, options, Some(format))
    }

    /// Create an engine with no render target. The compute and snapshot
    /// paths are fully functional; frames simply skip the render pass.
    pub async fn headless(options: EngineOptions) -> Result<Self, EngineError> {
        options.validate()?;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let (_, device, queue) = gpu::request_device(&instance, None).await?;
        Self::finish(device, queue, None, options, None)
    }

    fn finish(
        device: wgpu::Device,
        queue: wgpu::Queue,
        surface: Option<SurfaceState>,
        options: EngineOptions,
        surface_format: Option<wgpu::TextureFormat>,
    ) -> Result<Self, EngineError> {
        let compute = ComputePipelines::new(&device, &options);
        let render = surface_format.map(|format| RenderPipelines::new(&device, &options, format));
        let buffers = DeviceBuffers::new(
            &device,
            &options,
            &compute.bind_group_layout,
            render.as_ref().map(|r| &r.bind_group_layout),
        );

        let constants = PhysicsConstants::default();
        let mut metadata = Metadata::new(options.max_particles, options.max_beams);
        metadata.set_constants_slab(constants.to_slab());
        metadata.user_force = options.user_force;
        buffers.write_metadata(&queue, &metadata);

        let workgroups = gpu::workgroup_count(&options);
        log::info!(
            "Engine ready: {} particle slots, {} beam slots, {} subticks, {} workgroups",
            options.max_particles,
            options.max_beams,
            options.effective_subticks(),
            workgroups
        );

        Ok(Self {
            device,
            queue,
            surface,
            compute,
            render,
            buffers,
            options,
            constants,
            input: InputTracker::new(),
            clock: FrameClock::new(),
            workgroups,
            hidden: false,
            destroyed: false,
        })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Framerate over the trailing second.
    pub fn fps(&self) -> f32 {
        self.clock.fps()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// The hosting surface was hidden or revealed. While hidden the shell
    /// is expected to drive frames from a coarse timer instead of the
    /// display callback.
    pub fn set_visibility(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    /// Replace the physics constants. Pure queue-write: applying the same
    /// constants twice is equivalent to applying them once.
    pub fn set_constants(&mut self, constants: PhysicsConstants) {
        self.constants = constants;
        let slab = constants.to_slab();
        self.queue.write_buffer(
            &self.buffers.metadata,
            META_CONSTANTS_OFFSET,
            bytemuck::cast_slice(&slab),
        );
    }

    pub fn constants(&self) -> PhysicsConstants {
        self.constants
    }

    /// Store the latest input sample; folded into metadata on the next
    /// frame.
    pub fn set_input(&mut self, frame: InputFrame) {
        self.input.ingest(frame);
    }

    /// Upload a scene, replacing the live state entirely.
    pub fn load_scene(&mut self, scene: &SceneStore) {
        let packed = scene.write_state();
        self.upload_packed(&packed);
    }

    fn upload_packed(&mut self, packed: &PackedScene) {
        self.queue
            .write_buffer(&self.buffers.particles_a, 0, &packed.particle_bytes);
        self.queue.write_buffer(&self.buffers.beams, 0, &packed.beam_bytes);
        self.queue.write_buffer(
            &self.buffers.mapping,
            0,
            bytemuck::cast_slice(&packed.mapping.to_device_words()),
        );
        self.buffers.reset_scratch(&self.queue);

        let mut metadata = Metadata::new(self.options.max_particles, self.options.max_beams);
        metadata.set_particle_count(packed.particle_count);
        metadata.set_beam_count(packed.beam_count);
        metadata.set_constants_slab(self.constants.to_slab());
        metadata.user_force = self.options.user_force;
        self.buffers.write_metadata(&self.queue, &metadata);
    }

    /// Advance the simulation by one frame: fold the latest input into
    /// metadata, run `subticks` update dispatches with alternating bind
    /// groups, one delete dispatch, then (with a surface) the render
    /// pass. Returns the framerate over the trailing second.
    pub fn frame(&mut self) -> Result<f32, EngineError> {
        if self.destroyed {
            return Err(EngineError::DeviceLost);
        }

        let record = self
            .input
            .compose(self.clock.fps(), self.clock.delta(), self.options.bounds);
        self.queue.write_buffer(
            &self.buffers.metadata,
            META_INPUT_OFFSET,
            bytemuck::bytes_of(&record),
        );

        // Acquire the target before encoding so a transient surface
        // failure drops the whole frame.
        let frame = match self.acquire_frame() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::OutOfMemory) => {
                self.destroy();
                return Err(EngineError::DeviceLost);
            }
            Err(e) => return Err(EngineError::Transient(e.to_string())),
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Simulation Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.compute.update);
            for tick in 0..self.options.effective_subticks() {
                let bind_group = if tick % 2 == 0 {
                    &self.buffers.compute_a
                } else {
                    &self.buffers.compute_b
                };
                pass.set_bind_group(0, bind_group, &[]);
                pass.dispatch_workgroups(self.workgroups, 1, 1);
            }
            pass.set_pipeline(&self.compute.delete);
            pass.set_bind_group(0, &self.buffers.compute_a, &[]);
            pass.dispatch_workgroups(1, 1, 1);
        }

        if let (Some(frame), Some(render)) = (&frame, &self.render) {
            let view = frame
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default());
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        // Translucent clear leaves a motion trail.
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.0,
                            g: 0.0,
                            b: 0.0,
                            a: CLEAR_BLUR,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let bind_group = self.buffers.render.as_ref().expect("render bind group");
            pass.set_bind_group(0, bind_group, &[]);
            pass.set_pipeline(&render.particles);
            pass.draw_indirect(&self.buffers.metadata, layout::META_PARTICLE_DRAW_OFFSET);
            pass.set_pipeline(&render.beams);
            pass.draw_indirect(&self.buffers.metadata, layout::META_BEAM_DRAW_OFFSET);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(frame) = frame {
            frame.present();
        }
        self.device.poll(wgpu::Maintain::Wait);

        Ok(self.clock.tick())
    }

    /// The surface was resized by the host.
    pub fn resize(&mut self, width: u32, height: u32) {
        if let Some(state) = &mut self.surface {
            if width > 0 && height > 0 {
                state.config.width = width;
                state.config.height = height;
                state.surface.configure(&self.device, &state.config);
            }
        }
    }

    /// Current live counts, read back from the device.
    pub fn read_counts(&self) -> Result<(u32, u32), EngineError> {
        let metadata = self.read_metadata()?;
        Ok((metadata.particle_count(), metadata.beam_count()))
    }

    /// Live particles in logical order, read back from the device.
    pub fn read_particles(&self) -> Result<Vec<Particle>, EngineError> {
        let metadata = self.read_metadata()?;
        let mapping = self.read_mapping()?;
        let bytes = self.read_buffer(&self.buffers.particles_a, self.buffers.particles_a.size())?;
        Ok(mapping
            .particle_section(metadata.particle_count() as usize)
            .iter()
            .map(|&slot| layout::read_particle(&bytes, slot as usize))
            .collect())
    }

    /// Live beam records in logical order, read back from the device.
    pub fn read_beams(&self) -> Result<Vec<Beam>, EngineError> {
        let metadata = self.read_metadata()?;
        let mapping = self.read_mapping()?;
        let bytes = self.read_buffer(&self.buffers.beams, self.buffers.beams.size())?;
        Ok(mapping
            .beam_section(metadata.beam_count() as usize)
            .iter()
            .map(|&slot| {
                bytemuck::pod_read_unaligned(
                    &bytes[slot as usize * BEAM_STRIDE..(slot as usize + 1) * BEAM_STRIDE],
                )
            })
            .collect())
    }

    /// Read the live state back into an editable scene store.
    pub fn read_scene(&self) -> Result<SceneStore, EngineError> {
        let metadata = self.read_metadata()?;
        let packed = PackedScene {
            particle_bytes: self.read_buffer(&self.buffers.particles_a, self.buffers.particles_a.size())?,
            beam_bytes: self.read_buffer(&self.buffers.beams, self.buffers.beams.size())?,
            mapping: self.read_mapping()?,
            particle_count: metadata.particle_count(),
            beam_count: metadata.beam_count(),
        };
        Ok(SceneStore::load_state(&packed))
    }

    /// Serialize the live state into a framed snapshot.
    ///
    /// The save compacts: particle data is emitted in logical order with
    /// an identity mapping, and beam endpoints are re-expressed against
    /// the compacted slots, so a snapshot is loadable regardless of how
    /// fragmented the slot population had become.
    pub fn save_snapshot(&self) -> Result<Vec<u8>, EngineError> {
        let metadata = self.read_metadata()?;
        let mapping = self.read_mapping()?;
        let particle_bytes = self.read_buffer(&self.buffers.particles_a, self.buffers.particles_a.size())?;
        let beam_bytes = self.read_buffer(&self.buffers.beams, self.buffers.beams.size())?;

        let particle_count = metadata.particle_count() as usize;
        let particles: Vec<Particle> = mapping
            .particle_section(particle_count)
            .iter()
            .map(|&slot| layout::read_particle(&particle_bytes, slot as usize))
            .collect();

        let mut beams = Vec::with_capacity(metadata.beam_count() as usize);
        for &slot in mapping.beam_section(metadata.beam_count() as usize) {
            let record: Beam = bytemuck::pod_read_unaligned(
                &beam_bytes[slot as usize * BEAM_STRIDE..(slot as usize + 1) * BEAM_STRIDE],
            );
            let (slot_a, slot_b) = record.endpoint_slots();
            let (Some(a), Some(b)) = (
                mapping.particle_of_slot(slot_a, particle_count),
                mapping.particle_of_slot(slot_b, particle_count),
            ) else {
                log::warn!("Dropping beam with dead endpoint from snapshot");
                continue;
            };
            beams.push(Beam {
                endpoints: Beam::pack_endpoints(a, b),
                ..record
            });
        }

        let snapshot = Snapshot {
            constants: metadata.constants_slab(),
            particle_mapping: (0..particles.len() as u16).collect(),
            particles,
            beam_mapping: (0..beams.len() as u16).collect(),
            beams,
        };
        Ok(snapshot.encode())
    }

    /// Restore a snapshot, replacing the live state.
    ///
    /// Fails with [`SnapshotError::CapacityExceeded`] (leaving the state
    /// unchanged) when the snapshot's live counts exceed this device's
    /// capacity. Payload contents beyond the framing are not validated.
    pub fn load_snapshot(&mut self, bytes: &[u8]) -> Result<(), SnapshotError> {
        let snapshot = Snapshot::decode(bytes)?;
        snapshot.check_capacity(
            self.options.max_particles as usize,
            self.options.max_beams as usize,
        )?;

        let max_particles = self.options.max_particles as usize;
        let max_beams = self.options.max_beams as usize;

        let mut particle_bytes = vec![0u8; max_particles * PARTICLE_STRIDE];
        let mut mapping = MappingTable::new(max_particles, max_beams);
        for (id, (&slot, particle)) in snapshot
            .particle_mapping
            .iter()
            .zip(&snapshot.particles)
            .enumerate()
        {
            if (slot as usize) < max_particles {
                layout::write_particle(&mut particle_bytes, slot as usize, particle);
                mapping.set_particle_slot(id as u16, slot);
            }
        }

        let mut beam_bytes = vec![0u8; max_beams * BEAM_STRIDE];
        for (id, (&slot, beam)) in snapshot.beam_mapping.iter().zip(&snapshot.beams).enumerate() {
            if (slot as usize) < max_beams {
                beam_bytes[slot as usize * BEAM_STRIDE..(slot as usize + 1) * BEAM_STRIDE]
                    .copy_from_slice(bytemuck::bytes_of(beam));
                mapping.set_beam_slot(id as u16, slot);
            }
        }

        self.constants = PhysicsConstants::from_slab(snapshot.constants);
        let packed = PackedScene {
            particle_bytes,
            beam_bytes,
            mapping,
            particle_count: snapshot.particle_count() as u32,
            beam_count: snapshot.beam_count() as u32,
        };
        self.upload_packed(&packed);
        Ok(())
    }

    /// Scribble random values over random offsets of the particle and
    /// beam buffers. Debug aid for exercising robustness of the kernels
    /// against garbage state.
    pub fn corrupt_buffers(&mut self) {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        log::warn!("Corrupting device buffers on request");
        for _ in 0..CORRUPT_WRITES {
            let value = rng.gen_range(-1000.0f32..1000.0);
            let buffer = if rng.gen_bool(0.5) {
                &self.buffers.particles_a
            } else {
                &self.buffers.beams
            };
            let offset = rng.gen_range(0..buffer.size() / 4) * 4;
            self.queue.write_buffer(buffer, offset, &value.to_le_bytes());
        }
    }

    /// Stop the engine. The render surface is released immediately; the
    /// device itself is dropped with the engine. Idempotent; equivalent
    /// to device loss.
    pub fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.surface = None;
            log::info!("Engine destroyed");
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Dispatch one message-channel request.
    pub fn handle(&mut self, request: EngineRequest) -> Option<EngineResponse> {
        match request {
            EngineRequest::SetPhysicsConstants(constants) => {
                self.set_constants(constants);
                Some(EngineResponse::PhysicsConstants(self.constants))
            }
            EngineRequest::GetPhysicsConstants => {
                Some(EngineResponse::PhysicsConstants(self.constants))
            }
            EngineRequest::Input(frame) => {
                self.set_input(frame);
                Some(EngineResponse::InputAck)
            }
            EngineRequest::VisibilityChange { hidden } => {
                self.set_visibility(hidden);
                None
            }
            EngineRequest::SnapshotSave => match self.save_snapshot() {
                Ok(bytes) => Some(EngineResponse::Snapshot(bytes)),
                Err(e) => {
                    log::error!("Snapshot save failed: {}", e);
                    None
                }
            },
            EngineRequest::SnapshotLoad(bytes) => {
                let result = self.load_snapshot(&bytes);
                if let Err(e) = &result {
                    log::warn!("Snapshot load rejected: {}", e);
                }
                Some(EngineResponse::SnapshotLoaded(result.is_ok()))
            }
            EngineRequest::CorruptBuffers => {
                self.corrupt_buffers();
                None
            }
            EngineRequest::Destroy => {
                self.destroy();
                Some(EngineResponse::Destroyed)
            }
        }
    }

    /// Fetch the next surface texture, reconfiguring on lost/outdated
    /// surfaces so the following frame can proceed. `Ok(None)` when the
    /// engine is headless.
    fn acquire_frame(&self) -> Result<Option<wgpu::SurfaceTexture>, wgpu::SurfaceError> {
        let Some(state) = &self.surface else {
            return Ok(None);
        };
        match state.surface.get_current_texture() {
            Ok(frame) => Ok(Some(frame)),
            Err(e @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                state.surface.configure(&self.device, &state.config);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn read_metadata(&self) -> Result<Metadata, EngineError> {
        let bytes = self.read_buffer(&self.buffers.metadata, METADATA_SIZE as u64)?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    fn read_mapping(&self) -> Result<MappingTable, EngineError> {
        let bytes = self.read_buffer(&self.buffers.mapping, self.buffers.mapping.size())?;
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
            .collect();
        Ok(MappingTable::from_device_words(
            self.options.max_particles as usize,
            self.options.max_beams as usize,
            &words,
        ))
    }

    /// Stage-copy a device buffer into a mappable buffer and read it
    /// back. Stalls the queue; used only for snapshots and edit loads.
    fn read_buffer(&self, buffer: &wgpu::Buffer, size: u64) -> Result<Vec<u8>, EngineError> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| EngineError::BufferMapping("map callback dropped".into()))?
            .map_err(|e| EngineError::BufferMapping(e.to_string()))?;

        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }
}
