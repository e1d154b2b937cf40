//! # softbody2d
//!
//! A real-time, GPU-accelerated 2D softbody physics sandbox.
//!
//! The simulated world is a square bounded region of **particles**
//! (rigid circles of uniform radius and unit mass) joined by **beams**
//! (spring-damper links with plastic yield and fracture). Every frame
//! the engine runs a fixed even number of integration sub-steps on the
//! GPU, compacts deleted entities, and renders particles and
//! stress-colored beams through indirect draws whose counts live on the
//! device; the host never reads them back on the hot path.
//!
//! ## Quick start
//!
//! ```ignore
//! use softbody2d::prelude::*;
//!
//! let mut engine = pollster::block_on(Engine::with_window(window, EngineOptions::default()))?;
//!
//! let mut scene = SceneStore::new(2048, 1024);
//! scene.add_particle(0, Particle::at(Vec2::new(400.0, 500.0)))?;
//! scene.add_particle(1, Particle::at(Vec2::new(500.0, 500.0)))?;
//! scene.add_beam(0, BeamDesc::new(0, 1, 100.0, 10.0, 1.0, 0.1, 0.5))?;
//! engine.load_scene(&scene);
//!
//! loop {
//!     engine.set_input(input_frame);
//!     let fps = engine.frame()?;
//! }
//! ```
//!
//! ## Core concepts
//!
//! ### Slots and logical ids
//!
//! Particles and beams occupy fixed physical slots in flat device
//! buffers; beams store endpoints as slot indices. Identity lives only
//! in the [`layout::MappingTable`]: deleting an entity rewrites the
//! mapping and never moves a record, so beam endpoints stay valid even
//! across deletes in the same frame.
//!
//! ### Double-buffered integration
//!
//! Each sub-tick reads one particle buffer and writes the other,
//! alternating every step. A colliding pair therefore always sees the
//! same snapshot of the world regardless of dispatch order, and because
//! the sub-tick count is forced even, the primary buffer is
//! authoritative when the render pass reads it.
//!
//! ### Snapshots
//!
//! [`Engine::save_snapshot`] serializes the live state (constants slab,
//! mappings, particle and beam records) into a self-describing framed
//! blob; [`Engine::load_snapshot`] restores one, rejecting blobs that
//! exceed the device's capacity without touching the running state.

pub mod engine;
pub mod error;
pub mod gpu;
pub mod input;
pub mod layout;
pub mod messages;
pub mod params;
pub mod scene;
pub mod snapshot;
pub mod time;
pub mod window;

pub use bytemuck;
pub use engine::Engine;
pub use error::{EngineError, SceneError, SnapshotError};
pub use glam::Vec2;
pub use input::InputFrame;
pub use layout::{Beam, BeamDesc, MappingTable, Metadata, Particle};
pub use messages::{EngineRequest, EngineResponse};
pub use params::{EngineOptions, PhysicsConstants};
pub use scene::SceneStore;
pub use snapshot::Snapshot;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::engine::Engine;
    pub use crate::error::{EngineError, SceneError, SnapshotError};
    pub use crate::input::InputFrame;
    pub use crate::layout::{Beam, BeamDesc, Particle};
    pub use crate::messages::{EngineRequest, EngineResponse};
    pub use crate::params::{EngineOptions, PhysicsConstants};
    pub use crate::scene::SceneStore;
    pub use crate::snapshot::Snapshot;
    pub use crate::Vec2;
}
