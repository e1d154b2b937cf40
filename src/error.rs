//! Error types for the softbody engine.
//!
//! This module provides error types for GPU initialization, engine
//! configuration, scene editing, and snapshot transfer.

use std::fmt;

/// Errors that can occur while constructing or driving the engine.
#[derive(Debug)]
pub enum EngineError {
    /// No compatible GPU adapter or device available.
    UnsupportedDevice,
    /// Failed to create GPU device on a present adapter.
    DeviceCreation(wgpu::RequestDeviceError),
    /// Failed to create a surface for rendering.
    SurfaceCreation(wgpu::CreateSurfaceError),
    /// An engine option was rejected at construction.
    InvalidConfiguration(String),
    /// A submission failed but the device survived; the frame was dropped.
    Transient(String),
    /// The device was lost. Terminal: the engine must be destroyed.
    DeviceLost,
    /// Failed to map a buffer for reading.
    BufferMapping(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::UnsupportedDevice => write!(
                f,
                "No compatible GPU adapter found. Ensure your system has a GPU with WebGPU/Vulkan/Metal/DX12 support."
            ),
            EngineError::DeviceCreation(e) => write!(f, "Failed to create GPU device: {}", e),
            EngineError::SurfaceCreation(e) => write!(f, "Failed to create GPU surface: {}", e),
            EngineError::InvalidConfiguration(msg) => write!(f, "Invalid engine configuration: {}", msg),
            EngineError::Transient(msg) => write!(f, "Frame dropped: {}", msg),
            EngineError::DeviceLost => write!(f, "GPU device lost"),
            EngineError::BufferMapping(msg) => write!(f, "Failed to map GPU buffer: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::DeviceCreation(e) => Some(e),
            EngineError::SurfaceCreation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<wgpu::RequestDeviceError> for EngineError {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        EngineError::DeviceCreation(e)
    }
}

impl From<wgpu::CreateSurfaceError> for EngineError {
    fn from(e: wgpu::CreateSurfaceError) -> Self {
        EngineError::SurfaceCreation(e)
    }
}

/// Errors that can occur while decoding or loading a snapshot.
#[derive(Debug, PartialEq, Eq)]
pub enum SnapshotError {
    /// The blob is shorter than its header or its header-declared sections.
    Truncated { expected: usize, actual: usize },
    /// A header field is inconsistent with the fixed record strides.
    HeaderMismatch(String),
    /// The snapshot's live counts exceed the device's capacity.
    /// The simulation state is unchanged.
    CapacityExceeded {
        particles: usize,
        beams: usize,
        max_particles: usize,
        max_beams: usize,
    },
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Truncated { expected, actual } => {
                write!(f, "Snapshot truncated: expected {} bytes, got {}", expected, actual)
            }
            SnapshotError::HeaderMismatch(msg) => write!(f, "Snapshot header mismatch: {}", msg),
            SnapshotError::CapacityExceeded {
                particles,
                beams,
                max_particles,
                max_beams,
            } => write!(
                f,
                "Snapshot does not fit this device: {} particles / {} beams, capacity {} / {}",
                particles, beams, max_particles, max_beams
            ),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Errors that can occur while editing the host-side scene store.
#[derive(Debug, PartialEq, Eq)]
pub enum SceneError {
    /// The id is already occupied.
    DuplicateId(u16),
    /// The store is at its configured capacity.
    CapacityExhausted,
    /// A beam endpoint references a particle id that does not exist.
    MissingParticle(u16),
}

impl fmt::Display for SceneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneError::DuplicateId(id) => write!(f, "Id {} is already in use", id),
            SceneError::CapacityExhausted => write!(f, "Scene store is full"),
            SceneError::MissingParticle(id) => write!(f, "No particle with id {}", id),
        }
    }
}

impl std::error::Error for SceneError {}
