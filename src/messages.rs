//! Typed message channel between a host shell and the engine.
//!
//! The host drives the engine with [`EngineRequest`]s and receives
//! [`EngineResponse`]s; the engine pushes [`EngineResponse::Framerate`]
//! unprompted once per frame. Engine construction plays the role of the
//! INIT message (a drawing surface cannot meaningfully travel through a
//! value channel), and [`EngineRequest::Destroy`] is echoed with
//! [`EngineResponse::Destroyed`] on shutdown.

use crate::input::InputFrame;
use crate::params::PhysicsConstants;

/// Requests a host sends to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineRequest {
    /// Replace the physics constants; echoes the now-current constants.
    SetPhysicsConstants(PhysicsConstants),
    /// Query the current physics constants.
    GetPhysicsConstants,
    /// Latest user input sample; acknowledged.
    Input(InputFrame),
    /// The hosting surface was hidden or revealed.
    VisibilityChange { hidden: bool },
    /// Serialize the live state; responds with the snapshot bytes.
    SnapshotSave,
    /// Restore a snapshot; responds with whether the load succeeded.
    SnapshotLoad(Vec<u8>),
    /// Scribble over random buffer offsets (debug aid).
    CorruptBuffers,
    /// Stop the engine and release the device.
    Destroy,
}

/// Responses and notifications the engine sends to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineResponse {
    /// Echo of the current physics constants.
    PhysicsConstants(PhysicsConstants),
    /// An input frame was ingested.
    InputAck,
    /// Snapshot bytes from [`EngineRequest::SnapshotSave`].
    Snapshot(Vec<u8>),
    /// Outcome of [`EngineRequest::SnapshotLoad`]. `false` means the
    /// snapshot did not fit this device and the state is unchanged.
    SnapshotLoaded(bool),
    /// Frames rendered over the trailing second. Pushed once per frame.
    Framerate(f32),
    /// Echo of [`EngineRequest::Destroy`] once shutdown completes.
    Destroyed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_are_cloneable_values() {
        // The channel ships requests by value between host and worker.
        let req = EngineRequest::SnapshotLoad(vec![1, 2, 3]);
        assert_eq!(req.clone(), req);

        let req = EngineRequest::SetPhysicsConstants(PhysicsConstants::default());
        assert_eq!(req.clone(), req);
    }
}
