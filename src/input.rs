//! User input frames and their composition into the metadata record.
//!
//! The host sends [`InputFrame`]s (keyboard force direction, cursor
//! position in normalized surface coordinates, cursor-held flag); the
//! orchestrator folds the latest frame into the 28-byte input region of
//! the metadata buffer once per rendered frame. Cursor velocity is
//! derived here from successive positions, scaled by
//! `fps * wall_delta * bounds` so it is expressed in simulation units per
//! frame regardless of how irregularly input events arrive.

use glam::Vec2;

/// One input sample from the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputFrame {
    /// Keyboard body-force direction (unit-ish vector, zero when idle).
    pub key_force: Vec2,
    /// Cursor position in normalized `[0, 1]²` surface coordinates,
    /// y up.
    pub cursor_pos: Vec2,
    /// Whether the cursor drag is engaged.
    pub cursor_active: bool,
}

impl Default for InputFrame {
    fn default() -> Self {
        Self {
            key_force: Vec2::ZERO,
            cursor_pos: Vec2::ZERO,
            cursor_active: false,
        }
    }
}

/// The composed input region exactly as queue-written into metadata:
/// cursor flag, cursor position, cursor velocity, keyboard force.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InputRecord {
    pub cursor_active: u32,
    pub cursor_pos: Vec2,
    pub cursor_vel: Vec2,
    pub key_force: Vec2,
}

/// Tracks the latest input frame and derives cursor velocity between
/// frame compositions.
#[derive(Debug)]
pub struct InputTracker {
    latest: InputFrame,
    last_cursor: Option<Vec2>,
}

impl InputTracker {
    pub fn new() -> Self {
        Self {
            latest: InputFrame::default(),
            last_cursor: None,
        }
    }

    /// Replace the pending input frame. Called on every INPUT message;
    /// only the most recent frame before a compose is observed by the
    /// simulation.
    pub fn ingest(&mut self, frame: InputFrame) {
        self.latest = frame;
    }

    /// Fold the pending frame into an [`InputRecord`].
    ///
    /// `fps` and `wall_delta` come from the frame clock; `bounds` maps
    /// the normalized cursor position into simulation space. While the
    /// cursor is inactive no velocity is accumulated and the stored
    /// anchor resets, so re-engaging the drag never produces a velocity
    /// spike from stale history.
    pub fn compose(&mut self, fps: f32, wall_delta: f32, bounds: f32) -> InputRecord {
        let sim_pos = self.latest.cursor_pos * bounds;
        let cursor_vel = if self.latest.cursor_active {
            match self.last_cursor {
                Some(last) => (sim_pos - last) * (fps * wall_delta).max(0.0),
                None => Vec2::ZERO,
            }
        } else {
            Vec2::ZERO
        };
        self.last_cursor = self.latest.cursor_active.then_some(sim_pos);

        InputRecord {
            cursor_active: self.latest.cursor_active as u32,
            cursor_pos: sim_pos,
            cursor_vel,
            key_force: self.latest.key_force,
        }
    }
}

impl Default for InputTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Map held arrow keys to a keyboard body-force direction.
pub fn key_force(up: bool, down: bool, left: bool, right: bool) -> Vec2 {
    let mut force = Vec2::ZERO;
    if up {
        force.y += 1.0;
    }
    if down {
        force.y -= 1.0;
    }
    if left {
        force.x -= 1.0;
    }
    if right {
        force.x += 1.0;
    }
    force
}
