//! Engine configuration and physics constants.
//!
//! [`EngineOptions`] is validated once at engine construction;
//! [`PhysicsConstants`] can be swapped at any time through the message
//! channel and is queue-written into the metadata buffer, so applying the
//! same constants twice is equivalent to applying them once.

use glam::Vec2;

use crate::error::EngineError;
use crate::layout::{BEAM_STRIDE, PARTICLE_STRIDE};

/// Largest particle capacity whose snapshot data section still fits a
/// `u16` byte length.
pub const PARTICLE_CAPACITY_LIMIT: u32 = u16::MAX as u32 / PARTICLE_STRIDE as u32;

/// Largest beam capacity whose snapshot data section still fits a
/// `u16` byte length.
pub const BEAM_CAPACITY_LIMIT: u32 = u16::MAX as u32 / BEAM_STRIDE as u32;

/// Construction-time engine options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    /// Radius of every particle, in simulation units. Must be positive.
    pub particle_radius: f32,
    /// Integration sub-steps per rendered frame. Rounded up to an even
    /// value so the primary particle buffer is authoritative at frame end.
    pub subticks: u32,
    /// Particle capacity of the device buffers.
    pub max_particles: u32,
    /// Beam capacity of the device buffers.
    pub max_beams: u32,
    /// Side length of the square simulation region.
    pub bounds: f32,
    /// Strength multiplier for cursor and keyboard forces.
    pub user_force: f32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            particle_radius: 10.0,
            subticks: 64,
            max_particles: 2048,
            max_beams: 1024,
            bounds: 1000.0,
            user_force: 1.0,
        }
    }
}

impl EngineOptions {
    /// Validate the options, returning `InvalidConfiguration` on the first
    /// violation.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.particle_radius > 0.0) || !self.particle_radius.is_finite() {
            return Err(EngineError::InvalidConfiguration(format!(
                "particle_radius must be positive, got {}",
                self.particle_radius
            )));
        }
        if self.subticks == 0 {
            return Err(EngineError::InvalidConfiguration(
                "subticks must be positive".into(),
            ));
        }
        if self.max_particles == 0 || self.max_particles > PARTICLE_CAPACITY_LIMIT {
            return Err(EngineError::InvalidConfiguration(format!(
                "max_particles must be in 1..={}, got {}",
                PARTICLE_CAPACITY_LIMIT, self.max_particles
            )));
        }
        if self.max_beams == 0 || self.max_beams > BEAM_CAPACITY_LIMIT {
            return Err(EngineError::InvalidConfiguration(format!(
                "max_beams must be in 1..={}, got {}",
                BEAM_CAPACITY_LIMIT, self.max_beams
            )));
        }
        if !(self.bounds > self.particle_radius * 2.0) || !self.bounds.is_finite() {
            return Err(EngineError::InvalidConfiguration(format!(
                "bounds must exceed the particle diameter, got {}",
                self.bounds
            )));
        }
        Ok(())
    }

    /// Sub-tick count actually used: `subticks` rounded up to even.
    pub fn effective_subticks(&self) -> u32 {
        self.subticks + self.subticks % 2
    }

    /// Sub-tick duration in internal time units (the full frame is 1).
    pub fn delta_time(&self) -> f32 {
        1.0 / self.effective_subticks() as f32
    }
}

/// The physics scalars shared between host, metadata buffer, and snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsConstants {
    /// Gravity acceleration, applied every sub-tick.
    pub gravity: Vec2,
    /// Velocity retained (negated) on border contact.
    pub border_elasticity: f32,
    /// Friction applied on border contact to the orthogonal axis.
    pub border_friction: f32,
    /// Restitution of particle pair collisions.
    pub elasticity: f32,
    /// Tangential friction of particle pair collisions.
    pub friction: f32,
    /// Coefficient of the per-component velocity drag.
    pub drag_coeff: f32,
    /// Exponent of the per-component velocity drag.
    pub drag_exp: f32,
}

impl Default for PhysicsConstants {
    fn default() -> Self {
        Self {
            gravity: Vec2::new(0.0, -0.5),
            border_elasticity: 0.5,
            border_friction: 0.2,
            elasticity: 0.5,
            friction: 0.1,
            drag_coeff: 0.01,
            drag_exp: 2.0,
        }
    }
}

impl PhysicsConstants {
    /// Pack into the 8-float constants slab used by the metadata buffer
    /// and the snapshot format.
    pub fn to_slab(&self) -> [f32; 8] {
        [
            self.gravity.x,
            self.gravity.y,
            self.border_elasticity,
            self.border_friction,
            self.elasticity,
            self.friction,
            self.drag_coeff,
            self.drag_exp,
        ]
    }

    /// Rebuild from the 8-float constants slab.
    pub fn from_slab(slab: [f32; 8]) -> Self {
        Self {
            gravity: Vec2::new(slab[0], slab[1]),
            border_elasticity: slab[2],
            border_friction: slab[3],
            elasticity: slab[4],
            friction: slab[5],
            drag_coeff: slab[6],
            drag_exp: slab[7],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_validate() {
        assert!(EngineOptions::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_nonpositive_radius() {
        let opts = EngineOptions {
            particle_radius: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(EngineError::InvalidConfiguration(_))
        ));

        let opts = EngineOptions {
            particle_radius: -1.0,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_subticks() {
        let opts = EngineOptions {
            subticks: 0,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_capacity() {
        let opts = EngineOptions {
            max_particles: PARTICLE_CAPACITY_LIMIT + 1,
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let opts = EngineOptions {
            max_beams: BEAM_CAPACITY_LIMIT + 1,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_subticks_rounded_up_to_even() {
        let opts = EngineOptions {
            subticks: 63,
            ..Default::default()
        };
        assert_eq!(opts.effective_subticks(), 64);

        let opts = EngineOptions {
            subticks: 64,
            ..Default::default()
        };
        assert_eq!(opts.effective_subticks(), 64);

        let opts = EngineOptions {
            subticks: 1,
            ..Default::default()
        };
        assert_eq!(opts.effective_subticks(), 2);
        assert_eq!(opts.delta_time(), 0.5);
    }

    #[test]
    fn test_constants_slab_roundtrip() {
        let constants = PhysicsConstants {
            gravity: Vec2::new(0.1, -9.8),
            border_elasticity: 0.9,
            border_friction: 0.05,
            elasticity: 1.0,
            friction: 0.0,
            drag_coeff: 0.002,
            drag_exp: 1.5,
        };
        assert_eq!(PhysicsConstants::from_slab(constants.to_slab()), constants);
    }
}
