//! Framed binary snapshots of the live simulation state.
//!
//! A snapshot is self-describing: a `u16[6]` header carrying its own byte
//! length followed by the byte lengths of the five payload sections, then
//! the sections packed back-to-back: the physics-constants slab
//! (8 x f32), the live particle mapping (`particle_count` x u16), the
//! live particle data (x 24 bytes), the live beam mapping
//! (`beam_count` x u16), and the live beam data (x 40 bytes). All
//! little-endian.
//!
//! This module is the pure codec; staging device buffers in and out of a
//! snapshot lives in [`crate::engine`].

use crate::error::SnapshotError;
use crate::layout::{Beam, Particle, BEAM_STRIDE, PARTICLE_STRIDE};

/// Byte length of the `u16[6]` header.
pub const HEADER_LEN: usize = 12;

/// Byte length of the physics-constants slab.
pub const CONSTANTS_LEN: usize = 32;

/// A decoded snapshot: the live portion of the state plus the constants
/// slab. Mapping entries are physical slots into the data sections.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub constants: [f32; 8],
    pub particle_mapping: Vec<u16>,
    pub particles: Vec<Particle>,
    pub beam_mapping: Vec<u16>,
    pub beams: Vec<Beam>,
}

impl Snapshot {
    /// Number of live particles.
    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    /// Number of live beams.
    pub fn beam_count(&self) -> usize {
        self.beams.len()
    }

    /// Frame the snapshot into its binary form.
    pub fn encode(&self) -> Vec<u8> {
        let pmap_len = self.particle_mapping.len() * 2;
        let pdata_len = self.particles.len() * PARTICLE_STRIDE;
        let bmap_len = self.beam_mapping.len() * 2;
        let bdata_len = self.beams.len() * BEAM_STRIDE;

        let mut out = Vec::with_capacity(
            HEADER_LEN + CONSTANTS_LEN + pmap_len + pdata_len + bmap_len + bdata_len,
        );
        for len in [HEADER_LEN, CONSTANTS_LEN, pmap_len, pdata_len, bmap_len, bdata_len] {
            out.extend_from_slice(&(len as u16).to_le_bytes());
        }
        for value in self.constants {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.extend_from_slice(bytemuck::cast_slice(&self.particle_mapping));
        out.extend_from_slice(bytemuck::cast_slice(&self.particles));
        out.extend_from_slice(bytemuck::cast_slice(&self.beam_mapping));
        out.extend_from_slice(bytemuck::cast_slice(&self.beams));
        out
    }

    /// Parse a framed snapshot.
    ///
    /// Checks framing only: header and section lengths must be present
    /// and mutually consistent with the fixed record strides. No semantic
    /// validation of the payload is performed.
    pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        if bytes.len() < HEADER_LEN {
            return Err(SnapshotError::Truncated {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        let mut lens = [0usize; 6];
        for (i, len) in lens.iter_mut().enumerate() {
            *len = u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]) as usize;
        }
        let [header_len, constants_len, pmap_len, pdata_len, bmap_len, bdata_len] = lens;

        if header_len != HEADER_LEN {
            return Err(SnapshotError::HeaderMismatch(format!(
                "header length {} (expected {})",
                header_len, HEADER_LEN
            )));
        }
        if constants_len != CONSTANTS_LEN {
            return Err(SnapshotError::HeaderMismatch(format!(
                "constants slab length {} (expected {})",
                constants_len, CONSTANTS_LEN
            )));
        }
        if pmap_len % 2 != 0 || bmap_len % 2 != 0 {
            return Err(SnapshotError::HeaderMismatch("odd mapping section length".into()));
        }
        if pdata_len != pmap_len / 2 * PARTICLE_STRIDE {
            return Err(SnapshotError::HeaderMismatch(format!(
                "particle data length {} does not match {} mapped particles",
                pdata_len,
                pmap_len / 2
            )));
        }
        if bdata_len != bmap_len / 2 * BEAM_STRIDE {
            return Err(SnapshotError::HeaderMismatch(format!(
                "beam data length {} does not match {} mapped beams",
                bdata_len,
                bmap_len / 2
            )));
        }

        let total = HEADER_LEN + CONSTANTS_LEN + pmap_len + pdata_len + bmap_len + bdata_len;
        if bytes.len() < total {
            return Err(SnapshotError::Truncated {
                expected: total,
                actual: bytes.len(),
            });
        }

        let mut cursor = HEADER_LEN;
        let constants_bytes = &bytes[cursor..cursor + CONSTANTS_LEN];
        cursor += CONSTANTS_LEN;
        let pmap_bytes = &bytes[cursor..cursor + pmap_len];
        cursor += pmap_len;
        let pdata_bytes = &bytes[cursor..cursor + pdata_len];
        cursor += pdata_len;
        let bmap_bytes = &bytes[cursor..cursor + bmap_len];
        cursor += bmap_len;
        let bdata_bytes = &bytes[cursor..cursor + bdata_len];

        let mut constants = [0f32; 8];
        for (value, chunk) in constants.iter_mut().zip(constants_bytes.chunks_exact(4)) {
            *value = f32::from_le_bytes(chunk.try_into().unwrap());
        }

        // Sections start at offset 50, so records are not 4-aligned in
        // the blob; read them unaligned.
        let particle_mapping = read_u16_section(pmap_bytes);
        let particles = pdata_bytes
            .chunks_exact(PARTICLE_STRIDE)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        let beam_mapping = read_u16_section(bmap_bytes);
        let beams = bdata_bytes
            .chunks_exact(BEAM_STRIDE)
            .map(bytemuck::pod_read_unaligned)
            .collect();

        Ok(Self {
            constants,
            particle_mapping,
            particles,
            beam_mapping,
            beams,
        })
    }

    /// Check the live counts against a device's capacities.
    pub fn check_capacity(&self, max_particles: usize, max_beams: usize) -> Result<(), SnapshotError> {
        if self.particle_count() > max_particles || self.beam_count() > max_beams {
            return Err(SnapshotError::CapacityExceeded {
                particles: self.particle_count(),
                beams: self.beam_count(),
                max_particles,
                max_beams,
            });
        }
        Ok(())
    }
}

fn read_u16_section(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    fn sample() -> Snapshot {
        Snapshot {
            constants: [0.0, -0.5, 0.5, 0.2, 0.5, 0.1, 0.01, 2.0],
            particle_mapping: vec![0, 1, 2],
            particles: vec![
                Particle::at(Vec2::new(100.0, 200.0)),
                Particle::moving(Vec2::new(300.0, 400.0), Vec2::new(1.0, -1.0)),
                Particle::at(Vec2::new(500.0, 500.0)),
            ],
            beam_mapping: vec![0],
            beams: vec![Beam {
                endpoints: Beam::pack_endpoints(0, 2),
                original_len: 100.0,
                target_len: 100.0,
                last_len: 100.0,
                spring: 10.0,
                damp: 1.0,
                yield_strain: 0.1,
                break_limit: 0.5,
                strain: 0.0,
                stress: 0.0,
            }],
        }
    }

    #[test]
    fn test_roundtrip() {
        let snapshot = sample();
        assert_eq!(Snapshot::decode(&snapshot.encode()).unwrap(), snapshot);
    }

    #[test]
    fn test_empty_roundtrip() {
        let snapshot = Snapshot {
            constants: [0.0; 8],
            particle_mapping: vec![],
            particles: vec![],
            beam_mapping: vec![],
            beams: vec![],
        };
        let bytes = snapshot.encode();
        assert_eq!(bytes.len(), HEADER_LEN + CONSTANTS_LEN);
        assert_eq!(Snapshot::decode(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn test_header_declares_section_lengths() {
        let bytes = sample().encode();
        let lens: Vec<u16> = bytes[..HEADER_LEN]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(lens, vec![12, 32, 6, 72, 2, 40]);
        assert_eq!(bytes.len(), 12 + 32 + 6 + 72 + 2 + 40);
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let bytes = sample().encode();
        let err = Snapshot::decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, SnapshotError::Truncated { .. }));

        let err = Snapshot::decode(&bytes[..4]).unwrap_err();
        assert_eq!(
            err,
            SnapshotError::Truncated {
                expected: HEADER_LEN,
                actual: 4
            }
        );
    }

    #[test]
    fn test_inconsistent_header_rejected() {
        let mut bytes = sample().encode();
        // Claim one extra particle in the mapping section without data.
        bytes[4..6].copy_from_slice(&8u16.to_le_bytes());
        assert!(matches!(
            Snapshot::decode(&bytes),
            Err(SnapshotError::HeaderMismatch(_))
        ));
    }

    #[test]
    fn test_capacity_check() {
        let snapshot = sample();
        assert!(snapshot.check_capacity(3, 1).is_ok());
        assert_eq!(
            snapshot.check_capacity(2, 1),
            Err(SnapshotError::CapacityExceeded {
                particles: 3,
                beams: 1,
                max_particles: 2,
                max_beams: 1
            })
        );
        assert!(snapshot.check_capacity(3, 0).is_err());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut bytes = sample().encode();
        bytes.extend_from_slice(&[0xAA; 16]);
        assert_eq!(Snapshot::decode(&bytes).unwrap(), sample());
    }
}
