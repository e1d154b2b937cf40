//! Packed buffer layouts shared by the host, the compute kernels, and the
//! snapshot format.
//!
//! Everything simulated lives in four flat GPU buffers: particle records,
//! beam records, the logical-to-physical mapping table, and one metadata
//! record. The layouts here are the single source of truth; the WGSL
//! struct declarations in [`crate::gpu`] mirror them field for field.
//!
//! All encodings are little-endian and match the byte strides exactly
//! (24-byte particles, 40-byte beams, 112-byte metadata).

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

/// Byte stride of one particle record.
pub const PARTICLE_STRIDE: usize = 24;

/// Byte stride of one beam record.
pub const BEAM_STRIDE: usize = 40;

/// Byte size of the metadata record.
pub const METADATA_SIZE: usize = 112;

/// Byte offset of the live particle count (the particle draw descriptor's
/// instance-count word) within metadata.
pub const META_PARTICLE_COUNT_OFFSET: u64 = 4;

/// Byte offset of the live beam count (the beam draw descriptor's
/// instance-count word) within metadata.
pub const META_BEAM_COUNT_OFFSET: u64 = 24;

/// Byte offset of the particle indirect-draw descriptor.
pub const META_PARTICLE_DRAW_OFFSET: u64 = 0;

/// Byte offset of the beam indirect-draw descriptor.
pub const META_BEAM_DRAW_OFFSET: u64 = 20;

/// Byte offset of the 8-float physics-constants slab (gravity through
/// drag exponent) within metadata.
pub const META_CONSTANTS_OFFSET: u64 = 48;

/// Byte offset of the input region (cursor flag, cursor position, cursor
/// velocity, keyboard force) within metadata.
pub const META_INPUT_OFFSET: u64 = 84;

/// One simulated particle: a rigid circle of uniform radius and unit mass.
///
/// Acceleration doubles as the per-tick force accumulator; the kernel
/// resets it after integration, so a nonzero stored value is carry-over
/// (border friction) for the next sub-tick.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Particle {
    pub position: Vec2,
    pub velocity: Vec2,
    pub acceleration: Vec2,
}

impl Particle {
    /// Particle at rest at `position`.
    pub fn at(position: Vec2) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Particle at `position` with an initial `velocity`.
    pub fn moving(position: Vec2, velocity: Vec2) -> Self {
        Self {
            position,
            velocity,
            acceleration: Vec2::ZERO,
        }
    }
}

/// One spring-damper beam record as stored on the device.
///
/// `endpoints` packs two 16-bit physical particle slots (low word = a,
/// high word = b). `target_len` mutates under plastic yield;
/// `original_len` never changes and is the strain denominator.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Beam {
    pub endpoints: u32,
    pub original_len: f32,
    pub target_len: f32,
    pub last_len: f32,
    pub spring: f32,
    pub damp: f32,
    pub yield_strain: f32,
    pub break_limit: f32,
    pub strain: f32,
    pub stress: f32,
}

impl Beam {
    /// Pack two physical slots into the endpoints word.
    pub fn pack_endpoints(a: u16, b: u16) -> u32 {
        a as u32 | (b as u32) << 16
    }

    /// The two physical endpoint slots, `(a, b)`.
    pub fn endpoint_slots(&self) -> (u16, u16) {
        (self.endpoints as u16, (self.endpoints >> 16) as u16)
    }
}

/// Host-side beam description with *logical* particle ids.
///
/// This is what the scene store edits; the codec translates the logical
/// endpoints through the mapping table when packing a [`Beam`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamDesc {
    pub a: u16,
    pub b: u16,
    pub original_len: f32,
    pub target_len: f32,
    pub last_len: f32,
    pub spring: f32,
    pub damp: f32,
    pub yield_strain: f32,
    pub break_limit: f32,
    pub strain: f32,
    pub stress: f32,
}

impl BeamDesc {
    /// A fresh beam between logical particles `a` and `b` with rest
    /// length `len`: target and last length start at the rest length,
    /// strain and stress at zero.
    pub fn new(a: u16, b: u16, len: f32, spring: f32, damp: f32, yield_strain: f32, break_limit: f32) -> Self {
        Self {
            a,
            b,
            original_len: len,
            target_len: len,
            last_len: len,
            spring,
            damp,
            yield_strain,
            break_limit,
            strain: 0.0,
            stress: 0.0,
        }
    }
}

/// The logical-id to physical-slot indirection, two contiguous sections
/// (`max_particles` then `max_beams` entries).
///
/// Entry `i` of a section maps logical id `i` to the physical slot of its
/// record. The first `particle_count` / `beam_count` entries of each
/// section are the live entities in insertion order. Physical slots never
/// move while alive; the delete pass rewrites only this table.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingTable {
    max_particles: usize,
    max_beams: usize,
    entries: Vec<u16>,
}

impl MappingTable {
    /// An all-zero table with the given section capacities.
    pub fn new(max_particles: usize, max_beams: usize) -> Self {
        Self {
            max_particles,
            max_beams,
            entries: vec![0; max_particles + max_beams],
        }
    }

    pub fn max_particles(&self) -> usize {
        self.max_particles
    }

    pub fn max_beams(&self) -> usize {
        self.max_beams
    }

    /// Physical slot of logical particle `id`.
    pub fn particle_slot(&self, id: u16) -> u16 {
        self.entries[id as usize]
    }

    pub fn set_particle_slot(&mut self, id: u16, slot: u16) {
        self.entries[id as usize] = slot;
    }

    /// Physical slot of logical beam `id`.
    pub fn beam_slot(&self, id: u16) -> u16 {
        self.entries[self.max_particles + id as usize]
    }

    pub fn set_beam_slot(&mut self, id: u16, slot: u16) {
        self.entries[self.max_particles + id as usize] = slot;
    }

    /// The live particle section prefix.
    pub fn particle_section(&self, count: usize) -> &[u16] {
        &self.entries[..count]
    }

    /// The live beam section prefix.
    pub fn beam_section(&self, count: usize) -> &[u16] {
        &self.entries[self.max_particles..self.max_particles + count]
    }

    /// Logical id of the particle occupying `slot`, by linear scan of the
    /// live prefix. Expensive; used only during edit loads and saves.
    pub fn particle_of_slot(&self, slot: u16, count: usize) -> Option<u16> {
        self.entries[..count]
            .iter()
            .position(|&s| s == slot)
            .map(|i| i as u16)
    }

    /// Widen to the `u32`-per-entry image the compute kernels index.
    ///
    /// The device copy holds one entry per word; `u16` is only the host
    /// and snapshot representation (WGSL cannot address 16-bit array
    /// elements without racy subword packing in the delete pass).
    pub fn to_device_words(&self) -> Vec<u32> {
        self.entries.iter().map(|&e| e as u32).collect()
    }

    /// Rebuild from the device's `u32`-per-entry image.
    pub fn from_device_words(max_particles: usize, max_beams: usize, words: &[u32]) -> Self {
        debug_assert_eq!(words.len(), max_particles + max_beams);
        Self {
            max_particles,
            max_beams,
            entries: words.iter().map(|&w| w as u16).collect(),
        }
    }
}

/// The 112-byte metadata record.
///
/// Declared order is load-bearing: the two five-word indirect-draw
/// descriptors lead so the render pass can point `draw_indirect` straight
/// at offsets 0 and 20, and the live counts are the descriptors'
/// instance-count words (single source of truth, written back by the
/// delete pass).
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Metadata {
    pub particle_draw: [u32; 5],
    pub beam_draw: [u32; 5],
    pub max_particles: u32,
    pub max_beams: u32,
    pub gravity: [f32; 2],
    pub border_elasticity: f32,
    pub border_friction: f32,
    pub pair_elasticity: f32,
    pub pair_friction: f32,
    pub drag_coeff: f32,
    pub drag_exp: f32,
    pub user_force: f32,
    pub cursor_active: u32,
    pub cursor_pos: [f32; 2],
    pub cursor_vel: [f32; 2],
    pub key_force: [f32; 2],
}

impl Metadata {
    /// Fresh metadata for an empty world of the given capacities.
    pub fn new(max_particles: u32, max_beams: u32) -> Self {
        Self {
            // vertex_count, instance_count, first_vertex, base, first_instance
            particle_draw: [3, 0, 0, 0, 0],
            beam_draw: [2, 0, 0, 0, 0],
            max_particles,
            max_beams,
            gravity: [0.0; 2],
            border_elasticity: 0.0,
            border_friction: 0.0,
            pair_elasticity: 0.0,
            pair_friction: 0.0,
            drag_coeff: 0.0,
            drag_exp: 0.0,
            user_force: 0.0,
            cursor_active: 0,
            cursor_pos: [0.0; 2],
            cursor_vel: [0.0; 2],
            key_force: [0.0; 2],
        }
    }

    pub fn particle_count(&self) -> u32 {
        self.particle_draw[1]
    }

    pub fn beam_count(&self) -> u32 {
        self.beam_draw[1]
    }

    pub fn set_particle_count(&mut self, count: u32) {
        self.particle_draw[1] = count;
    }

    pub fn set_beam_count(&mut self, count: u32) {
        self.beam_draw[1] = count;
    }

    /// The physics-constants slab (bytes 48..80) as 8 floats.
    pub fn constants_slab(&self) -> [f32; 8] {
        [
            self.gravity[0],
            self.gravity[1],
            self.border_elasticity,
            self.border_friction,
            self.pair_elasticity,
            self.pair_friction,
            self.drag_coeff,
            self.drag_exp,
        ]
    }

    pub fn set_constants_slab(&mut self, slab: [f32; 8]) {
        self.gravity = [slab[0], slab[1]];
        self.border_elasticity = slab[2];
        self.border_friction = slab[3];
        self.pair_elasticity = slab[4];
        self.pair_friction = slab[5];
        self.drag_coeff = slab[6];
        self.drag_exp = slab[7];
    }
}

/// Write a particle record at `slot` of a packed particle buffer.
pub fn write_particle(buf: &mut [u8], slot: usize, particle: &Particle) {
    let start = slot * PARTICLE_STRIDE;
    buf[start..start + PARTICLE_STRIDE].copy_from_slice(bytemuck::bytes_of(particle));
}

/// Read the particle record at `slot` of a packed particle buffer.
pub fn read_particle(buf: &[u8], slot: usize) -> Particle {
    let start = slot * PARTICLE_STRIDE;
    bytemuck::pod_read_unaligned(&buf[start..start + PARTICLE_STRIDE])
}

/// Write a beam at `slot` of a packed beam buffer, translating the
/// logical endpoint ids to physical slots through `mapping`.
pub fn write_beam(buf: &mut [u8], slot: usize, desc: &BeamDesc, mapping: &MappingTable) {
    let record = Beam {
        endpoints: Beam::pack_endpoints(mapping.particle_slot(desc.a), mapping.particle_slot(desc.b)),
        original_len: desc.original_len,
        target_len: desc.target_len,
        last_len: desc.last_len,
        spring: desc.spring,
        damp: desc.damp,
        yield_strain: desc.yield_strain,
        break_limit: desc.break_limit,
        strain: desc.strain,
        stress: desc.stress,
    };
    let start = slot * BEAM_STRIDE;
    buf[start..start + BEAM_STRIDE].copy_from_slice(bytemuck::bytes_of(&record));
}

/// Read the beam at `slot`, reconstructing logical endpoint ids by linear
/// scan of the mapping table's live prefix (`particle_count` entries).
///
/// Returns `None` when an endpoint slot is not referenced by any live
/// logical id. Expensive; only used during edit loads.
pub fn read_beam(buf: &[u8], slot: usize, mapping: &MappingTable, particle_count: usize) -> Option<BeamDesc> {
    let start = slot * BEAM_STRIDE;
    let record: Beam = bytemuck::pod_read_unaligned(&buf[start..start + BEAM_STRIDE]);
    let (slot_a, slot_b) = record.endpoint_slots();
    Some(BeamDesc {
        a: mapping.particle_of_slot(slot_a, particle_count)?,
        b: mapping.particle_of_slot(slot_b, particle_count)?,
        original_len: record.original_len,
        target_len: record.target_len,
        last_len: record.last_len,
        spring: record.spring,
        damp: record.damp,
        yield_strain: record.yield_strain,
        break_limit: record.break_limit,
        strain: record.strain,
        stress: record.stress,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_record_strides() {
        assert_eq!(size_of::<Particle>(), PARTICLE_STRIDE);
        assert_eq!(size_of::<Beam>(), BEAM_STRIDE);
        assert_eq!(size_of::<Metadata>(), METADATA_SIZE);
    }

    #[test]
    fn test_metadata_offsets() {
        assert_eq!(offset_of!(Metadata, particle_draw), META_PARTICLE_DRAW_OFFSET as usize);
        assert_eq!(offset_of!(Metadata, beam_draw), META_BEAM_DRAW_OFFSET as usize);
        assert_eq!(offset_of!(Metadata, gravity), META_CONSTANTS_OFFSET as usize);
        assert_eq!(offset_of!(Metadata, cursor_active), META_INPUT_OFFSET as usize);
        // Counts are the instance-count words of the draw descriptors.
        assert_eq!(offset_of!(Metadata, particle_draw) + 4, META_PARTICLE_COUNT_OFFSET as usize);
        assert_eq!(offset_of!(Metadata, beam_draw) + 4, META_BEAM_COUNT_OFFSET as usize);
        // The input region runs to the end of the record.
        assert_eq!(offset_of!(Metadata, key_force), METADATA_SIZE - 8);
    }

    #[test]
    fn test_endpoint_packing() {
        let e = Beam::pack_endpoints(7, 1023);
        let beam = Beam {
            endpoints: e,
            ..Default::default()
        };
        assert_eq!(beam.endpoint_slots(), (7, 1023));

        let e = Beam::pack_endpoints(u16::MAX, 0);
        assert_eq!(e, u16::MAX as u32);
    }

    #[test]
    fn test_particle_codec_roundtrip() {
        let mut buf = vec![0u8; PARTICLE_STRIDE * 4];
        let p = Particle::moving(Vec2::new(1.5, -2.0), Vec2::new(0.25, 4.0));
        write_particle(&mut buf, 2, &p);
        assert_eq!(read_particle(&buf, 2), p);
        // Neighboring slots untouched.
        assert_eq!(read_particle(&buf, 1), Particle::default());
        assert_eq!(read_particle(&buf, 3), Particle::default());
    }

    #[test]
    fn test_beam_codec_translates_logical_ids() {
        let mut mapping = MappingTable::new(8, 4);
        mapping.set_particle_slot(0, 5);
        mapping.set_particle_slot(1, 2);

        let mut buf = vec![0u8; BEAM_STRIDE * 2];
        let desc = BeamDesc::new(0, 1, 100.0, 10.0, 1.0, 0.1, 0.5);
        write_beam(&mut buf, 1, &desc, &mapping);

        let record: Beam = bytemuck::pod_read_unaligned(&buf[BEAM_STRIDE..2 * BEAM_STRIDE]);
        assert_eq!(record.endpoint_slots(), (5, 2));

        let back = read_beam(&buf, 1, &mapping, 2).unwrap();
        assert_eq!(back, desc);
    }

    #[test]
    fn test_beam_read_fails_on_dead_endpoint() {
        let mut mapping = MappingTable::new(8, 4);
        mapping.set_particle_slot(0, 5);
        mapping.set_particle_slot(1, 2);

        let mut buf = vec![0u8; BEAM_STRIDE];
        let desc = BeamDesc::new(0, 1, 100.0, 10.0, 1.0, 0.1, 0.5);
        write_beam(&mut buf, 0, &desc, &mapping);

        // With only one live particle, slot 2 is no longer referenced.
        assert!(read_beam(&buf, 0, &mapping, 1).is_none());
    }

    #[test]
    fn test_mapping_sections_are_disjoint() {
        let mut mapping = MappingTable::new(4, 4);
        mapping.set_particle_slot(3, 11);
        mapping.set_beam_slot(0, 22);
        assert_eq!(mapping.particle_slot(3), 11);
        assert_eq!(mapping.beam_slot(0), 22);
        assert_eq!(mapping.particle_section(4), &[0, 0, 0, 11]);
        assert_eq!(mapping.beam_section(1), &[22]);
    }

    #[test]
    fn test_mapping_device_words_roundtrip() {
        let mut mapping = MappingTable::new(3, 2);
        mapping.set_particle_slot(0, 2);
        mapping.set_particle_slot(1, 0);
        mapping.set_beam_slot(1, 1);
        let words = mapping.to_device_words();
        assert_eq!(words, vec![2, 0, 0, 0, 1]);
        assert_eq!(MappingTable::from_device_words(3, 2, &words), mapping);
    }

    #[test]
    fn test_metadata_counts_alias_draw_descriptors() {
        let mut meta = Metadata::new(100, 50);
        meta.set_particle_count(7);
        meta.set_beam_count(3);
        assert_eq!(meta.particle_draw, [3, 7, 0, 0, 0]);
        assert_eq!(meta.beam_draw, [2, 3, 0, 0, 0]);
        assert_eq!(meta.particle_count(), 7);
        assert_eq!(meta.beam_count(), 3);
    }

    #[test]
    fn test_constants_slab_region() {
        let mut meta = Metadata::new(1, 1);
        let slab = [0.0, -0.5, 0.5, 0.2, 0.5, 0.1, 0.01, 2.0];
        meta.set_constants_slab(slab);
        assert_eq!(meta.constants_slab(), slab);

        // The slab occupies bytes 48..80 of the packed record.
        let bytes = bytemuck::bytes_of(&meta);
        let raw: &[f32] = bytemuck::cast_slice(&bytes[48..80]);
        assert_eq!(raw, &slab);
    }
}
