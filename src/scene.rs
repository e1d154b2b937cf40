//! Host-side mutable scene store.
//!
//! The editor works against this store with stable ids, then
//! [`SceneStore::write_state`] compacts everything into the packed device
//! buffers (physical slot = insertion order at write time) and
//! [`SceneStore::load_state`] rebuilds the maps from packed buffers. Ids
//! are *not* stable across a write/load cycle; only the set of particles
//! and beams is preserved.

use std::collections::{HashMap, HashSet};

use crate::error::SceneError;
use crate::layout::{
    self, BeamDesc, MappingTable, Particle, BEAM_STRIDE, PARTICLE_STRIDE,
};

/// The packed image of a scene, ready for upload to the device.
#[derive(Debug, Clone)]
pub struct PackedScene {
    pub particle_bytes: Vec<u8>,
    pub beam_bytes: Vec<u8>,
    pub mapping: MappingTable,
    pub particle_count: u32,
    pub beam_count: u32,
}

/// Mutable in-memory scene: particles and beams keyed by id, plus a
/// per-particle index of attached beams for O(1) lookup during editing
/// and cascading deletes.
#[derive(Debug, Clone)]
pub struct SceneStore {
    max_particles: usize,
    max_beams: usize,
    particles: HashMap<u16, Particle>,
    beams: HashMap<u16, BeamDesc>,
    attached: HashMap<u16, HashSet<u16>>,
    // Insertion order determines physical slot assignment on write.
    particle_order: Vec<u16>,
    beam_order: Vec<u16>,
}

impl SceneStore {
    /// An empty store with the given capacities.
    pub fn new(max_particles: usize, max_beams: usize) -> Self {
        Self {
            max_particles,
            max_beams,
            particles: HashMap::new(),
            beams: HashMap::new(),
            attached: HashMap::new(),
            particle_order: Vec::new(),
            beam_order: Vec::new(),
        }
    }

    pub fn max_particles(&self) -> usize {
        self.max_particles
    }

    pub fn max_beams(&self) -> usize {
        self.max_beams
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    pub fn beam_count(&self) -> usize {
        self.beams.len()
    }

    /// Add a particle under `id`. Fails on duplicate id or a full store.
    pub fn add_particle(&mut self, id: u16, particle: Particle) -> Result<(), SceneError> {
        if self.particles.len() >= self.max_particles {
            return Err(SceneError::CapacityExhausted);
        }
        if self.particles.contains_key(&id) {
            return Err(SceneError::DuplicateId(id));
        }
        self.particles.insert(id, particle);
        self.particle_order.push(id);
        Ok(())
    }

    /// Add a beam under `id`. Fails on duplicate id, a full store, or a
    /// missing endpoint particle.
    pub fn add_beam(&mut self, id: u16, beam: BeamDesc) -> Result<(), SceneError> {
        if self.beams.len() >= self.max_beams {
            return Err(SceneError::CapacityExhausted);
        }
        if self.beams.contains_key(&id) {
            return Err(SceneError::DuplicateId(id));
        }
        for endpoint in [beam.a, beam.b] {
            if !self.particles.contains_key(&endpoint) {
                return Err(SceneError::MissingParticle(endpoint));
            }
        }
        self.attached.entry(beam.a).or_default().insert(id);
        self.attached.entry(beam.b).or_default().insert(id);
        self.beams.insert(id, beam);
        self.beam_order.push(id);
        Ok(())
    }

    /// Remove a particle and every beam attached to it. Idempotent.
    pub fn remove_particle(&mut self, id: u16) {
        if self.particles.remove(&id).is_none() {
            return;
        }
        self.particle_order.retain(|&p| p != id);
        if let Some(beam_ids) = self.attached.remove(&id) {
            for beam_id in beam_ids {
                self.remove_beam(beam_id);
            }
        }
    }

    /// Remove a beam. Idempotent.
    pub fn remove_beam(&mut self, id: u16) {
        let Some(beam) = self.beams.remove(&id) else {
            return;
        };
        self.beam_order.retain(|&b| b != id);
        for endpoint in [beam.a, beam.b] {
            if let Some(set) = self.attached.get_mut(&endpoint) {
                set.remove(&id);
            }
        }
    }

    pub fn particle(&self, id: u16) -> Option<&Particle> {
        self.particles.get(&id)
    }

    pub fn particle_mut(&mut self, id: u16) -> Option<&mut Particle> {
        self.particles.get_mut(&id)
    }

    pub fn beam(&self, id: u16) -> Option<&BeamDesc> {
        self.beams.get(&id)
    }

    /// Particles in insertion order.
    pub fn particles(&self) -> impl Iterator<Item = (u16, &Particle)> {
        self.particle_order.iter().map(|&id| (id, &self.particles[&id]))
    }

    /// Beams in insertion order.
    pub fn beams(&self) -> impl Iterator<Item = (u16, &BeamDesc)> {
        self.beam_order.iter().map(|&id| (id, &self.beams[&id]))
    }

    /// Ids of beams attached to `particle`.
    pub fn beams_attached_to(&self, particle: u16) -> impl Iterator<Item = u16> + '_ {
        self.attached
            .get(&particle)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Smallest particle id not currently in use.
    pub fn first_free_particle_id(&self) -> Option<u16> {
        (0..self.max_particles as u16).find(|id| !self.particles.contains_key(id))
    }

    /// Smallest beam id not currently in use.
    pub fn first_free_beam_id(&self) -> Option<u16> {
        (0..self.max_beams as u16).find(|id| !self.beams.contains_key(id))
    }

    /// Compact the scene into packed device buffers.
    ///
    /// Physical slots are assigned sequentially in insertion order, and
    /// the mapping table's live prefix becomes the identity. Beam
    /// endpoint ids are translated to the assigned slots.
    pub fn write_state(&self) -> PackedScene {
        let mut mapping = MappingTable::new(self.max_particles, self.max_beams);
        let mut particle_bytes = vec![0u8; self.max_particles * PARTICLE_STRIDE];
        let mut beam_bytes = vec![0u8; self.max_beams * BEAM_STRIDE];

        // Logical id = physical slot = insertion rank after compaction,
        // so beam translation needs the id -> slot assignment first.
        let mut slot_of_id = HashMap::new();
        for (slot, (id, particle)) in self.particles().enumerate() {
            mapping.set_particle_slot(slot as u16, slot as u16);
            layout::write_particle(&mut particle_bytes, slot, particle);
            slot_of_id.insert(id, slot as u16);
        }

        for (slot, (_, beam)) in self.beams().enumerate() {
            mapping.set_beam_slot(slot as u16, slot as u16);
            let compacted = BeamDesc {
                a: slot_of_id[&beam.a],
                b: slot_of_id[&beam.b],
                ..*beam
            };
            layout::write_beam(&mut beam_bytes, slot, &compacted, &mapping);
        }

        PackedScene {
            particle_bytes,
            beam_bytes,
            mapping,
            particle_count: self.particles.len() as u32,
            beam_count: self.beams.len() as u32,
        }
    }

    /// Rebuild the store from packed buffers, assigning fresh sequential
    /// ids. Beam endpoints are reconstructed by scanning the mapping
    /// table; beams whose endpoints are not live are dropped.
    pub fn load_state(packed: &PackedScene) -> Self {
        let mut store = Self::new(packed.mapping.max_particles(), packed.mapping.max_beams());
        let particle_count = packed.particle_count as usize;

        for (id, &slot) in packed.mapping.particle_section(particle_count).iter().enumerate() {
            let particle = layout::read_particle(&packed.particle_bytes, slot as usize);
            // Fresh store below capacity: add cannot fail.
            let _ = store.add_particle(id as u16, particle);
        }

        for (id, &slot) in packed.mapping.beam_section(packed.beam_count as usize).iter().enumerate() {
            if let Some(beam) =
                layout::read_beam(&packed.beam_bytes, slot as usize, &packed.mapping, particle_count)
            {
                let _ = store.add_beam(id as u16, beam);
            }
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    fn store() -> SceneStore {
        SceneStore::new(16, 8)
    }

    #[test]
    fn test_add_and_find() {
        let mut s = store();
        s.add_particle(3, Particle::at(Vec2::new(1.0, 2.0))).unwrap();
        assert_eq!(s.particle(3).unwrap().position, Vec2::new(1.0, 2.0));
        assert!(s.particle(4).is_none());
        assert_eq!(s.particle_count(), 1);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut s = store();
        s.add_particle(0, Particle::default()).unwrap();
        assert_eq!(
            s.add_particle(0, Particle::default()),
            Err(SceneError::DuplicateId(0))
        );
    }

    #[test]
    fn test_capacity_exhaustion() {
        let mut s = SceneStore::new(2, 1);
        s.add_particle(0, Particle::default()).unwrap();
        s.add_particle(1, Particle::default()).unwrap();
        assert_eq!(
            s.add_particle(2, Particle::default()),
            Err(SceneError::CapacityExhausted)
        );
    }

    #[test]
    fn test_beam_requires_endpoints() {
        let mut s = store();
        s.add_particle(0, Particle::default()).unwrap();
        let beam = BeamDesc::new(0, 9, 10.0, 1.0, 0.1, 0.1, 0.5);
        assert_eq!(s.add_beam(0, beam), Err(SceneError::MissingParticle(9)));
    }

    #[test]
    fn test_remove_particle_cascades_to_beams() {
        let mut s = store();
        s.add_particle(0, Particle::default()).unwrap();
        s.add_particle(1, Particle::default()).unwrap();
        s.add_particle(2, Particle::default()).unwrap();
        s.add_beam(0, BeamDesc::new(0, 1, 10.0, 1.0, 0.1, 0.1, 0.5)).unwrap();
        s.add_beam(1, BeamDesc::new(1, 2, 10.0, 1.0, 0.1, 0.1, 0.5)).unwrap();

        s.remove_particle(1);
        assert_eq!(s.particle_count(), 2);
        assert_eq!(s.beam_count(), 0);
        assert_eq!(s.beams_attached_to(0).count(), 0);
        assert_eq!(s.beams_attached_to(2).count(), 0);
    }

    #[test]
    fn test_removal_is_idempotent() {
        let mut s = store();
        s.add_particle(0, Particle::default()).unwrap();
        s.remove_particle(0);
        s.remove_particle(0);
        s.remove_beam(5);
        assert_eq!(s.particle_count(), 0);
    }

    #[test]
    fn test_attached_beam_lookup() {
        let mut s = store();
        for id in 0..3 {
            s.add_particle(id, Particle::default()).unwrap();
        }
        s.add_beam(0, BeamDesc::new(0, 1, 10.0, 1.0, 0.1, 0.1, 0.5)).unwrap();
        s.add_beam(1, BeamDesc::new(0, 2, 10.0, 1.0, 0.1, 0.1, 0.5)).unwrap();

        let mut attached: Vec<u16> = s.beams_attached_to(0).collect();
        attached.sort_unstable();
        assert_eq!(attached, vec![0, 1]);
        assert_eq!(s.beams_attached_to(1).count(), 1);

        s.remove_beam(0);
        assert_eq!(s.beams_attached_to(0).count(), 1);
    }

    #[test]
    fn test_first_free_ids() {
        let mut s = store();
        assert_eq!(s.first_free_particle_id(), Some(0));
        s.add_particle(0, Particle::default()).unwrap();
        s.add_particle(1, Particle::default()).unwrap();
        assert_eq!(s.first_free_particle_id(), Some(2));
        s.remove_particle(0);
        assert_eq!(s.first_free_particle_id(), Some(0));
        assert_eq!(s.first_free_beam_id(), Some(0));
    }

    #[test]
    fn test_write_state_compacts_in_insertion_order() {
        let mut s = store();
        s.add_particle(7, Particle::at(Vec2::new(1.0, 0.0))).unwrap();
        s.add_particle(2, Particle::at(Vec2::new(2.0, 0.0))).unwrap();
        s.add_beam(5, BeamDesc::new(7, 2, 100.0, 10.0, 1.0, 0.1, 0.5)).unwrap();

        let packed = s.write_state();
        assert_eq!(packed.particle_count, 2);
        assert_eq!(packed.beam_count, 1);
        // Insertion order: id 7 lands in slot 0, id 2 in slot 1.
        assert_eq!(layout::read_particle(&packed.particle_bytes, 0).position.x, 1.0);
        assert_eq!(layout::read_particle(&packed.particle_bytes, 1).position.x, 2.0);
        assert_eq!(packed.mapping.particle_section(2), &[0, 1]);

        let beam = layout::read_beam(&packed.beam_bytes, 0, &packed.mapping, 2).unwrap();
        assert_eq!((beam.a, beam.b), (0, 1));
    }

    #[test]
    fn test_write_load_preserves_sets_not_ids() {
        let mut s = store();
        s.add_particle(9, Particle::at(Vec2::new(5.0, 6.0))).unwrap();
        s.add_particle(4, Particle::moving(Vec2::new(7.0, 8.0), Vec2::new(1.0, 0.0))).unwrap();
        s.add_beam(3, BeamDesc::new(9, 4, 50.0, 2.0, 0.5, 0.2, 1.0)).unwrap();

        let reloaded = SceneStore::load_state(&s.write_state());

        // Ids are renumbered sequentially...
        assert!(reloaded.particle(0).is_some());
        assert!(reloaded.particle(9).is_none());

        // ...but the particle set and the beam geometry survive.
        let mut positions: Vec<(f32, f32)> = reloaded
            .particles()
            .map(|(_, p)| (p.position.x, p.position.y))
            .collect();
        positions.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(positions, vec![(5.0, 6.0), (7.0, 8.0)]);

        assert_eq!(reloaded.beam_count(), 1);
        let (_, beam) = reloaded.beams().next().unwrap();
        assert_eq!(beam.original_len, 50.0);
        let pa = reloaded.particle(beam.a).unwrap();
        let pb = reloaded.particle(beam.b).unwrap();
        assert_eq!(pa.position, Vec2::new(5.0, 6.0));
        assert_eq!(pb.position, Vec2::new(7.0, 8.0));
    }

    #[test]
    fn test_write_load_write_is_stable() {
        let mut s = store();
        s.add_particle(1, Particle::at(Vec2::new(1.0, 1.0))).unwrap();
        s.add_particle(0, Particle::at(Vec2::new(2.0, 2.0))).unwrap();
        s.add_beam(0, BeamDesc::new(1, 0, 10.0, 1.0, 0.1, 0.1, 0.5)).unwrap();

        let first = s.write_state();
        let second = SceneStore::load_state(&first).write_state();
        assert_eq!(first.particle_bytes, second.particle_bytes);
        assert_eq!(first.beam_bytes, second.beam_bytes);
        assert_eq!(first.mapping, second.mapping);
    }
}
