//! Flat per-particle state shared by every part of the simulation.

use super::ConfigError;
use crate::math::Vec3;

/// Positions, velocities and inverse masses of all particles, indexed by particle id.
///
/// The particle count is fixed at construction.
/// A particle with an inverse mass of zero is pinned and never moves.
#[derive(Clone, Debug)]
pub struct ParticleStore {
    positions: Vec<Vec3>,
    velocities: Vec<Vec3>,
    inverse_masses: Vec<f32>,
}

impl ParticleStore {
    /// Create a store with zero initial velocities.
    pub fn new(positions: Vec<Vec3>, inverse_masses: Vec<f32>) -> Result<Self, ConfigError> {
        if positions.len() != inverse_masses.len() {
            return Err(ConfigError::InvalidParameter {
                name: "inverse_masses",
                reason: format!(
                    "expected {} entries to match positions, got {}",
                    positions.len(),
                    inverse_masses.len()
                ),
            });
        }
        if let Some(bad) = inverse_masses.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "inverse_masses",
                reason: format!("inverse mass must be finite and non-negative, got {bad}"),
            });
        }
        Ok(Self {
            velocities: vec![Vec3::zero(); positions.len()],
            positions,
            inverse_masses,
        })
    }

    /// Create a store where every particle has unit mass.
    pub fn with_unit_masses(positions: Vec<Vec3>) -> Self {
        let count = positions.len();
        Self {
            velocities: vec![Vec3::zero(); count],
            positions,
            inverse_masses: vec![1.0; count],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    #[inline]
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    #[inline]
    pub fn velocities(&self) -> &[Vec3] {
        &self.velocities
    }

    #[inline]
    pub fn inverse_masses(&self) -> &[f32] {
        &self.inverse_masses
    }

    /// Whether the particle is an immovable anchor. Out-of-range indices are not pinned.
    #[inline]
    pub fn is_pinned(&self, idx: usize) -> bool {
        self.inverse_masses.get(idx).map_or(false, |w| *w == 0.0)
    }

    /// Make a particle immovable.
    pub fn pin(&mut self, idx: usize) -> Result<(), ConfigError> {
        let count = self.len();
        let w = self
            .inverse_masses
            .get_mut(idx)
            .ok_or(ConfigError::IndexOutOfRange { index: idx, count })?;
        *w = 0.0;
        Ok(())
    }

    /// Overwrite the velocity of a single particle, e.g. to set up an initial state.
    pub fn set_velocity(&mut self, idx: usize, velocity: Vec3) -> Result<(), ConfigError> {
        let count = self.len();
        let v = self
            .velocities
            .get_mut(idx)
            .ok_or(ConfigError::IndexOutOfRange { index: idx, count })?;
        *v = velocity;
        Ok(())
    }

    pub(crate) fn state_mut(&mut self) -> (&mut [Vec3], &mut [Vec3], &[f32]) {
        (
            &mut self.positions,
            &mut self.velocities,
            &self.inverse_masses,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_lengths_are_rejected() {
        let res = ParticleStore::new(vec![Vec3::zero(); 3], vec![1.0; 2]);
        assert!(matches!(
            res,
            Err(ConfigError::InvalidParameter {
                name: "inverse_masses",
                ..
            })
        ));
    }

    #[test]
    fn negative_inverse_mass_is_rejected() {
        let res = ParticleStore::new(vec![Vec3::zero(); 2], vec![1.0, -1.0]);
        assert!(res.is_err());
    }

    #[test]
    fn pinning() {
        let mut store = ParticleStore::with_unit_masses(vec![Vec3::zero(); 4]);
        assert!(!store.is_pinned(2));
        store.pin(2).unwrap();
        assert!(store.is_pinned(2));
        assert!(!store.is_pinned(17));
        assert!(matches!(
            store.pin(4),
            Err(ConfigError::IndexOutOfRange { index: 4, count: 4 })
        ));
    }
}
