//! Geometric constraints ("energy functions") between small sets of particles.
//!
//! Every constraint is a scalar function `C(x)` of the positions of its particles
//! which is zero at rest. Projecting a constraint computes the gradient of `C`
//! for each participating particle and writes the correction
//!
//! ```text
//! λ   = -C(x) / Σ_i w_i |∇_i C|²
//! Δx_i = k λ w_i ∇_i C
//! ```
//!
//! into a correction buffer, where `w_i` is the inverse mass and `k` a stiffness in `[0, 1]`.
//! Constraints only hold particle indices, never references to particle data,
//! so they can be solved from any thread given a position snapshot.

use crate::math::{Vec3, EPSILON};

mod bending;
pub use bending::BendingConstraint;

mod fem;
pub use fem::{MaterialParams, TetrahedronConstraint, TriangleConstraint, VolumeMaterialParams};

/// A constraint of any supported kind, with its rest state captured at construction.
#[derive(Clone, Debug)]
pub enum Constraint {
    Distance(DistanceConstraint),
    Bending(BendingConstraint),
    Triangle(TriangleConstraint),
    Tetrahedron(TetrahedronConstraint),
}

impl Constraint {
    /// Distance constraint keeping the current distance between two particles.
    ///
    /// Returns `None` if the indices are equal or the particles coincide.
    pub fn distance(positions: &[Vec3], i0: usize, i1: usize, stiffness: f32) -> Option<Self> {
        DistanceConstraint::new(positions, i0, i1, stiffness).map(Self::Distance)
    }

    /// Isometric bending constraint over two triangles sharing the edge `(i0, i1)`.
    ///
    /// ```text
    ///     i2
    ///    /  \
    ///  i0 -- i1
    ///    \  /
    ///     i3
    /// ```
    pub fn bending(positions: &[Vec3], indices: [usize; 4], stiffness: f32) -> Option<Self> {
        BendingConstraint::new(positions, indices, stiffness).map(Self::Bending)
    }

    /// Orthotropic FEM strain constraint on a triangle.
    pub fn triangle(
        positions: &[Vec3],
        indices: [usize; 3],
        material: &MaterialParams,
    ) -> Option<Self> {
        TriangleConstraint::new(positions, indices, material).map(Self::Triangle)
    }

    /// Volumetric FEM strain constraint on a tetrahedron.
    pub fn tetrahedron(
        positions: &[Vec3],
        indices: [usize; 4],
        material: &VolumeMaterialParams,
    ) -> Option<Self> {
        TetrahedronConstraint::new(positions, indices, material).map(Self::Tetrahedron)
    }

    /// Indices of the particles this constraint reads and writes.
    #[inline]
    pub fn particles(&self) -> &[usize] {
        match self {
            Constraint::Distance(c) => &c.indices,
            Constraint::Bending(c) => &c.indices,
            Constraint::Triangle(c) => &c.indices,
            Constraint::Tetrahedron(c) => &c.indices,
        }
    }

    /// The particle used to assign this constraint to a spatial partition.
    #[inline]
    pub fn primary_particle(&self) -> usize {
        self.particles()[0]
    }

    /// Project the constraint, adding corrections for its own particles into `corrections`.
    ///
    /// `positions` is treated as an immutable snapshot; nothing outside
    /// `self.particles()` is written.
    #[inline]
    pub fn solve(&self, positions: &[Vec3], inverse_masses: &[f32], corrections: &mut [Vec3]) {
        match self {
            Constraint::Distance(c) => c.solve(positions, inverse_masses, corrections),
            Constraint::Bending(c) => c.solve(positions, inverse_masses, corrections),
            Constraint::Triangle(c) => c.solve(positions, inverse_masses, corrections),
            Constraint::Tetrahedron(c) => c.solve(positions, inverse_masses, corrections),
        }
    }
}

/// Apply `Δx_i = -k (C / Σ_j w_j |∇_j|²) w_i ∇_i` for an energy-style constraint.
///
/// Shared by the constraints whose value is an energy rather than a signed distance.
/// Does nothing if the weighted gradient norm is within [`EPSILON`] of zero.
pub(crate) fn project_energy<const N: usize>(
    indices: &[usize; N],
    energy: f32,
    gradients: &[Vec3; N],
    inverse_masses: &[f32],
    stiffness: f32,
    corrections: &mut [Vec3],
) {
    let mut sum_norm_grad = 0.0;
    for (&idx, grad) in indices.iter().zip(gradients) {
        sum_norm_grad += inverse_masses[idx] * grad.mag_sq();
    }
    if !(sum_norm_grad.abs() > EPSILON) || !energy.is_finite() {
        return;
    }

    let s = energy / sum_norm_grad;
    for (&idx, grad) in indices.iter().zip(gradients) {
        let w = inverse_masses[idx];
        if w != 0.0 {
            corrections[idx] += -stiffness * s * w * *grad;
        }
    }
}

//
// Distance
//

/// Keeps two particles at a fixed distance from each other.
#[derive(Clone, Debug)]
pub struct DistanceConstraint {
    /// Sorted so that the lower index comes first.
    indices: [usize; 2],
    rest_length: f32,
    stiffness: f32,
}

impl DistanceConstraint {
    pub fn new(positions: &[Vec3], i0: usize, i1: usize, stiffness: f32) -> Option<Self> {
        if i0 == i1 {
            return None;
        }
        let rest_length = (positions[i1] - positions[i0]).mag();
        if rest_length <= EPSILON {
            return None;
        }
        Some(Self::with_rest_length(i0, i1, rest_length, stiffness))
    }

    /// Create a distance constraint with an explicit rest length
    /// instead of measuring the current one.
    pub fn with_rest_length(i0: usize, i1: usize, rest_length: f32, stiffness: f32) -> Self {
        Self {
            indices: [i0.min(i1), i0.max(i1)],
            rest_length,
            stiffness: stiffness.clamp(0.0, 1.0),
        }
    }

    #[inline]
    pub fn rest_length(&self) -> f32 {
        self.rest_length
    }

    fn solve(&self, positions: &[Vec3], inverse_masses: &[f32], corrections: &mut [Vec3]) {
        let [i0, i1] = self.indices;
        let delta = positions[i1] - positions[i0];
        let distance = delta.mag();
        // exactly at rest, nothing to do
        if distance == self.rest_length {
            return;
        }

        let w0 = inverse_masses[i0];
        let w1 = inverse_masses[i1];
        let w_sum = w0 + w1;
        if w_sum <= EPSILON || distance <= EPSILON {
            return;
        }

        // ∇_0 C = -n, ∇_1 C = n, both unit length
        let n = delta / distance;
        let lambda = -(distance - self.rest_length) / w_sum;
        let step = self.stiffness * lambda * n;
        if w0 != 0.0 {
            corrections[i0] -= w0 * step;
        }
        if w1 != 0.0 {
            corrections[i1] += w1 * step;
        }
    }
}

impl From<DistanceConstraint> for Constraint {
    fn from(c: DistanceConstraint) -> Self {
        Constraint::Distance(c)
    }
}
