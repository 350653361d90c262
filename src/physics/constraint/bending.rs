use super::project_energy;
use crate::math::{self as m, Vec3, EPSILON};

/// Isometric bending energy over a hinge of two triangles.
///
/// The rest state is baked into a 4×4 matrix `Q` built from the cotangents of the
/// angles next to the shared edge, so the energy `½ Σ_ij Q_ij (x_i · x_j)`
/// is zero for the rest configuration of a flat mesh and the gradient for particle `i`
/// is simply `Σ_j Q_ij x_j`.
#[derive(Clone, Debug)]
pub struct BendingConstraint {
    /// `[edge start, edge end, wing 0, wing 1]`
    pub(super) indices: [usize; 4],
    q: [[f32; 4]; 4],
    stiffness: f32,
}

impl BendingConstraint {
    pub fn new(positions: &[Vec3], indices: [usize; 4], stiffness: f32) -> Option<Self> {
        let x = indices.map(|i| positions[i]);

        let area0 = m::triangle_area(x[0], x[1], x[2]);
        let area1 = m::triangle_area(x[0], x[1], x[3]);
        if area0 + area1 <= EPSILON {
            return None;
        }

        let e0 = x[1] - x[0];
        let e1 = x[2] - x[0];
        let e2 = x[3] - x[0];
        let e3 = x[2] - x[1];
        let e4 = x[3] - x[1];

        let c01 = m::cot_between(e0, e1);
        let c02 = m::cot_between(e0, e2);
        let c03 = m::cot_between(-e0, e3);
        let c04 = m::cot_between(-e0, e4);

        let k = [c03 + c04, c01 + c02, -c01 - c03, -c02 - c04];
        let coef = -3.0 / (2.0 * (area0 + area1));

        let mut q = [[0.0; 4]; 4];
        for i in 0..4 {
            for j in 0..=i {
                q[i][j] = k[i] * k[j] * coef;
                q[j][i] = q[i][j];
            }
        }

        Some(Self {
            indices,
            q,
            stiffness: stiffness.clamp(0.0, 1.0),
        })
    }

    pub(super) fn solve(
        &self,
        positions: &[Vec3],
        inverse_masses: &[f32],
        corrections: &mut [Vec3],
    ) {
        let x = self.indices.map(|i| positions[i]);

        let mut energy = 0.0;
        let mut gradients = [Vec3::zero(); 4];
        for i in 0..4 {
            for j in 0..4 {
                energy += self.q[i][j] * x[i].dot(x[j]);
                gradients[i] += self.q[i][j] * x[j];
            }
        }
        energy *= 0.5;

        project_energy(
            &self.indices,
            energy,
            &gradients,
            inverse_masses,
            self.stiffness,
            corrections,
        );
    }
}
