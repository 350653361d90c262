//! Finite element strain constraints for triangles (membranes) and tetrahedra (volumes).
//!
//! Both follow the same pattern: the rest shape is captured as the inverse of the
//! rest-state edge matrix, the deformation gradient `F` maps rest edges to current edges,
//! and the energy is the strain energy of the Green strain `½(FᵀF - I)` under a linear
//! elasticity tensor. The energy is then projected like any other PBD constraint.

use super::project_energy;
use crate::math::{self as m, Mat2, Mat3, Vec2, Vec3, EPSILON};

#[cfg(feature = "serde-types")]
use serde::{Deserialize, Serialize};

/// Orthotropic elasticity parameters of a membrane material.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-types", serde(default))]
pub struct MaterialParams {
    pub youngs_modulus_x: f32,
    pub youngs_modulus_y: f32,
    pub youngs_modulus_shear: f32,
    pub poisson_ratio_xy: f32,
    pub poisson_ratio_yx: f32,
    /// Fraction of the full projection applied per iteration, in `[0, 1]`.
    pub stiffness: f32,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            youngs_modulus_x: 1.0,
            youngs_modulus_y: 1.0,
            youngs_modulus_shear: 1.0,
            poisson_ratio_xy: 0.3,
            poisson_ratio_yx: 0.3,
            stiffness: 1.0,
        }
    }
}

impl MaterialParams {
    /// `1 - ν_xy ν_yx`, the shared denominator of the elasticity tensor.
    #[inline]
    pub fn poisson_denominator(&self) -> f32 {
        1.0 - self.poisson_ratio_xy * self.poisson_ratio_yx
    }
}

/// Isotropic elasticity parameters of a volumetric material.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-types", serde(default))]
pub struct VolumeMaterialParams {
    pub youngs_modulus: f32,
    /// Must be in `(-1, 0.5)`.
    pub poisson_ratio: f32,
    pub stiffness: f32,
}

impl Default for VolumeMaterialParams {
    fn default() -> Self {
        Self {
            youngs_modulus: 1.0,
            poisson_ratio: 0.3,
            stiffness: 1.0,
        }
    }
}

impl VolumeMaterialParams {
    /// Lamé parameters `(μ, λ)`.
    pub fn lame(&self) -> (f32, f32) {
        let e = self.youngs_modulus;
        let nu = self.poisson_ratio;
        let mu = e / (2.0 * (1.0 + nu));
        let lambda = e * nu / ((1.0 + nu) * (1.0 - 2.0 * nu));
        (mu, lambda)
    }
}

//
// Triangle
//

/// Coefficients of the orthotropic plane-stress elasticity tensor.
/// The xy-shear coupling terms are zero and not stored.
#[derive(Clone, Copy, Debug)]
struct Orthotropic {
    c00: f32,
    c01: f32,
    c10: f32,
    c11: f32,
    c22: f32,
}

impl Orthotropic {
    fn new(mat: &MaterialParams) -> Option<Self> {
        let denom = mat.poisson_denominator();
        if denom.abs() <= EPSILON {
            return None;
        }
        Some(Self {
            c00: mat.youngs_modulus_x / denom,
            c01: mat.youngs_modulus_x * mat.poisson_ratio_yx / denom,
            c11: mat.youngs_modulus_y / denom,
            c10: mat.youngs_modulus_y * mat.poisson_ratio_xy / denom,
            c22: mat.youngs_modulus_shear,
        })
    }
}

/// Strain constraint on a triangle of cloth.
#[derive(Clone, Debug)]
pub struct TriangleConstraint {
    pub(super) indices: [usize; 3],
    area: f32,
    inv_rest_mat: Mat2,
    elasticity: Orthotropic,
    stiffness: f32,
}

impl TriangleConstraint {
    /// Returns `None` if the rest triangle is degenerate or the material is singular.
    pub fn new(positions: &[Vec3], indices: [usize; 3], material: &MaterialParams) -> Option<Self> {
        let [p0, p1, p2] = indices.map(|i| positions[i]);

        let normal = (p1 - p0).cross(p2 - p0);
        let area = 0.5 * normal.mag();
        if area <= EPSILON {
            return None;
        }

        // orthonormal frame in the plane of the triangle
        let axis_01 = (p1 - p0).normalized();
        let axis_perp = normal.cross(axis_01).normalized();
        let to_plane = |p: Vec3| Vec2::new(p.dot(axis_perp), p.dot(axis_01));
        let [t0, t1, t2] = [p0, p1, p2].map(to_plane);

        let (col0, col1) = (t0 - t2, t1 - t2);
        let det = col0.x * col1.y - col1.x * col0.y;
        if det.abs() <= EPSILON {
            return None;
        }
        let inv_rest_mat = Mat2::new(
            Vec2::new(col1.y, -col0.y) / det,
            Vec2::new(-col1.x, col0.x) / det,
        );

        Some(Self {
            indices,
            area,
            inv_rest_mat,
            elasticity: Orthotropic::new(material)?,
            stiffness: material.stiffness.clamp(0.0, 1.0),
        })
    }

    #[inline]
    pub fn rest_area(&self) -> f32 {
        self.area
    }

    pub(super) fn solve(
        &self,
        positions: &[Vec3],
        inverse_masses: &[f32],
        corrections: &mut [Vec3],
    ) {
        let [p0, p1, p2] = self.indices.map(|i| positions[i]);
        let inv = &self.inv_rest_mat;
        let c = &self.elasticity;

        // deformation gradient, a 3×2 matrix stored as two columns
        let p13 = p0 - p2;
        let p23 = p1 - p2;
        let f0 = p13 * inv.cols[0].x + p23 * inv.cols[0].y;
        let f1 = p13 * inv.cols[1].x + p23 * inv.cols[1].y;

        // Green strain
        let e00 = 0.5 * (f0.dot(f0) - 1.0);
        let e11 = 0.5 * (f1.dot(f1) - 1.0);
        let e01 = 0.5 * f0.dot(f1);

        let s00 = c.c00 * e00 + c.c01 * e11;
        let s11 = c.c10 * e00 + c.c11 * e11;
        let s01 = c.c22 * e01;

        let psi = 0.5 * (e00 * s00 + 2.0 * e01 * s01 + e11 * s11);
        let energy = self.area * psi;

        // first Piola-Kirchhoff stress F·S, then the gradient area·P·R⁻ᵀ
        let pk0 = f0 * s00 + f1 * s01;
        let pk1 = f0 * s01 + f1 * s11;
        let g0 = self.area * (pk0 * inv.cols[0].x + pk1 * inv.cols[1].x);
        let g1 = self.area * (pk0 * inv.cols[0].y + pk1 * inv.cols[1].y);
        let gradients = [g0, g1, -g0 - g1];

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

//
// Tetrahedron
//

/// St. Venant-Kirchhoff strain constraint on a tetrahedron of a soft volume.
#[derive(Clone, Debug)]
pub struct TetrahedronConstraint {
    pub(super) indices: [usize; 4],
    rest_volume: f32,
    inv_rest_mat: Mat3,
    mu: f32,
    lambda: f32,
    stiffness: f32,
}

impl TetrahedronConstraint {
    /// Returns `None` if the rest tetrahedron is flat or the material is singular.
    pub fn new(
        positions: &[Vec3],
        indices: [usize; 4],
        material: &VolumeMaterialParams,
    ) -> Option<Self> {
        let [p0, p1, p2, p3] = indices.map(|i| positions[i]);
        let rest_mat = Mat3::new(p0 - p3, p1 - p3, p2 - p3);
        let det = rest_mat.determinant();
        if det.abs() <= EPSILON {
            return None;
        }

        let (mu, lambda) = material.lame();
        if !mu.is_finite() || !lambda.is_finite() {
            return None;
        }

        Some(Self {
            indices,
            rest_volume: det.abs() / 6.0,
            inv_rest_mat: rest_mat.inversed(),
            mu,
            lambda,
            stiffness: material.stiffness.clamp(0.0, 1.0),
        })
    }

    #[inline]
    pub fn rest_volume(&self) -> f32 {
        self.rest_volume
    }

    pub(super) fn solve(
        &self,
        positions: &[Vec3],
        inverse_masses: &[f32],
        corrections: &mut [Vec3],
    ) {
        let [p0, p1, p2, p3] = self.indices.map(|i| positions[i]);
        let edges = Mat3::new(p0 - p3, p1 - p3, p2 - p3);
        let f = edges * self.inv_rest_mat;

        let ftf = f.transposed() * f;
        let strain = Mat3::new(
            0.5 * (ftf.cols[0] - Vec3::unit_x()),
            0.5 * (ftf.cols[1] - Vec3::unit_y()),
            0.5 * (ftf.cols[2] - Vec3::unit_z()),
        );
        let tr = m::trace(&strain);
        let stress_col = |i: usize| 2.0 * self.mu * strain.cols[i] + self.lambda * tr * m::unit_axis(i);
        let stress = Mat3::new(stress_col(0), stress_col(1), stress_col(2));

        let psi = 0.5 * m::double_dot(&strain, &stress);
        let energy = self.rest_volume * psi;

        let piola = f * stress;
        let h = piola * self.inv_rest_mat.transposed();
        let g0 = self.rest_volume * h.cols[0];
        let g1 = self.rest_volume * h.cols[1];
        let g2 = self.rest_volume * h.cols[2];
        let gradients = [g0, g1, g2, -g0 - g1 - g2];

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
