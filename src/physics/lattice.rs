//! Initial particle layouts and the constraints connecting them.

use super::{
    check,
    constraint::{Constraint, DistanceConstraint, VolumeMaterialParams},
    is_positive, ConfigError, SimulationParams,
};
use crate::math::Vec3;

use std::collections::BTreeMap;

#[cfg(feature = "serde-types")]
use serde::{Deserialize, Serialize};

/// Everything needed to start a simulation: particles, topology and constraints.
#[derive(Clone, Debug, Default)]
pub struct Lattice {
    pub positions: Vec<Vec3>,
    pub inverse_masses: Vec<f32>,
    /// Surface triangles for rendering.
    pub triangles: Vec<[usize; 3]>,
    pub constraints: Vec<Constraint>,
    /// Surface quads laid out row-major with `quad_columns` per row.
    /// Empty if the lattice has no quad surface to collide.
    pub quads: Vec<[usize; 4]>,
    pub quad_columns: usize,
}

impl Lattice {
    /// A square sheet of cloth in the plane `y = 1`, hanging from two corners of its first row.
    ///
    /// Particles are laid out row-major as `x * resolution + z`.
    pub fn cloth(params: &SimulationParams) -> Self {
        let res = params.resolution;
        let spacing = params.size / res as f32;

        let positions: Vec<Vec3> = (0..res)
            .flat_map(|x| (0..res).map(move |z| Vec3::new(x as f32 * spacing, 1.0, z as f32 * spacing)))
            .collect();

        let mut inverse_masses = vec![1.0; positions.len()];
        if res > 0 {
            inverse_masses[0] = 0.0;
            inverse_masses[(res - 1) * res] = 0.0;
        }

        let cells = res.saturating_sub(1);
        let mut triangles = Vec::with_capacity(2 * cells * cells);
        let mut quads = Vec::with_capacity(cells * cells);
        for i in 0..cells {
            for j in 0..cells {
                let p00 = i * res + j;
                let p01 = p00 + 1;
                let p10 = p00 + res;
                let p11 = p10 + 1;
                // alternate the diagonal between neighbouring quads
                if (i + j) % 2 == 0 {
                    triangles.push([p00, p01, p10]);
                    triangles.push([p11, p10, p01]);
                } else {
                    triangles.push([p00, p01, p11]);
                    triangles.push([p11, p10, p00]);
                }
                quads.push([p00, p01, p11, p10]);
            }
        }

        let mut builder = ConstraintBuilder::new(&positions);
        if params.use_fem {
            for tri in &triangles {
                builder.push(Constraint::triangle(&positions, *tri, &params.material), "triangle");
            }
        } else {
            let k = params.stretch_stiffness;
            // structural
            for i in 0..res {
                for j in 0..cells {
                    builder.distance(i * res + j, i * res + j + 1, k);
                    builder.distance(j * res + i, (j + 1) * res + i, k);
                }
            }
            // shear
            for i in 0..cells {
                for j in 0..cells {
                    let p00 = i * res + j;
                    builder.distance(p00, p00 + res + 1, k);
                    builder.distance(p00 + 1, p00 + res, k);
                }
            }
        }
        if params.bending_stiffness > 0.0 {
            for hinge in hinges(&triangles) {
                builder.push(
                    Constraint::bending(&positions, hinge, params.bending_stiffness),
                    "bending",
                );
            }
        }
        let constraints = builder.finish();

        log::info!(
            "built {res}×{res} cloth lattice: {} particles, {} triangles, {} constraints",
            positions.len(),
            triangles.len(),
            constraints.len()
        );

        Self {
            positions,
            inverse_masses,
            triangles,
            constraints,
            quads,
            quad_columns: cells,
        }
    }

    /// A solid block of tetrahedra. See [`BlockParams`].
    pub fn block(params: &BlockParams) -> Result<Self, ConfigError> {
        params.validate()?;
        let [nx, ny, nz] = params.dims;
        let idx = |x: usize, y: usize, z: usize| (x * ny + y) * nz + z;

        let mut positions = Vec::with_capacity(nx * ny * nz);
        for x in 0..nx {
            for y in 0..ny {
                for z in 0..nz {
                    positions.push(params.origin + Vec3::new(x as f32, y as f32, z as f32) * params.spacing);
                }
            }
        }

        let mut inverse_masses = vec![1.0; positions.len()];
        if params.pin_first_face {
            for y in 0..ny {
                for z in 0..nz {
                    inverse_masses[idx(0, y, z)] = 0.0;
                }
            }
        }

        let mut tets = Vec::new();
        for x in 0..nx.saturating_sub(1) {
            for y in 0..ny.saturating_sub(1) {
                for z in 0..nz.saturating_sub(1) {
                    // corner k has offsets (k & 1, (k >> 1) & 1, (k >> 2) & 1)
                    let c = [0, 1, 2, 3, 4, 5, 6, 7]
                        .map(|k: usize| idx(x + (k & 1), y + ((k >> 1) & 1), z + ((k >> 2) & 1)));
                    // mirror every other cell so that neighbouring cells share face diagonals
                    let pattern = if (x + y + z) % 2 == 0 {
                        [[1, 2, 4, 7], [0, 1, 2, 4], [3, 1, 2, 7], [5, 1, 4, 7], [6, 2, 4, 7]]
                    } else {
                        [[0, 3, 5, 6], [1, 0, 3, 5], [2, 0, 3, 6], [4, 0, 5, 6], [7, 3, 5, 6]]
                    };
                    tets.extend(pattern.map(|t| t.map(|k| c[k])));
                }
            }
        }

        let mut builder = ConstraintBuilder::new(&positions);
        for tet in &tets {
            builder.push(
                Constraint::tetrahedron(&positions, *tet, &params.material),
                "tetrahedron",
            );
        }
        let constraints = builder.finish();
        let triangles = boundary_faces(&tets);

        log::info!(
            "built {nx}×{ny}×{nz} block lattice: {} particles, {} tetrahedra, {} constraints",
            positions.len(),
            tets.len(),
            constraints.len()
        );

        Ok(Self {
            positions,
            inverse_masses,
            triangles,
            constraints,
            quads: Vec::new(),
            quad_columns: 0,
        })
    }
}

/// Parameters for [`Lattice::block`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-types", serde(default))]
pub struct BlockParams {
    /// Number of particles along each axis.
    pub dims: [usize; 3],
    pub spacing: f32,
    pub origin: Vec3,
    pub material: VolumeMaterialParams,
    /// Pin every particle on the `x = 0` face.
    pub pin_first_face: bool,
}

impl BlockParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check(
            self.dims.iter().all(|&n| n >= 2),
            "dims",
            "every axis needs at least 2 particles",
        )?;
        check(is_positive(self.spacing), "spacing", "must be finite and positive")?;
        check(
            self.origin.x.is_finite() && self.origin.y.is_finite() && self.origin.z.is_finite(),
            "origin",
            "must be finite",
        )?;
        let mat = &self.material;
        check(
            is_positive(mat.youngs_modulus),
            "material.youngs_modulus",
            "must be finite and positive",
        )?;
        check(
            mat.poisson_ratio > -1.0 && mat.poisson_ratio < 0.5,
            "material.poisson_ratio",
            "must be in (-1, 0.5)",
        )?;
        check(
            (0.0..=1.0).contains(&mat.stiffness),
            "material.stiffness",
            "must be in [0, 1]",
        )?;
        Ok(())
    }
}

impl Default for BlockParams {
    fn default() -> Self {
        Self {
            dims: [4, 4, 4],
            spacing: 1.0,
            origin: Vec3::zero(),
            material: VolumeMaterialParams::default(),
            pin_first_face: true,
        }
    }
}

/// Collects constraints, dropping degenerate ones with a warning.
struct ConstraintBuilder<'a> {
    positions: &'a [Vec3],
    constraints: Vec<Constraint>,
    skipped: usize,
}

impl<'a> ConstraintBuilder<'a> {
    fn new(positions: &'a [Vec3]) -> Self {
        Self {
            positions,
            constraints: Vec::new(),
            skipped: 0,
        }
    }

    fn push(&mut self, constraint: Option<Constraint>, kind: &str) {
        match constraint {
            Some(c) => self.constraints.push(c),
            None => {
                log::warn!("skipping degenerate {kind} constraint");
                self.skipped += 1;
            }
        }
    }

    fn distance(&mut self, i0: usize, i1: usize, stiffness: f32) {
        let c = DistanceConstraint::new(self.positions, i0, i1, stiffness).map(Constraint::from);
        self.push(c, "distance");
    }

    fn finish(self) -> Vec<Constraint> {
        if self.skipped > 0 {
            log::warn!("{} degenerate constraints were skipped", self.skipped);
        }
        self.constraints
    }
}

/// Every interior edge shared by exactly two triangles, as `[edge start, edge end, wing, wing]`.
///
/// Edges are returned in ascending order of their sorted particle indices.
pub fn hinges(triangles: &[[usize; 3]]) -> Vec<[usize; 4]> {
    let mut edges: BTreeMap<(usize, usize), Vec<(usize, usize, usize)>> = BTreeMap::new();
    for tri in triangles {
        for k in 0..3 {
            let (a, b, opposite) = (tri[k], tri[(k + 1) % 3], tri[(k + 2) % 3]);
            edges
                .entry((a.min(b), a.max(b)))
                .or_default()
                .push((a, b, opposite));
        }
    }

    edges
        .into_values()
        .filter_map(|sides| match sides[..] {
            [(a, b, w0), (_, _, w1)] => Some([a, b, w0, w1]),
            _ => None,
        })
        .collect()
}

/// Faces of the tetrahedra that aren't shared with another tetrahedron.
fn boundary_faces(tets: &[[usize; 4]]) -> Vec<[usize; 3]> {
    const FACES: [[usize; 3]; 4] = [[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]];

    let mut faces: BTreeMap<[usize; 3], (usize, [usize; 3])> = BTreeMap::new();
    for tet in tets {
        for face in FACES {
            let tri = face.map(|k| tet[k]);
            let mut key = tri;
            key.sort_unstable();
            faces.entry(key).or_insert((0, tri)).0 += 1;
        }
    }
    faces
        .into_values()
        .filter(|(count, _)| *count == 1)
        .map(|(_, tri)| tri)
        .collect()
}
