//! Broad-phase overlap detection between the quads of a cloth mesh
//! and an optional positional response.

use crate::math::{self as m, Vec3};

pub mod bvh;
pub use bvh::Bvh;

pub mod grid;
pub use grid::LeafGrid;

/// An axis-aligned bounding box stored as center and half extents.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub center: Vec3,
    pub half_extents: Vec3,
}

impl Aabb {
    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self {
            center: (min + max) * 0.5,
            half_extents: (max - min) * 0.5,
        }
    }

    /// The tightest box containing every given point.
    ///
    /// Returns a zero-sized box at the origin for an empty iterator.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut points = points.into_iter();
        let first = match points.next() {
            Some(p) => p,
            None => return Self::default(),
        };
        let (min, max) = points.fold((first, first), |(min, max), p| {
            (min.min_by_component(p), max.max_by_component(p))
        });
        Self::from_min_max(min, max)
    }

    #[inline]
    pub fn min(&self) -> Vec3 {
        self.center - self.half_extents
    }

    #[inline]
    pub fn max(&self) -> Vec3 {
        self.center + self.half_extents
    }

    /// The smallest box containing both boxes.
    pub fn union(&self, other: &Self) -> Self {
        Self::from_min_max(
            self.min().min_by_component(other.min()),
            self.max().max_by_component(other.max()),
        )
    }

    /// Boxes overlap unless they are separated along at least one axis.
    /// Touching boxes count as overlapping.
    pub fn overlaps(&self, other: &Self) -> bool {
        let dist = self.center - other.center;
        let reach = self.half_extents + other.half_extents;
        dist.x.abs() <= reach.x && dist.y.abs() <= reach.y && dist.z.abs() <= reach.z
    }

    /// Depth of the overlap along each axis. Negative components mean separation.
    pub fn penetration(&self, other: &Self) -> Vec3 {
        let dist = self.center - other.center;
        self.half_extents + other.half_extents - dist.abs()
    }

    pub fn expanded(&self, margin: f32) -> Self {
        Self {
            center: self.center,
            half_extents: self.half_extents + Vec3::broadcast(margin),
        }
    }
}

/// What to do with overlapping pairs of leaf quads found during a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum CollisionPolicy {
    /// Detect nothing, change nothing.
    #[default]
    Ignore,
    /// Move overlapping quads that share no particles apart along the axis of least penetration.
    PushApart,
}

/// Push the particles of overlapping, non-adjacent quads apart.
///
/// Each pair is separated along its axis of minimum penetration.
/// The movable side of a pair takes the whole separation if the other side is fully pinned,
/// otherwise each side takes half. Pinned particles never move.
/// Changes are applied to `displacement` and `candidates` stays `committed + displacement`.
pub fn push_apart(
    bvh: &Bvh,
    pairs: &[(usize, usize)],
    committed: &[Vec3],
    inverse_masses: &[f32],
    candidates: &mut [Vec3],
    displacement: &mut [Vec3],
) {
    let _span = tracy_span!("push apart", "push_apart");

    for &(a, b) in pairs {
        let quad_a = bvh.leaf_particles(a);
        let quad_b = bvh.leaf_particles(b);
        if quad_a.iter().any(|p| quad_b.contains(p)) {
            continue;
        }

        let box_a = bvh.aabb(a);
        let box_b = bvh.aabb(b);
        let pen = box_a.penetration(&box_b);
        let axis = m::min_axis(pen);
        let depth = m::axis(pen, axis);
        if !(depth > 0.0) {
            continue;
        }
        let sign = if m::axis(box_b.center, axis) >= m::axis(box_a.center, axis) {
            1.0
        } else {
            -1.0
        };

        let movable_a = quad_a.iter().any(|&p| inverse_masses[p] != 0.0);
        let movable_b = quad_b.iter().any(|&p| inverse_masses[p] != 0.0);
        let (share_a, share_b) = match (movable_a, movable_b) {
            (true, true) => (0.5, 0.5),
            (true, false) => (1.0, 0.0),
            (false, true) => (0.0, 1.0),
            (false, false) => continue,
        };

        let dir = m::unit_axis(axis) * (sign * depth);
        for (quad, offset) in [(quad_a, dir * -share_a), (quad_b, dir * share_b)] {
            for p in quad {
                if inverse_masses[p] != 0.0 {
                    displacement[p] += offset;
                    candidates[p] = committed[p] + displacement[p];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::izip;

    #[test]
    fn aabb_from_points_is_tight() {
        let pts = [
            Vec3::new(1.0, -2.0, 0.5),
            Vec3::new(-3.0, 4.0, 0.0),
            Vec3::new(0.0, 0.0, 7.0),
            Vec3::new(2.0, 1.0, -1.0),
        ];
        let aabb = Aabb::from_points(pts);
        assert_eq!(aabb.min(), Vec3::new(-3.0, -2.0, -1.0));
        assert_eq!(aabb.max(), Vec3::new(2.0, 4.0, 7.0));
    }

    #[test]
    fn union_covers_both() {
        let a = Aabb::from_min_max(Vec3::zero(), Vec3::one());
        let b = Aabb::from_min_max(Vec3::new(2.0, -1.0, 0.5), Vec3::new(3.0, 0.5, 0.75));
        let u = a.union(&b);
        assert_eq!(u.min(), Vec3::new(0.0, -1.0, 0.0));
        assert_eq!(u.max(), Vec3::new(3.0, 1.0, 1.0));
        assert_eq!(u.center, Vec3::new(1.5, 0.0, 0.5));
    }

    #[test]
    fn separated_on_a_single_axis_means_no_overlap() {
        let a = Aabb::from_min_max(Vec3::zero(), Vec3::one());
        // overlapping in x and y, separated in z
        let b = Aabb::from_min_max(Vec3::new(0.5, 0.5, 2.0), Vec3::new(1.5, 1.5, 3.0));
        assert!(!a.overlaps(&b));
        let c = Aabb::from_min_max(Vec3::new(0.5, 0.5, 0.5), Vec3::new(1.5, 1.5, 3.0));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&a));
        // touching faces
        let d = Aabb::from_min_max(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        assert!(a.overlaps(&d));
    }

    #[test]
    fn default_policy_ignores() {
        assert_eq!(CollisionPolicy::default(), CollisionPolicy::Ignore);
    }

    /// Two tilted unit quads stacked in y whose boxes overlap by 0.1.
    /// Box A spans y ∈ [-0.2, 0.2], box B spans y ∈ [0.1, 0.4].
    fn stacked_quads() -> Vec<Vec3> {
        vec![
            Vec3::new(0.0, -0.2, 0.0),
            Vec3::new(1.0, -0.2, 0.0),
            Vec3::new(1.0, 0.2, 1.0),
            Vec3::new(0.0, 0.2, 1.0),
            Vec3::new(0.0, 0.1, 0.0),
            Vec3::new(1.0, 0.1, 0.0),
            Vec3::new(1.0, 0.4, 1.0),
            Vec3::new(0.0, 0.4, 1.0),
        ]
    }

    struct PushResult {
        committed: Vec<Vec3>,
        candidates: Vec<Vec3>,
        displacement: Vec<Vec3>,
    }

    fn run_push_apart(quads: Vec<[usize; 4]>, inverse_masses: &[f32]) -> PushResult {
        let committed = stacked_quads();
        let mut candidates = committed.clone();
        let mut displacement = vec![Vec3::zero(); committed.len()];
        let bvh = Bvh::new(quads, 2, &candidates);
        assert!(bvh.aabb(0).overlaps(&bvh.aabb(1)));

        push_apart(
            &bvh,
            &[(0, 1)],
            &committed,
            inverse_masses,
            &mut candidates,
            &mut displacement,
        );
        PushResult {
            committed,
            candidates,
            displacement,
        }
    }

    fn boxes(candidates: &[Vec3]) -> (Aabb, Aabb) {
        (
            Aabb::from_points(candidates[0..4].iter().copied()),
            Aabb::from_points(candidates[4..8].iter().copied()),
        )
    }

    #[test]
    fn push_apart_separates_overlapping_quads() {
        let res = run_push_apart(vec![[0, 1, 2, 3], [4, 5, 6, 7]], &[1.0; 8]);

        let (a, b) = boxes(&res.candidates);
        // least penetration is along y, which now just touches
        assert!(a.penetration(&b).y <= 1e-6, "{:?}", a.penetration(&b));
        assert!((a.max().y - 0.15).abs() < 1e-6);
        assert!((b.min().y - 0.15).abs() < 1e-6);
        // x and z are untouched
        for (cand, base) in res.candidates.iter().zip(&res.committed) {
            assert_eq!(cand.x, base.x);
            assert_eq!(cand.z, base.z);
        }
        for (cand, base, disp) in izip!(&res.candidates, &res.committed, &res.displacement) {
            assert_eq!(*cand, *base + *disp);
        }
    }

    #[test]
    fn push_apart_moves_only_the_free_side() {
        let mut inverse_masses = [1.0; 8];
        inverse_masses[..4].fill(0.0);
        let res = run_push_apart(vec![[0, 1, 2, 3], [4, 5, 6, 7]], &inverse_masses);

        assert_eq!(&res.candidates[..4], &res.committed[..4]);
        assert!(res.displacement[..4].iter().all(|d| *d == Vec3::zero()));
        // the free quad takes the whole 0.1 of separation
        for d in &res.displacement[4..] {
            assert!((d.y - 0.1).abs() < 1e-6, "{d:?}");
        }
        let (a, b) = boxes(&res.candidates);
        assert!(a.penetration(&b).y <= 1e-6);
    }

    #[test]
    fn push_apart_skips_quads_sharing_a_particle() {
        // particle 3 is shared, particle 4 is unused
        let res = run_push_apart(vec![[0, 1, 2, 3], [3, 5, 6, 7]], &[1.0; 8]);
        assert_eq!(res.candidates, res.committed);
        assert!(res.displacement.iter().all(|d| *d == Vec3::zero()));
    }
}
