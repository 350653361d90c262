//! Uniform grid used to find pairs of overlapping leaves of a [`Bvh`].

use super::{Aabb, Bvh};
use crate::math::{self as m, Vec3};

/// The grid is never subdivided further than this many levels.
pub const MAX_LEVEL: usize = 5;

/// A uniform 3D grid over fixed bounds, with `2^level` cells along each axis.
///
/// The level is the depth of the hierarchy it was built for, capped at [`MAX_LEVEL`],
/// mirroring an octree subdivided down to the leaves.
/// Leaves outside the bounds are clamped into the border cells,
/// so they are still found, only less efficiently.
#[derive(Clone, Debug)]
pub struct LeafGrid {
    bounds: Aabb,
    cells_per_axis: usize,
    cell_size: Vec3,
    cells: Vec<Vec<usize>>,
    /// Cell coordinate range of each leaf from the last bucketing.
    leaf_ranges: Vec<([usize; 3], [usize; 3])>,
}

impl LeafGrid {
    pub fn new(bounds: Aabb, max_depth: usize) -> Self {
        let cells_per_axis = 1 << max_depth.min(MAX_LEVEL);
        let size = bounds.half_extents * 2.0;
        Self {
            bounds,
            cells_per_axis,
            cell_size: size / cells_per_axis as f32,
            cells: vec![Vec::new(); cells_per_axis * cells_per_axis * cells_per_axis],
            leaf_ranges: Vec::new(),
        }
    }

    /// A grid sized for the hierarchy's current root box grown by `margin` on every side.
    pub fn for_bvh(bvh: &Bvh, margin: f32) -> Self {
        let bounds = bvh
            .root()
            .map_or_else(Aabb::default, |root| bvh.aabb(root))
            .expanded(margin);
        Self::new(bounds, bvh.max_depth())
    }

    #[inline]
    pub fn cells_per_axis(&self) -> usize {
        self.cells_per_axis
    }

    #[inline]
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// All pairs of distinct leaves whose boxes overlap, as `(lower, higher)` leaf indices in
    /// ascending order. Each pair appears exactly once.
    pub fn overlapping_pairs(&mut self, bvh: &Bvh) -> Vec<(usize, usize)> {
        let _span = tracy_span!("leaf grid pairs", "overlapping_pairs");

        for cell in &mut self.cells {
            cell.clear();
        }
        self.leaf_ranges.clear();

        for leaf in 0..bvh.leaf_count() {
            let aabb = bvh.aabb(leaf);
            let lo = self.cell_coords(aabb.min());
            let hi = self.cell_coords(aabb.max());
            self.leaf_ranges.push((lo, hi));
            for x in lo[0]..=hi[0] {
                for y in lo[1]..=hi[1] {
                    for z in lo[2]..=hi[2] {
                        let idx = self.cell_index([x, y, z]);
                        self.cells[idx].push(leaf);
                    }
                }
            }
        }

        let mut pairs = Vec::new();
        let n = self.cells_per_axis;
        for x in 0..n {
            for y in 0..n {
                for z in 0..n {
                    let cell = &self.cells[self.cell_index([x, y, z])];
                    for (i, &a) in cell.iter().enumerate() {
                        for &b in &cell[i + 1..] {
                            // only report a pair in the first cell both leaves share
                            let (lo_a, _) = self.leaf_ranges[a];
                            let (lo_b, _) = self.leaf_ranges[b];
                            let first = [
                                lo_a[0].max(lo_b[0]),
                                lo_a[1].max(lo_b[1]),
                                lo_a[2].max(lo_b[2]),
                            ];
                            if first == [x, y, z] && bvh.aabb(a).overlaps(&bvh.aabb(b)) {
                                pairs.push((a, b));
                            }
                        }
                    }
                }
            }
        }

        pairs.sort_unstable();
        pairs
    }

    fn cell_coords(&self, point: Vec3) -> [usize; 3] {
        let min = self.bounds.min();
        let last = self.cells_per_axis - 1;
        let mut out = [0; 3];
        for (axis, coord) in out.iter_mut().enumerate() {
            let size = m::axis(self.cell_size, axis);
            if size <= 0.0 {
                continue;
            }
            let t = ((m::axis(point, axis) - m::axis(min, axis)) / size).floor();
            // negative and NaN both land in the first cell
            *coord = if t > 0.0 { (t as usize).min(last) } else { 0 };
        }
        out
    }

    #[inline]
    fn cell_index(&self, [x, y, z]: [usize; 3]) -> usize {
        (x * self.cells_per_axis + y) * self.cells_per_axis + z
    }
}
