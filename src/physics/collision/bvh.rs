//! A Bounding Volume Hierarchy over the quads of a regular mesh.
//!
//! The tree is built bottom-up once from the mesh topology,
//! merging each 2×2 block of nodes on one level into a parent on the next.
//! Node bounds are then refreshed every step with [`Bvh::refit`].

use super::Aabb;
use crate::math::Vec3;

//
// Internal types
//

#[derive(Clone, Copy, Debug)]
struct Node {
    aabb: Aabb,
    depth: usize,
    kind: NodeKind,
}

#[derive(Clone, Copy, Debug)]
enum NodeKind {
    Leaf,
    Branch { children: [usize; 4], count: usize },
}

//
// BVH itself
//

/// A quad tree of axis-aligned boxes over a grid of mesh quads.
///
/// Nodes live in a single array where all leaves come first, in the order of the quads given,
/// and every branch comes after all of its children.
/// Updating the nodes in array order therefore always sees fresh child boxes.
#[derive(Clone, Debug)]
pub struct Bvh {
    nodes: Vec<Node>,
    parents: Vec<Option<usize>>,
    quads: Vec<[usize; 4]>,
    max_depth: usize,
    /// Kept around so that queries don't need to allocate.
    shared_stack: Vec<usize>,
}

impl Bvh {
    /// Build a hierarchy over `quads`, laid out row-major with `columns` quads per row,
    /// and fit it to `positions`.
    ///
    /// Each quad lists its four particles as `[a, b, c, d]` going around the face.
    pub fn new(quads: Vec<[usize; 4]>, columns: usize, positions: &[Vec3]) -> Self {
        let leaf_count = quads.len();
        let mut nodes: Vec<Node> = (0..leaf_count)
            .map(|_| Node {
                aabb: Aabb::default(),
                depth: 0,
                kind: NodeKind::Leaf,
            })
            .collect();
        let mut parents: Vec<Option<usize>> = vec![None; leaf_count];

        if columns > 0 && leaf_count > 0 {
            let mut cols = columns;
            let mut rows = (leaf_count + columns - 1) / columns;
            let mut level: Vec<usize> = (0..leaf_count).collect();

            while level.len() > 1 {
                let at = |r: usize, c: usize| -> Option<usize> {
                    if r < rows && c < cols {
                        level.get(r * cols + c).copied()
                    } else {
                        None
                    }
                };
                let next_rows = (rows + 1) / 2;
                let next_cols = (cols + 1) / 2;
                let mut next_level = Vec::with_capacity(next_rows * next_cols);

                for r in 0..next_rows {
                    for c in 0..next_cols {
                        let (r0, c0) = (2 * r, 2 * c);
                        let Some(a) = at(r0, c0) else { continue };
                        let b = at(r0, c0 + 1);
                        let d = at(r0 + 1, c0);
                        let diag = b.and(d).and_then(|_| at(r0 + 1, c0 + 1));

                        let mut children = [a; 4];
                        let mut count = 1;
                        for child in [b, d, diag].into_iter().flatten() {
                            children[count] = child;
                            count += 1;
                        }

                        if count == 1 {
                            // no neighbours on this level, carry over as is
                            next_level.push(a);
                            continue;
                        }

                        let idx = nodes.len();
                        for &child in &children[..count] {
                            parents[child] = Some(idx);
                        }
                        nodes.push(Node {
                            aabb: Aabb::default(),
                            depth: 0,
                            kind: NodeKind::Branch { children, count },
                        });
                        parents.push(None);
                        next_level.push(idx);
                    }
                }

                level = next_level;
                rows = next_rows;
                cols = next_cols;
            }
        }

        // parents come after their children, so walking backwards assigns depths top-down
        let mut max_depth = 0;
        for idx in (0..nodes.len()).rev() {
            let depth = parents[idx].map_or(0, |p| nodes[p].depth + 1);
            nodes[idx].depth = depth;
            max_depth = max_depth.max(depth);
        }

        let mut bvh = Self {
            nodes,
            parents,
            quads,
            max_depth,
            shared_stack: Vec::new(),
        };
        bvh.refit(positions);
        bvh
    }

    /// Recompute every box from the current particle positions, leaves first.
    pub fn refit(&mut self, positions: &[Vec3]) {
        let _span = tracy_span!("bvh refit", "refit");
        let leaf_count = self.quads.len();

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            self.nodes[..leaf_count]
                .par_iter_mut()
                .zip(self.quads.par_iter())
                .for_each(|(node, quad)| node.aabb = quad_aabb(quad, positions));
        }
        #[cfg(not(feature = "parallel"))]
        for (node, quad) in self.nodes[..leaf_count].iter_mut().zip(&self.quads) {
            node.aabb = quad_aabb(quad, positions);
        }

        for idx in leaf_count..self.nodes.len() {
            self.refit_node(idx, positions);
        }
    }

    /// Recompute a single node from its quad or from its children's current boxes.
    fn refit_node(&mut self, idx: usize, positions: &[Vec3]) {
        self.nodes[idx].aabb = match self.nodes[idx].kind {
            NodeKind::Leaf => quad_aabb(&self.quads[idx], positions),
            NodeKind::Branch { children, count } => children[1..count]
                .iter()
                .fold(self.nodes[children[0]].aabb, |acc, &c| {
                    acc.union(&self.nodes[c].aabb)
                }),
        };
    }

    /// Index of the root node, or `None` if the tree is empty.
    #[inline]
    pub fn root(&self) -> Option<usize> {
        self.nodes.len().checked_sub(1)
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Leaves occupy node indices `0..leaf_count()`.
    #[inline]
    pub fn leaf_count(&self) -> usize {
        self.quads.len()
    }

    #[inline]
    pub fn is_leaf(&self, node: usize) -> bool {
        node < self.quads.len()
    }

    #[inline]
    pub fn aabb(&self, node: usize) -> Aabb {
        self.nodes[node].aabb
    }

    /// Distance from the root, which has depth 0.
    #[inline]
    pub fn depth(&self, node: usize) -> usize {
        self.nodes[node].depth
    }

    #[inline]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    #[inline]
    pub fn parent(&self, node: usize) -> Option<usize> {
        self.parents[node]
    }

    pub fn children(&self, node: usize) -> &[usize] {
        match &self.nodes[node].kind {
            NodeKind::Leaf => &[],
            NodeKind::Branch { children, count } => &children[..*count],
        }
    }

    /// The four particles of a leaf quad.
    #[inline]
    pub fn leaf_particles(&self, leaf: usize) -> [usize; 4] {
        self.quads[leaf]
    }

    /// Iterate over every leaf whose box overlaps the given box.
    pub fn test_aabb(&mut self, aabb: Aabb) -> AabbIter<'_> {
        self.shared_stack.clear();
        if let Some(root) = self.root() {
            self.shared_stack.push(root);
        }
        AabbIter {
            aabb,
            stack: &mut self.shared_stack,
            nodes: &self.nodes,
        }
    }
}

fn quad_aabb(quad: &[usize; 4], positions: &[Vec3]) -> Aabb {
    Aabb::from_points(quad.iter().map(|&p| positions[p]))
}

/// An iterator that yields every leaf that may intersect with a given AABB.
#[derive(Debug)]
pub struct AabbIter<'a> {
    aabb: Aabb,
    stack: &'a mut Vec<usize>,
    nodes: &'a [Node],
}

impl<'a> Iterator for AabbIter<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(idx) = self.stack.pop() {
            let node = &self.nodes[idx];
            if !node.aabb.overlaps(&self.aabb) {
                continue;
            }
            match node.kind {
                NodeKind::Leaf => return Some(idx),
                NodeKind::Branch { children, count } => {
                    // reversed so that children come out in index order
                    self.stack.extend(children[..count].iter().rev());
                }
            }
        }
        None
    }
}
