//! Level-wise BVH construction over Morton-sorted boxes.
//!
//! The tree is stored flat; children always sit at higher indices than
//! their parent, so internal AABBs can be filled in a single reverse pass
//! after the topology is known. Splits follow the highest differing Morton
//! bit; a node whose codes are all equal becomes a leaf.

use rayon::prelude::*;

use crate::aabb::Aabb;
use crate::morton::DISABLED_CODE;

/// Nodes per level below which split scans run serially.
const LEVEL_PAR_THRESHOLD: usize = 128;

/// One BVH node over a contiguous range of Morton-sorted leaf positions.
#[derive(Debug, Clone, Copy)]
pub struct BvhNode {
    /// Sorted-particle range `[begin, end)`.
    pub begin: u32,
    pub end: u32,
    /// Tree pointers; `-1` where absent.
    pub parent: i32,
    pub left: i32,
    pub right: i32,
    /// Node AABB: the union of the descendants' boxes.
    pub lb: [f32; 4],
    pub ub: [f32; 4],
    /// Number of nodes in this node's level.
    pub nn_level: u32,
    /// Split position chosen during construction; `-1` for leaves.
    pub split_idx: i32,
}

impl BvhNode {
    /// Leaves have no children.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.left < 0
    }

    /// Node box as an [`Aabb`].
    #[inline]
    pub fn aabb(&self) -> Aabb {
        Aabb {
            lb: self.lb,
            ub: self.ub,
        }
    }
}

/// A per-chunk BVH. The buffer is retained across supersteps.
#[derive(Debug, Default)]
pub struct BvhTree {
    pub nodes: Vec<BvhNode>,
    n_active: usize,
}

impl BvhTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-disabled particles indexed by the tree.
    pub fn n_active(&self) -> usize {
        self.n_active
    }

    /// Rebuilds the tree from sorted codes and boxes.
    pub fn build(&mut self, srt_mcodes: &[u64], srt_aabbs: &[Aabb]) {
        self.nodes.clear();
        self.n_active = srt_mcodes.partition_point(|&c| c != DISABLED_CODE);
        let n_active = self.n_active;
        if n_active == 0 {
            return;
        }

        self.nodes.push(BvhNode {
            begin: 0,
            end: n_active as u32,
            parent: -1,
            left: -1,
            right: -1,
            lb: Aabb::EMPTY.lb,
            ub: Aabb::EMPTY.ub,
            nn_level: 1,
            split_idx: -1,
        });

        let mut level_start = 0_usize;
        let mut level_count = 1_usize;

        while level_count > 0 {
            let level = &self.nodes[level_start..level_start + level_count];

            // Split decision per node of the level: Some(split) or None
            // for a leaf. Parallel only when the level is wide enough.
            let decide = |node: &BvhNode| -> Option<usize> {
                let b = node.begin as usize;
                let e = node.end as usize;
                if e - b <= 1 {
                    return None;
                }
                let first = srt_mcodes[b];
                let last = srt_mcodes[e - 1];
                if first == last {
                    return None;
                }
                let bit = 63 - (first ^ last).leading_zeros();
                // First sorted position whose code has the bit set.
                let off = srt_mcodes[b..e].partition_point(|&c| (c >> bit) & 1 == 0);
                Some(b + off)
            };
            let splits: Vec<Option<usize>> = if level_count >= LEVEL_PAR_THRESHOLD {
                level.par_iter().map(decide).collect()
            } else {
                level.iter().map(decide).collect()
            };

            // Append children in level order.
            let next_start = self.nodes.len();
            for (off, split) in splits.iter().enumerate() {
                let idx = level_start + off;
                let Some(split) = *split else {
                    continue;
                };
                let (begin, end) = {
                    let n = &self.nodes[idx];
                    (n.begin, n.end)
                };
                let left = self.nodes.len() as i32;
                self.nodes[idx].split_idx = split as i32;
                self.nodes[idx].left = left;
                self.nodes[idx].right = left + 1;
                for (b, e) in [(begin, split as u32), (split as u32, end)] {
                    self.nodes.push(BvhNode {
                        begin: b,
                        end: e,
                        parent: idx as i32,
                        left: -1,
                        right: -1,
                        lb: Aabb::EMPTY.lb,
                        ub: Aabb::EMPTY.ub,
                        nn_level: 0,
                        split_idx: -1,
                    });
                }
            }

            let next_count = self.nodes.len() - next_start;
            for node in &mut self.nodes[next_start..] {
                node.nn_level = next_count as u32;
            }
            level_start = next_start;
            level_count = next_count;
        }

        // Bottom-up AABB fill: children always follow their parent.
        for idx in (0..self.nodes.len()).rev() {
            let node = self.nodes[idx];
            let bb = if node.is_leaf() {
                srt_aabbs[node.begin as usize..node.end as usize]
                    .iter()
                    .fold(Aabb::EMPTY, |acc, b| acc.union(b))
            } else {
                self.nodes[node.left as usize]
                    .aabb()
                    .union(&self.nodes[node.right as usize].aabb())
            };
            self.nodes[idx].lb = bb.lb;
            self.nodes[idx].ub = bb.ub;
        }
    }
}
