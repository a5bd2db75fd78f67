//! Broad-phase candidate enumeration.
//!
//! Every active particle traverses the chunk's BVH with an explicit stack
//! and collects overlapping particles from the leaves it reaches. A pair
//! is emitted exactly once, as `(i, j)` with `i < j` in original particle
//! indices, and only when both members are collision-active or both are
//! conjunction-active.

use std::sync::Mutex;

use rayon::prelude::*;

use kessler_types::Pool;

use crate::aabb::Aabb;
use crate::bvh::BvhTree;

/// Sorted positions per parallel task.
const POSITIONS_PER_TASK: usize = 256;

/// Thread-local broad-phase scratch: the traversal stack and the local
/// pair list, pooled across chunks.
#[derive(Default)]
pub struct BpScratch {
    pub stack: Vec<i32>,
    pub pairs: Vec<(u32, u32)>,
}

/// Runs the broad phase for one chunk, appending candidate pairs to `out`.
pub fn broad_phase(
    tree: &BvhTree,
    srt_aabbs: &[Aabb],
    vidx: &[u32],
    coll_active: &[bool],
    conj_active: &[bool],
    scratch_pool: &Pool<BpScratch>,
    out: &mut Vec<(u32, u32)>,
) {
    let n_active = tree.n_active();
    if n_active < 2 {
        return;
    }

    let out_mutex = Mutex::new(out);

    (0..n_active)
        .into_par_iter()
        .chunks(POSITIONS_PER_TASK)
        .for_each(|positions| {
            let mut scratch = scratch_pool.acquire_with(BpScratch::default);
            let BpScratch { stack, pairs } = &mut *scratch;
            pairs.clear();

            for p in positions {
                let i = vidx[p] as usize;
                let i_coll = coll_active[i];
                let i_conj = conj_active[i];
                if !i_coll && !i_conj {
                    continue;
                }
                let query = &srt_aabbs[p];

                stack.clear();
                stack.push(0);
                while let Some(idx) = stack.pop() {
                    let node = &tree.nodes[idx as usize];
                    if !query.overlaps(&node.aabb()) {
                        continue;
                    }
                    if node.is_leaf() {
                        for q in node.begin..node.end {
                            let j = vidx[q as usize] as usize;
                            if j <= i {
                                continue;
                            }
                            let pair_coll = i_coll && coll_active[j];
                            let pair_conj = i_conj && conj_active[j];
                            if !pair_coll && !pair_conj {
                                continue;
                            }
                            if query.overlaps(&srt_aabbs[q as usize]) {
                                pairs.push((i as u32, j as u32));
                            }
                        }
                    } else {
                        stack.push(node.left);
                        stack.push(node.right);
                    }
                }
            }

            if !pairs.is_empty() {
                out_mutex
                    .lock()
                    .expect("broad-phase output mutex poisoned")
                    .append(pairs);
            }
        });
}
