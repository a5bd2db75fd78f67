//! Narrow-phase detection: polynomial root finding on squared distance.
//!
//! For every broad-phase candidate pair, the substep lists of the two
//! particles are walked in lockstep over the chunk; on each common
//! subinterval the squared-distance polynomial is built from the translated
//! position rows and its roots (for collisions) or its derivative's roots
//! (for conjunction minima) are isolated and refined.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use kessler_poly::{
    dense::{derivative, rescale_in_place, ssdiff3, translate_in_place},
    eval, fex_check, isolate_roots, refine_root, IsolOutcome, PolyCache,
};
use kessler_prop::StepData;
use kessler_types::{DFloat, Pool};

/// Candidate pairs per parallel task.
const PAIRS_PER_TASK: usize = 64;

/// A detected collision. `time` is relative to the superstep begin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Collision {
    pub i: usize,
    pub j: usize,
    pub time: f64,
}

/// A detected conjunction (close approach below the threshold distance).
///
/// `time` is relative to the superstep begin until the driver rebases it
/// to absolute time on collection. States are `(x, y, z, vx, vy, vz)` at
/// the conjunction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conjunction {
    pub i: usize,
    pub j: usize,
    pub time: f64,
    pub dist: f64,
    pub state_i: [f64; 6],
    pub state_j: [f64; 6],
}

/// Inputs shared by all narrow-phase workers for one chunk.
pub struct NpParams<'a> {
    /// Superstep begin time.
    pub t_begin: DFloat,
    /// Chunk bounds relative to the superstep begin.
    pub chunk_begin: f64,
    pub chunk_end: f64,
    /// Conjunction threshold distance; zero disables conjunctions.
    pub conj_thresh: f64,
    /// Whether dense state evaluations use the compensated scheme.
    pub high_accuracy: bool,
    /// Per-particle collisional radii.
    pub radii: &'a [f64],
    pub coll_active: &'a [bool],
    pub conj_active: &'a [bool],
    /// When non-empty, a pair is reported only if at least one member is
    /// listed.
    pub coll_whitelist: &'a BTreeSet<usize>,
    pub conj_whitelist: &'a BTreeSet<usize>,
}

impl NpParams<'_> {
    #[inline]
    fn whitelisted(wl: &BTreeSet<usize>, i: usize, j: usize) -> bool {
        wl.is_empty() || wl.contains(&i) || wl.contains(&j)
    }
}

/// Thread-local narrow-phase scratch, pooled across chunks.
///
/// The polynomial cache is declared before the buffers that borrow from
/// it during isolation; guard scopes keep every buffer returned by the
/// end of each pair.
#[derive(Default)]
pub struct NpWorkspace {
    pub cache: PolyCache,
    diff: Vec<f64>,
    rows_i: [Vec<f64>; 3],
    rows_j: [Vec<f64>; 3],
    dist2: Vec<f64>,
    deriv: Vec<f64>,
    isol: Vec<(f64, f64)>,
    collisions: Vec<Collision>,
    conjunctions: Vec<Conjunction>,
}

/// Second derivative of a dense polynomial at `x`.
#[inline]
fn eval_second_derivative(c: &[f64], x: f64) -> f64 {
    let mut acc = 0.0f64;
    for k in (2..c.len()).rev() {
        acc = acc.mul_add(x, c[k] * (k * (k - 1)) as f64);
    }
    acc
}

/// Runs the narrow phase for one chunk over the broad-phase candidates.
///
/// Appends to `collisions` every positive-to-nonpositive crossing of the
/// pair distance through the collisional radius sum (the driver selects
/// the earliest), and to `conjunctions` every distance minimum below the
/// threshold. Returns the number of subintervals skipped because root
/// isolation exceeded its depth bound.
pub fn narrow_phase(
    pairs: &[(u32, u32)],
    s_data: &[StepData],
    params: &NpParams<'_>,
    pool: &Pool<NpWorkspace>,
    collisions: &mut Vec<Collision>,
    conjunctions: &mut Vec<Conjunction>,
) -> u32 {
    let coll_out = Mutex::new(collisions);
    let conj_out = Mutex::new(conjunctions);
    let depth_errors = AtomicU32::new(0);

    pairs.par_chunks(PAIRS_PER_TASK).for_each(|chunk| {
        let mut ws = pool.acquire_with(NpWorkspace::default);
        ws.collisions.clear();
        ws.conjunctions.clear();

        for &(i, j) in chunk {
            process_pair(i as usize, j as usize, s_data, params, &mut *ws, &depth_errors);
        }

        if !ws.collisions.is_empty() {
            coll_out
                .lock()
                .expect("collision output mutex poisoned")
                .append(&mut ws.collisions);
        }
        if !ws.conjunctions.is_empty() {
            conj_out
                .lock()
                .expect("conjunction output mutex poisoned")
                .append(&mut ws.conjunctions);
        }
    });

    depth_errors.load(Ordering::Relaxed)
}

fn process_pair(
    i: usize,
    j: usize,
    s_data: &[StepData],
    params: &NpParams<'_>,
    ws: &mut NpWorkspace,
    depth_errors: &AtomicU32,
) {
    let want_coll = params.coll_active[i]
        && params.coll_active[j]
        && NpParams::whitelisted(params.coll_whitelist, i, j);
    let want_conj = params.conj_thresh > 0.0
        && params.conj_active[i]
        && params.conj_active[j]
        && NpParams::whitelisted(params.conj_whitelist, i, j);
    if !want_coll && !want_conj {
        return;
    }

    let sd_i = &s_data[i];
    let sd_j = &s_data[j];
    let (ni, nj) = (sd_i.n_substeps(), sd_j.n_substeps());
    if ni == 0 || nj == 0 {
        return;
    }
    let n = sd_i.order() + 1;

    // Two-pointer walk over the substep pairs clipped to the chunk.
    let (mut ki, mut kj) = (0_usize, 0_usize);
    let (mut begin_i, mut begin_j) = (0.0_f64, 0.0_f64);
    let mut end_i = sd_i.tcoords[0].diff_f64(params.t_begin);
    let mut end_j = sd_j.tcoords[0].diff_f64(params.t_begin);

    while end_i <= params.chunk_begin && ki + 1 < ni {
        ki += 1;
        begin_i = end_i;
        end_i = sd_i.tcoords[ki].diff_f64(params.t_begin);
    }
    while end_j <= params.chunk_begin && kj + 1 < nj {
        kj += 1;
        begin_j = end_j;
        end_j = sd_j.tcoords[kj].diff_f64(params.t_begin);
    }

    loop {
        let lo = begin_i.max(begin_j).max(params.chunk_begin);
        let hi = end_i.min(end_j).min(params.chunk_end);
        if hi > lo {
            process_interval(
                i, j, sd_i, sd_j, ki, kj, lo, hi, begin_i, begin_j, n, want_coll, want_conj,
                params, ws, depth_errors,
            );
        }

        // Advance the trajectory that ends first.
        if end_i <= end_j {
            ki += 1;
            if ki >= ni {
                break;
            }
            begin_i = end_i;
            end_i = sd_i.tcoords[ki].diff_f64(params.t_begin);
            if begin_i >= params.chunk_end {
                break;
            }
        } else {
            kj += 1;
            if kj >= nj {
                break;
            }
            begin_j = end_j;
            end_j = sd_j.tcoords[kj].diff_f64(params.t_begin);
            if begin_j >= params.chunk_end {
                break;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn process_interval(
    i: usize,
    j: usize,
    sd_i: &StepData,
    sd_j: &StepData,
    ki: usize,
    kj: usize,
    lo: f64,
    hi: f64,
    begin_i: f64,
    begin_j: f64,
    n: usize,
    want_coll: bool,
    want_conj: bool,
    params: &NpParams<'_>,
    ws: &mut NpWorkspace,
    depth_errors: &AtomicU32,
) {
    let h = hi - lo;

    // Translate both particles' position rows to the interval start.
    for axis in 0..3 {
        let row_i = &mut ws.rows_i[axis];
        row_i.clear();
        row_i.extend_from_slice(sd_i.var_row(ki, axis));
        translate_in_place(row_i, lo - begin_i);

        let row_j = &mut ws.rows_j[axis];
        row_j.clear();
        row_j.extend_from_slice(sd_j.var_row(kj, axis));
        translate_in_place(row_j, lo - begin_j);
    }

    ws.diff.resize(n, 0.0);
    ws.dist2.resize(2 * n - 1, 0.0);
    ssdiff3(
        &mut ws.dist2,
        &mut ws.diff,
        [&ws.rows_i[0], &ws.rows_i[1], &ws.rows_i[2]],
        [&ws.rows_j[0], &ws.rows_j[1], &ws.rows_j[2]],
    );

    if want_coll {
        let rho = params.radii[i] + params.radii[j];
        let rho2 = rho * rho;
        if fex_check(&ws.dist2, h, rho2) {
            if ws.dist2[0] - rho2 <= 0.0 {
                // Already touching at the interval start (closed
                // inequality: grazing counts).
                ws.collisions.push(Collision { i, j, time: lo });
            } else {
                let mut g = ws.cache.acquire_copy(&ws.dist2);
                g[0] -= rho2;
                rescale_in_place(&mut g, h);
                ws.isol.clear();
                match isolate_roots(&ws.cache, &g, &mut ws.isol) {
                    IsolOutcome::DepthExceeded => {
                        tracing::warn!(
                            i,
                            j,
                            "collision root isolation exceeded depth bound; \
                             skipping subinterval"
                        );
                        depth_errors.fetch_add(1, Ordering::Relaxed);
                    }
                    IsolOutcome::Complete => {
                        if let Some(&(rlo, rhi)) = ws
                            .isol
                            .iter()
                            .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap())
                        {
                            // First crossing is positive-to-nonpositive
                            // since the pair starts separated.
                            let tau = refine_root(&g, rlo, rhi);
                            ws.collisions.push(Collision {
                                i,
                                j,
                                time: lo + tau * h,
                            });
                        }
                    }
                }
            }
        }
    }

    if want_conj {
        let ct2 = params.conj_thresh * params.conj_thresh;
        if fex_check(&ws.dist2, h, ct2) {
            ws.deriv.resize(2 * n - 2, 0.0);
            derivative(&mut ws.deriv, &ws.dist2);

            let mut g = ws.cache.acquire_copy(&ws.deriv);
            rescale_in_place(&mut g, h);
            ws.isol.clear();
            match isolate_roots(&ws.cache, &g, &mut ws.isol) {
                IsolOutcome::DepthExceeded => {
                    tracing::warn!(
                        i,
                        j,
                        "conjunction root isolation exceeded depth bound; \
                         skipping subinterval"
                    );
                    depth_errors.fetch_add(1, Ordering::Relaxed);
                }
                IsolOutcome::Complete => {
                    for &(rlo, rhi) in &ws.isol {
                        let tau = refine_root(&g, rlo, rhi) * h;
                        if eval_second_derivative(&ws.dist2, tau) < 0.0 {
                            continue; // maximum, not an approach
                        }
                        let d2 = eval(&ws.dist2, tau);
                        if d2 <= ct2 {
                            let time = lo + tau;
                            let t_abs = params.t_begin + time;
                            let mut si = [0.0; 7];
                            let mut sj = [0.0; 7];
                            sd_i.eval_state(params.t_begin, t_abs, params.high_accuracy, &mut si);
                            sd_j.eval_state(params.t_begin, t_abs, params.high_accuracy, &mut sj);
                            ws.conjunctions.push(Conjunction {
                                i,
                                j,
                                time,
                                dist: d2.max(0.0).sqrt(),
                                state_i: si[..6].try_into().expect("state slice"),
                                state_j: sj[..6].try_into().expect("state slice"),
                            });
                        }
                    }
                }
            }
        }
    }
}
