//! Superstep propagation.
//!
//! Fills every particle's [`StepData`] with Taylor coefficients and substep
//! end times covering `[t_begin, t_begin + delta_t]`, in parallel, using
//! the integrator caches. Terminal conditions (reentry, exit, non-finite
//! state) are detected per substep and recorded for the driver; propagation
//! of the remaining particles always continues to the superstep end.

use std::sync::{Arc, Mutex};

use glam::DVec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use kessler_poly::{
    dense::rescale_in_place, enclosure, eval, eval_compensated, isolate_roots, refine_root,
    IsolOutcome, PolyCache,
};
use kessler_types::DFloat;

use crate::batch::BATCH_LANES;
use crate::cache::IntegratorCaches;
use crate::dynamics::Dynamics;
use crate::taylor::{order_for_tol, StepOutcome, TaylorAdaptive};
use crate::var;

/// The central body below which particles reenter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CentralBody {
    /// Spherical body of the given radius. Zero disables reentry.
    Sphere(f64),
    /// Triaxial ellipsoid with positive semiaxes.
    Triaxial([f64; 3]),
}

impl Default for CentralBody {
    fn default() -> Self {
        CentralBody::Sphere(0.0)
    }
}

impl CentralBody {
    /// Whether reentry detection is enabled at all.
    pub fn is_active(&self) -> bool {
        match self {
            CentralBody::Sphere(r) => *r > 0.0,
            CentralBody::Triaxial(_) => true,
        }
    }

    /// Containment test for a position.
    pub fn contains(&self, p: DVec3) -> bool {
        match self {
            CentralBody::Sphere(r) => p.length_squared() <= r * r,
            CentralBody::Triaxial([a, b, c]) => {
                let scaled = p / DVec3::new(*a, *b, *c);
                scaled.length_squared() <= 1.0
            }
        }
    }
}

/// Why a particle stopped before the superstep end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalCode {
    /// Crossed into the central body.
    Reentry,
    /// Crossed the exit radius outward.
    Exit,
}

/// A reentry/exit event recorded during propagation. Times are relative to
/// the superstep begin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerminalEvent {
    pub particle: usize,
    pub time: f64,
    pub code: TerminalCode,
}

/// Per-particle substep data for one superstep.
///
/// `tcs` is a dense row-major 3-D array `[n_substeps][7][order + 1]`;
/// `tcoords` holds the substep end times, strictly increasing, with the
/// last entry at (or marginally past) the superstep end.
#[derive(Debug, Clone, Default)]
pub struct StepData {
    order: usize,
    pub tcs: Vec<f64>,
    pub tcoords: Vec<DFloat>,
}

impl StepData {
    /// Resets the buffers for a new superstep.
    pub fn clear(&mut self, order: usize) {
        self.order = order;
        self.tcs.clear();
        self.tcoords.clear();
    }

    /// Number of substeps captured.
    pub fn n_substeps(&self) -> usize {
        self.tcoords.len()
    }

    /// Taylor order of the captured rows.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Appends one substep's coefficient block and end time.
    pub fn push_substep(&mut self, rows: &[f64], t_end: DFloat) {
        debug_assert_eq!(rows.len(), 7 * (self.order + 1));
        self.tcs.extend_from_slice(rows);
        self.tcoords.push(t_end);
    }

    /// Coefficient row of variable `v` in substep `k`.
    pub fn var_row(&self, k: usize, v: usize) -> &[f64] {
        let n = self.order + 1;
        let base = k * 7 * n + v * n;
        &self.tcs[base..base + n]
    }

    /// Dense-evaluates the state at absolute time `t`, clamped to the
    /// covered time range. `t_begin` is the superstep begin time.
    pub fn eval_state(
        &self,
        t_begin: DFloat,
        t: DFloat,
        high_accuracy: bool,
        out: &mut [f64; 7],
    ) {
        debug_assert!(!self.tcoords.is_empty());
        let k = self
            .tcoords
            .partition_point(|&end| end < t)
            .min(self.tcoords.len() - 1);
        let start = if k == 0 { t_begin } else { self.tcoords[k - 1] };
        let h = self.tcoords[k].diff_f64(start);
        let tau = t.diff_f64(start).clamp(0.0, h);
        for (v, o) in out.iter_mut().enumerate() {
            let row = self.var_row(k, v);
            *o = if high_accuracy {
                eval_compensated(row, tau)
            } else {
                eval(row, tau)
            };
        }
    }
}

/// Result of one superstep's propagation.
#[derive(Debug, Default)]
pub struct PropagationReport {
    /// Reentry/exit events, unordered.
    pub ste_vec: Vec<TerminalEvent>,
    /// Particles whose state went non-finite, with the time (relative to
    /// the superstep begin) of the last valid substep end.
    pub err_nf_state_vec: Vec<(usize, f64)>,
}

/// Parallel superstep propagation over the integrator caches.
pub struct Propagator {
    caches: IntegratorCaches,
    npars: usize,
    order: usize,
    high_accuracy: bool,
    root_scratch: PolyCache,
}

/// Hard cap on substeps per particle per superstep; hitting it is treated
/// as a divergent integration.
const MAX_SUBSTEPS: usize = 100_000;

/// Position at the end of the substep just taken.
#[inline]
fn endpoint(ta: &TaylorAdaptive) -> DVec3 {
    let st = ta.state();
    DVec3::new(st[0], st[1], st[2])
}

impl Propagator {
    pub fn new(dynamics: Arc<dyn Dynamics>, tol: f64, high_accuracy: bool) -> Self {
        let npars = dynamics.npars();
        Self {
            caches: IntegratorCaches::new(dynamics, tol, high_accuracy),
            npars,
            order: order_for_tol(tol),
            high_accuracy,
            root_scratch: PolyCache::new(),
        }
    }

    /// Taylor order of the captured coefficient rows.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Whether dense evaluations use the compensated scheme.
    pub fn high_accuracy(&self) -> bool {
        self.high_accuracy
    }

    /// Fills `s_data` for all particles over `[t_begin, t_begin + delta_t]`.
    pub fn propagate_all(
        &self,
        state: &[f64],
        pars: &[f64],
        t_begin: DFloat,
        delta_t: f64,
        central: CentralBody,
        exit_radius: f64,
        s_data: &mut [StepData],
    ) -> PropagationReport {
        let t_end = t_begin + delta_t;
        let events = Mutex::new(Vec::new());
        let nf = Mutex::new(Vec::new());

        s_data
            .par_chunks_mut(BATCH_LANES)
            .enumerate()
            .for_each(|(g, sd_chunk)| {
                let base = g * BATCH_LANES;
                let k = sd_chunk.len();
                if k == BATCH_LANES {
                    let mut batch = self.caches.acquire_batch();
                    batch.set_batch(
                        &state[base * 7..(base + k) * 7],
                        &pars[base * self.npars..(base + k) * self.npars],
                        self.npars,
                        t_begin,
                        t_end,
                    );
                    for l in 0..k {
                        let target = batch.pfor_ts[l];
                        self.drive_particle(
                            batch.lane_mut(l),
                            base + l,
                            &mut sd_chunk[l],
                            t_begin,
                            target,
                            central,
                            exit_radius,
                            &events,
                            &nf,
                        );
                    }
                } else {
                    for (l, sd) in sd_chunk.iter_mut().enumerate() {
                        let i = base + l;
                        let mut ta = self.caches.acquire_scalar();
                        ta.set_particle(
                            &state[i * 7..i * 7 + 7],
                            &pars[i * self.npars..(i + 1) * self.npars],
                            t_begin,
                        );
                        self.drive_particle(
                            &mut ta, i, sd, t_begin, t_end, central, exit_radius, &events, &nf,
                        );
                    }
                }
            });

        PropagationReport {
            ste_vec: events.into_inner().expect("event mutex poisoned"),
            err_nf_state_vec: nf.into_inner().expect("nf mutex poisoned"),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn drive_particle(
        &self,
        ta: &mut TaylorAdaptive,
        i: usize,
        sd: &mut StepData,
        t_begin: DFloat,
        t_end: DFloat,
        central: CentralBody,
        exit_radius: f64,
        events: &Mutex<Vec<TerminalEvent>>,
        nf: &Mutex<Vec<(usize, f64)>>,
    ) {
        sd.clear(self.order);

        // Containment at the superstep start preempts propagation.
        let st = ta.state();
        if central.is_active() && central.contains(DVec3::new(st[0], st[1], st[2])) {
            events.lock().unwrap().push(TerminalEvent {
                particle: i,
                time: 0.0,
                code: TerminalCode::Reentry,
            });
            return;
        }
        if exit_radius > 0.0 && st[6] >= exit_radius {
            events.lock().unwrap().push(TerminalEvent {
                particle: i,
                time: 0.0,
                code: TerminalCode::Exit,
            });
            return;
        }

        let mut substeps = 0;
        while ta.time() < t_end {
            substeps += 1;
            if substeps > MAX_SUBSTEPS {
                nf.lock()
                    .unwrap()
                    .push((i, ta.time().diff_f64(t_begin)));
                return;
            }
            let remaining = t_end.diff_f64(ta.time());
            if remaining <= 0.0 {
                break;
            }

            let sub_begin = ta.time();
            match ta.step(remaining) {
                StepOutcome::NonFinite => {
                    nf.lock()
                        .unwrap()
                        .push((i, sub_begin.diff_f64(t_begin)));
                    return;
                }
                StepOutcome::Advanced { h } => {
                    sd.push_substep(ta.workspace().rows(), ta.time());
                    if let Some(ev) =
                        self.scan_terminal(ta, i, h, sub_begin, t_begin, central, exit_radius)
                    {
                        events.lock().unwrap().push(ev);
                        return;
                    }
                }
            }
        }
    }

    /// Looks for a reentry/exit crossing within the substep just taken.
    ///
    /// Spherical bodies and the exit sphere are resolved by isolating the
    /// roots of the radial-distance series minus the threshold radius; the
    /// triaxial case fires on the first substep endpoint inside the
    /// ellipsoid.
    fn scan_terminal(
        &self,
        ta: &TaylorAdaptive,
        i: usize,
        h: f64,
        sub_begin: DFloat,
        t_begin: DFloat,
        central: CentralBody,
        exit_radius: f64,
    ) -> Option<TerminalEvent> {
        let rel = sub_begin.diff_f64(t_begin);
        let r_row = ta.workspace().row(var::R);
        let r_finite = r_row.iter().all(|c| c.is_finite());

        let mut best: Option<TerminalEvent> = None;
        let mut consider = |cand: TerminalEvent| {
            if best.map_or(true, |b| cand.time < b.time) {
                best = Some(cand);
            }
        };

        match central {
            CentralBody::Sphere(radius) if radius > 0.0 => {
                if r_finite {
                    if let Some(tau) = self.first_radial_crossing(r_row, h, radius, true) {
                        consider(TerminalEvent {
                            particle: i,
                            time: rel + tau,
                            code: TerminalCode::Reentry,
                        });
                    }
                } else if central.contains(endpoint(ta)) {
                    consider(TerminalEvent {
                        particle: i,
                        time: rel + h,
                        code: TerminalCode::Reentry,
                    });
                }
            }
            CentralBody::Triaxial(_) => {
                if central.contains(endpoint(ta)) {
                    consider(TerminalEvent {
                        particle: i,
                        time: rel + h,
                        code: TerminalCode::Reentry,
                    });
                }
            }
            _ => {}
        }

        if exit_radius > 0.0 {
            if r_finite {
                if let Some(tau) = self.first_radial_crossing(r_row, h, exit_radius, false) {
                    consider(TerminalEvent {
                        particle: i,
                        time: rel + tau,
                        code: TerminalCode::Exit,
                    });
                }
            } else if ta.state()[6] >= exit_radius {
                consider(TerminalEvent {
                    particle: i,
                    time: rel + h,
                    code: TerminalCode::Exit,
                });
            }
        }

        best
    }

    /// Earliest `tau` in `[0, h]` with `r(tau) == radius`, if any.
    ///
    /// `from_above` selects the crossing direction: reentry watches
    /// `r - radius` fall through zero, exit watches it rise.
    fn first_radial_crossing(
        &self,
        r_row: &[f64],
        h: f64,
        radius: f64,
        from_above: bool,
    ) -> Option<f64> {
        let mut g = self.root_scratch.acquire_copy(r_row);
        g[0] -= radius;

        let crossed = |v: f64| if from_above { v <= 0.0 } else { v >= 0.0 };
        if crossed(g[0]) {
            // Already at (or past) the threshold at the substep start.
            return Some(0.0);
        }

        // Quick exclusion on the untransformed polynomial.
        let (lo, hi) = enclosure(&g, h);
        if (from_above && lo > 0.0) || (!from_above && hi < 0.0) {
            return None;
        }

        rescale_in_place(&mut g, h);
        let mut isol = Vec::new();
        match isolate_roots(&self.root_scratch, &g, &mut isol) {
            IsolOutcome::Complete => {}
            IsolOutcome::DepthExceeded => {
                tracing::warn!("radial crossing isolation hit depth bound; using endpoint");
                return crossed(eval(&g, 1.0)).then_some(h);
            }
        }
        isol.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        isol.first()
            .map(|&(lo, hi)| refine_root(&g, lo, hi) * h)
    }
}
