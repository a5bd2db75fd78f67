//! The simulation driver.
//!
//! `Sim` owns the particle state and parameters, the integrator caches
//! (through the propagator), and all per-superstep buffers. `step()` is
//! single-threaded at the driver level; each stage forks parallel work and
//! joins before the next stage starts.

use std::collections::BTreeSet;
use std::sync::Arc;

use rayon::prelude::*;

use kessler_detect::{
    apply_permutation, broad_phase, morton_codes, narrow_phase, particle_chunk_aabb, sort_indices,
    Aabb, BpScratch, BvhTree, Collision, Conjunction, GlobalAabb, NpParams, NpWorkspace,
};
use kessler_prop::{CentralBody, Dynamics, KeplerDynamics, Propagator, StepData, TerminalCode};
use kessler_telemetry::{EventBus, EventKind, SimEvent};
use kessler_types::{constants::STATE_DIM, DFloat, KesslerError, KesslerResult, Pool};

use crate::config::{self, SimConfig};
use crate::outcome::Outcome;

/// Per-chunk scratch buffers, pooled across chunks and supersteps.
#[derive(Default)]
struct ChunkScratch {
    aabbs: Vec<Aabb>,
    codes: Vec<u64>,
    vidx: Vec<u32>,
    srt_aabbs: Vec<Aabb>,
    srt_codes: Vec<u64>,
    tree: BvhTree,
    pairs: Vec<(u32, u32)>,
    poly: Vec<f64>,
}

/// What one chunk's detection pass produced.
struct ChunkResult {
    chunk: u32,
    npairs: usize,
    collisions: Vec<Collision>,
    conjunctions: Vec<Conjunction>,
    depth_errors: u32,
}

impl std::fmt::Debug for Sim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sim").field("npars", &self.npars).finish()
    }
}

/// The particle simulation.
pub struct Sim {
    state: Vec<f64>,
    pars: Vec<f64>,
    npars: usize,
    time: DFloat,
    config: SimConfig,
    dynamics: Arc<dyn Dynamics>,
    propagator: Propagator,

    // Per-superstep buffers, reinitialized each step.
    s_data: Vec<StepData>,
    coll_active: Vec<bool>,
    conj_active: Vec<bool>,

    // Concurrent scratch pools.
    chunk_pool: Pool<ChunkScratch>,
    bp_pool: Pool<BpScratch>,
    np_pool: Pool<NpWorkspace>,

    // Accumulated outputs and diagnostics.
    conjunctions: Vec<Conjunction>,
    err_nf_state_vec: Vec<(usize, f64)>,
    np_depth_errors: u32,

    bus: Option<EventBus>,
    step_count: u64,
}

impl Sim {
    /// Builds a simulation from a state vector, per-particle parameters,
    /// a dynamical model, and a configuration.
    pub fn new(
        state: Vec<f64>,
        pars: Vec<f64>,
        dynamics: Arc<dyn Dynamics>,
        config: SimConfig,
    ) -> KesslerResult<Self> {
        Self::restore(state, pars, DFloat::ZERO, config, dynamics)
    }

    /// Point-mass gravity with `mu = 1`, default configuration with the
    /// given collisional timestep.
    pub fn with_defaults(state: Vec<f64>, ct: f64) -> KesslerResult<Self> {
        Self::new(
            state,
            Vec::new(),
            Arc::new(KeplerDynamics::new(1.0)),
            SimConfig::with_ct(ct),
        )
    }

    /// Rebuilds a simulation at a given time (used by persistence and
    /// `Clone`). Validates everything like `new`.
    pub fn restore(
        state: Vec<f64>,
        pars: Vec<f64>,
        time: DFloat,
        config: SimConfig,
        dynamics: Arc<dyn Dynamics>,
    ) -> KesslerResult<Self> {
        config.validate()?;
        let nparts = validate_state(&state)?;
        let npars = dynamics.npars();
        let pars = validate_pars(pars, nparts, npars)?;
        let propagator = Propagator::new(Arc::clone(&dynamics), config.tol, config.high_accuracy);

        Ok(Self {
            state,
            pars,
            npars,
            time,
            config,
            dynamics,
            propagator,
            s_data: Vec::new(),
            coll_active: Vec::new(),
            conj_active: Vec::new(),
            chunk_pool: Pool::new(),
            bp_pool: Pool::new(),
            np_pool: Pool::new(),
            conjunctions: Vec::new(),
            err_nf_state_vec: Vec::new(),
            np_depth_errors: 0,
            bus: None,
            step_count: 0,
        })
    }

    // ─── Getters ──────────────────────────────────────────────

    /// Number of particles.
    pub fn nparts(&self) -> usize {
        self.state.len() / STATE_DIM
    }

    /// Number of per-particle dynamics parameters.
    pub fn npars(&self) -> usize {
        self.npars
    }

    /// The particle state, row-major `(x, y, z, vx, vy, vz, radius)`.
    pub fn state(&self) -> &[f64] {
        &self.state
    }

    /// The flattened per-particle parameters.
    pub fn pars(&self) -> &[f64] {
        &self.pars
    }

    /// Current simulation time.
    pub fn time(&self) -> DFloat {
        self.time
    }

    /// The active configuration.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The dynamical model.
    pub fn dynamics(&self) -> &Arc<dyn Dynamics> {
        &self.dynamics
    }

    /// Accumulated conjunctions, ordered by `(time, i, j)` with absolute
    /// times.
    pub fn conjunctions(&self) -> &[Conjunction] {
        &self.conjunctions
    }

    /// Drops all accumulated conjunctions.
    pub fn clear_conjunctions(&mut self) {
        self.conjunctions.clear();
    }

    /// Particles whose state went non-finite in the last step, with
    /// absolute times.
    pub fn err_nf_state_vec(&self) -> &[(usize, f64)] {
        &self.err_nf_state_vec
    }

    /// Subintervals skipped in the last step because narrow-phase root
    /// isolation hit its depth bound (non-fatal).
    pub fn np_depth_errors(&self) -> u32 {
        self.np_depth_errors
    }

    /// Installs a telemetry bus. Replaces any previous one.
    pub fn set_event_bus(&mut self, bus: EventBus) {
        self.bus = Some(bus);
    }

    /// Mutable access to the telemetry bus, if installed.
    pub fn event_bus_mut(&mut self) -> Option<&mut EventBus> {
        self.bus.as_mut()
    }

    // ─── Setters ──────────────────────────────────────────────

    pub fn set_ct(&mut self, ct: f64) -> KesslerResult<()> {
        config::check_ct(ct)?;
        self.config.ct = ct;
        Ok(())
    }

    pub fn set_n_par_ct(&mut self, n_par_ct: u32) -> KesslerResult<()> {
        config::check_n_par_ct(n_par_ct)?;
        self.config.n_par_ct = n_par_ct;
        Ok(())
    }

    pub fn set_conj_thresh(&mut self, conj_thresh: f64) -> KesslerResult<()> {
        config::check_nonnegative("conjunction threshold", conj_thresh)?;
        self.config.conj_thresh = conj_thresh;
        Ok(())
    }

    pub fn set_min_coll_radius(&mut self, min_coll_radius: f64) -> KesslerResult<()> {
        config::check_nonnegative("minimum collisional radius", min_coll_radius)?;
        self.config.min_coll_radius = min_coll_radius;
        Ok(())
    }

    pub fn set_reentry_radius(&mut self, body: CentralBody) -> KesslerResult<()> {
        config::check_central_body(&body)?;
        self.config.reentry_radius = body;
        Ok(())
    }

    pub fn set_exit_radius(&mut self, exit_radius: f64) -> KesslerResult<()> {
        config::check_nonnegative("exit radius", exit_radius)?;
        self.config.exit_radius = exit_radius;
        Ok(())
    }

    pub fn set_coll_whitelist(&mut self, whitelist: BTreeSet<usize>) -> KesslerResult<()> {
        self.check_whitelist(&whitelist)?;
        self.config.coll_whitelist = whitelist;
        Ok(())
    }

    pub fn set_conj_whitelist(&mut self, whitelist: BTreeSet<usize>) -> KesslerResult<()> {
        self.check_whitelist(&whitelist)?;
        self.config.conj_whitelist = whitelist;
        Ok(())
    }

    fn check_whitelist(&self, whitelist: &BTreeSet<usize>) -> KesslerResult<()> {
        if let Some(&max) = whitelist.iter().next_back() {
            if max >= self.nparts() {
                return Err(KesslerError::InvalidIndices(format!(
                    "whitelist index {max} is out of range for {} particles",
                    self.nparts()
                )));
            }
        }
        Ok(())
    }

    /// Replaces the particle state and parameters. The simulation is left
    /// unchanged if validation fails.
    pub fn set_new_state_pars(&mut self, state: Vec<f64>, pars: Vec<f64>) -> KesslerResult<()> {
        let nparts = validate_state(&state)?;
        let pars = validate_pars(pars, nparts, self.npars)?;
        self.state = state;
        self.pars = pars;
        // Stale whitelist entries beyond the new particle count are
        // dropped rather than rejected.
        let n = nparts;
        self.config.coll_whitelist.retain(|&i| i < n);
        self.config.conj_whitelist.retain(|&i| i < n);
        Ok(())
    }

    /// Removes the given particles and compacts indices. Duplicate
    /// indices are allowed; out-of-range indices reject the whole call.
    pub fn remove_particles(&mut self, indices: &[usize]) -> KesslerResult<()> {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let nparts = self.nparts();
        if sorted.last().is_some_and(|&max| max >= nparts) {
            return Err(KesslerError::InvalidIndices(format!(
                "An invalid vector of indices was passed to the function for particle removal: \
                 {sorted:?}"
            )));
        }
        if sorted.is_empty() {
            return Ok(());
        }

        let mut keep = vec![true; nparts];
        for &i in &sorted {
            keep[i] = false;
        }

        let mut w = 0_usize;
        for i in 0..nparts {
            if keep[i] {
                if w != i {
                    self.state
                        .copy_within(i * STATE_DIM..(i + 1) * STATE_DIM, w * STATE_DIM);
                    if self.npars > 0 {
                        self.pars
                            .copy_within(i * self.npars..(i + 1) * self.npars, w * self.npars);
                    }
                }
                w += 1;
            }
        }
        self.state.truncate(w * STATE_DIM);
        self.pars.truncate(w * self.npars);

        // Remap whitelists through the compaction.
        let remap = |wl: &BTreeSet<usize>| -> BTreeSet<usize> {
            wl.iter()
                .filter(|&&i| keep[i])
                .map(|&i| i - sorted.partition_point(|&r| r < i))
                .collect()
        };
        self.config.coll_whitelist = remap(&self.config.coll_whitelist);
        self.config.conj_whitelist = remap(&self.config.conj_whitelist);
        Ok(())
    }

    // ─── Stepping ─────────────────────────────────────────────

    /// Runs one superstep and returns its outcome.
    pub fn step(&mut self) -> KesslerResult<Outcome> {
        let nparts = self.nparts();
        let delta_t = self.config.ct * self.config.n_par_ct as f64;
        let t_begin = self.time;
        let step_idx = self.step_count;
        self.step_count += 1;

        let mut events = Vec::new();
        events.push(SimEvent::new(
            step_idx,
            EventKind::StepBegin {
                time: t_begin.to_f64(),
                nparts,
            },
        ));

        if nparts == 0 {
            self.time += delta_t;
            self.err_nf_state_vec.clear();
            self.np_depth_errors = 0;
            events.push(SimEvent::new(
                step_idx,
                EventKind::StepEnd {
                    outcome: Outcome::Success.tag().into(),
                    time: self.time.to_f64(),
                },
            ));
            self.dispatch(events);
            return Ok(Outcome::Success);
        }

        // 1. Propagate all particles across the superstep.
        self.s_data.resize_with(nparts, StepData::default);
        let report = self.propagator.propagate_all(
            &self.state,
            &self.pars,
            t_begin,
            delta_t,
            self.config.reentry_radius,
            self.config.exit_radius,
            &mut self.s_data,
        );

        // Activation flags for the superstep. Disabled particles take no
        // part in broad/narrow phase.
        let disabled: Vec<bool> = {
            let mut d = vec![false; nparts];
            for &(i, _) in &report.err_nf_state_vec {
                d[i] = true;
            }
            d
        };
        self.coll_active.clear();
        self.conj_active.clear();
        for i in 0..nparts {
            let radius = self.state[i * STATE_DIM + 6];
            self.coll_active
                .push(!disabled[i] && radius > self.config.min_coll_radius);
            self.conj_active
                .push(!disabled[i] && self.config.conj_thresh > 0.0);
        }

        // 2. Detection pipeline, one task per chunk.
        let radii: Vec<f64> = (0..nparts)
            .map(|i| self.state[i * STATE_DIM + 6])
            .collect();
        let ct = self.config.ct;
        let nchunks = self.config.n_par_ct;
        let conj_thresh = self.config.conj_thresh;
        let high_accuracy = self.config.high_accuracy;
        let s_data = &self.s_data;
        let coll_active = &self.coll_active;
        let conj_active = &self.conj_active;
        let coll_wl = &self.config.coll_whitelist;
        let conj_wl = &self.config.conj_whitelist;
        let chunk_pool = &self.chunk_pool;
        let bp_pool = &self.bp_pool;
        let np_pool = &self.np_pool;

        let chunk_results: Vec<ChunkResult> = (0..nchunks)
            .into_par_iter()
            .map(|c| {
                let chunk_begin = c as f64 * ct;
                let chunk_end = (c + 1) as f64 * ct;
                let mut guard = chunk_pool.acquire_with(ChunkScratch::default);
                let cs = &mut *guard;

                // Per-particle AABBs over the chunk.
                cs.aabbs.clear();
                for i in 0..nparts {
                    let inflate = radii[i].max(conj_thresh * 0.5);
                    cs.aabbs.push(particle_chunk_aabb(
                        &s_data[i],
                        t_begin,
                        chunk_begin,
                        chunk_end,
                        inflate,
                        &mut cs.poly,
                    ));
                }

                // Global box via the atomic min/max reduction.
                let global = GlobalAabb::new();
                cs.aabbs.par_iter().for_each(|bb| global.include(bb));
                let global = global.snapshot();

                // Morton codes, deterministic sort, permuted views.
                morton_codes(&cs.aabbs, &global, &mut cs.codes);
                sort_indices(&cs.codes, &mut cs.vidx);
                apply_permutation(
                    &cs.vidx,
                    &cs.aabbs,
                    &cs.codes,
                    &mut cs.srt_aabbs,
                    &mut cs.srt_codes,
                );

                // BVH and broad phase.
                cs.tree.build(&cs.srt_codes, &cs.srt_aabbs);
                cs.pairs.clear();
                broad_phase(
                    &cs.tree,
                    &cs.srt_aabbs,
                    &cs.vidx,
                    coll_active,
                    conj_active,
                    bp_pool,
                    &mut cs.pairs,
                );

                // Narrow phase.
                let params = NpParams {
                    t_begin,
                    chunk_begin,
                    chunk_end,
                    conj_thresh,
                    high_accuracy,
                    radii: &radii,
                    coll_active,
                    conj_active,
                    coll_whitelist: coll_wl,
                    conj_whitelist: conj_wl,
                };
                let mut collisions = Vec::new();
                let mut conjunctions = Vec::new();
                let depth_errors = narrow_phase(
                    &cs.pairs,
                    s_data,
                    &params,
                    np_pool,
                    &mut collisions,
                    &mut conjunctions,
                );

                ChunkResult {
                    chunk: c,
                    npairs: cs.pairs.len(),
                    collisions,
                    conjunctions,
                    depth_errors,
                }
            })
            .collect();

        // 3. Earliest collision across chunks, `(t, i, j)` lexicographic.
        let mut earliest_coll: Option<Collision> = None;
        let mut new_conjunctions = Vec::new();
        self.np_depth_errors = 0;
        for r in chunk_results {
            events.push(SimEvent::new(
                step_idx,
                EventKind::BroadPhase {
                    chunk: r.chunk,
                    pairs: r.npairs,
                },
            ));
            self.np_depth_errors += r.depth_errors;
            for c in r.collisions {
                let better = match &earliest_coll {
                    None => true,
                    Some(b) => (c.time, c.i, c.j) < (b.time, b.i, b.j),
                };
                if better {
                    earliest_coll = Some(c);
                }
            }
            new_conjunctions.extend(r.conjunctions);
        }

        // 4. Terminal events from propagation preempt a later collision.
        let mut terminal: Option<(f64, u8, usize)> = None;
        for ev in &report.ste_vec {
            let rank = match ev.code {
                TerminalCode::Reentry => 0_u8,
                TerminalCode::Exit => 1,
            };
            let cand = (ev.time, rank, ev.particle);
            if terminal.map_or(true, |t| cand < t) {
                terminal = Some(cand);
            }
        }
        for &(i, t) in &report.err_nf_state_vec {
            let cand = (t, 2_u8, i);
            if terminal.map_or(true, |t| cand < t) {
                terminal = Some(cand);
            }
        }

        if self.np_depth_errors > 0 {
            tracing::warn!(
                count = self.np_depth_errors,
                "narrow-phase subintervals skipped on depth exceedance"
            );
        }

        let (advance_rel, outcome) = select_outcome(earliest_coll, terminal, t_begin, delta_t);
        tracing::debug!(
            step = step_idx,
            outcome = outcome.tag(),
            advance = advance_rel,
            "superstep resolved"
        );

        // 5. Advance the clock and dense-evaluate the authoritative state.
        let t_new = t_begin + advance_rel;
        {
            let s_data = &self.s_data;
            self.state
                .par_chunks_mut(STATE_DIM)
                .enumerate()
                .for_each(|(i, st)| {
                    if s_data[i].n_substeps() == 0 {
                        return;
                    }
                    let mut out = [0.0; 7];
                    s_data[i].eval_state(t_begin, t_new, high_accuracy, &mut out);
                    st[..6].copy_from_slice(&out[..6]);
                });
        }
        self.time = t_new;

        // 6. Conjunctions: only those that happened before the advance,
        // rebased to absolute time, accumulated in order.
        for mut c in new_conjunctions {
            if c.time <= advance_rel {
                c.time = (t_begin + c.time).to_f64();
                events.push(SimEvent::new(
                    step_idx,
                    EventKind::ConjunctionDetected {
                        i: c.i,
                        j: c.j,
                        time: c.time,
                        dist: c.dist,
                    },
                ));
                self.conjunctions.push(c);
            }
        }
        self.conjunctions.sort_by(|a, b| {
            (a.time, a.i, a.j)
                .partial_cmp(&(b.time, b.i, b.j))
                .expect("conjunction times are finite")
        });

        // 7. Diagnostics and telemetry.
        self.err_nf_state_vec = report
            .err_nf_state_vec
            .iter()
            .map(|&(i, t)| (i, (t_begin + t).to_f64()))
            .collect();
        for &(i, t) in &self.err_nf_state_vec {
            events.push(SimEvent::new(
                step_idx,
                EventKind::ParticleDisabled { i, time: t },
            ));
        }
        if let Outcome::Collision { i, j, time } = outcome {
            events.push(SimEvent::new(
                step_idx,
                EventKind::CollisionDetected { i, j, time },
            ));
        }
        events.push(SimEvent::new(
            step_idx,
            EventKind::StepEnd {
                outcome: outcome.tag().into(),
                time: self.time.to_f64(),
            },
        ));
        self.dispatch(events);

        Ok(outcome)
    }

    fn dispatch(&mut self, events: Vec<SimEvent>) {
        if let Some(bus) = &mut self.bus {
            for ev in events {
                bus.emit(ev);
            }
            bus.flush();
        }
    }
}

/// Picks the interrupting event (if any) and the time to advance to.
fn select_outcome(
    earliest_coll: Option<Collision>,
    terminal: Option<(f64, u8, usize)>,
    t_begin: DFloat,
    delta_t: f64,
) -> (f64, Outcome) {
    let abs = |rel: f64| (t_begin + rel).to_f64();

    let collision = earliest_coll.map(|c| {
        (
            c.time,
            Outcome::Collision {
                i: c.i,
                j: c.j,
                time: abs(c.time),
            },
        )
    });
    let terminal = terminal.map(|(t, rank, i)| {
        let outcome = match rank {
            0 => Outcome::Reentry { i, time: abs(t) },
            1 => Outcome::Exit { i, time: abs(t) },
            _ => Outcome::NonFiniteState { i, time: abs(t) },
        };
        (t, outcome)
    });

    match (collision, terminal) {
        (None, None) => (delta_t, Outcome::Success),
        (Some(c), None) => c,
        (None, Some(t)) => t,
        // A reentry/exit/non-finite event strictly before the earliest
        // collision preempts it; ties go to the collision.
        (Some(c), Some(t)) => {
            if t.0 < c.0 {
                t
            } else {
                c
            }
        }
    }
}

impl Default for Sim {
    /// An empty simulation: no particles, point-mass gravity with
    /// `mu = 1`, default configuration.
    fn default() -> Self {
        Self::with_defaults(Vec::new(), kessler_types::constants::DEFAULT_CT)
            .expect("the default simulation is valid")
    }
}

impl Clone for Sim {
    /// Clones state, parameters, time, and configuration; caches and
    /// per-superstep buffers are rebuilt lazily by the copy.
    fn clone(&self) -> Self {
        let mut copy = Sim::restore(
            self.state.clone(),
            self.pars.clone(),
            self.time,
            self.config.clone(),
            Arc::clone(&self.dynamics),
        )
        .expect("clone of a valid simulation");
        copy.conjunctions = self.conjunctions.clone();
        copy.err_nf_state_vec = self.err_nf_state_vec.clone();
        copy.np_depth_errors = self.np_depth_errors;
        copy.step_count = self.step_count;
        copy
    }
}

fn validate_state(state: &[f64]) -> KesslerResult<usize> {
    if state.len() % STATE_DIM != 0 {
        return Err(KesslerError::InvalidState(format!(
            "The size of the state vector is {}, which is not a multiple of 7",
            state.len()
        )));
    }
    let nparts = state.len() / STATE_DIM;
    for i in 0..nparts {
        let row = &state[i * STATE_DIM..(i + 1) * STATE_DIM];
        if row.iter().any(|x| !x.is_finite()) {
            return Err(KesslerError::InvalidState(format!(
                "The state of particle {i} contains a non-finite value"
            )));
        }
        if row[6] < 0.0 {
            return Err(KesslerError::InvalidState(format!(
                "The collisional radius of particle {i} is negative"
            )));
        }
    }
    Ok(nparts)
}

fn validate_pars(pars: Vec<f64>, nparts: usize, npars: usize) -> KesslerResult<Vec<f64>> {
    if npars == 0 {
        if !pars.is_empty() {
            return Err(KesslerError::InvalidParameters(
                "The input array of parameter values must be empty when the number of \
                 parameters in the dynamics is zero"
                    .into(),
            ));
        }
        return Ok(pars);
    }
    if pars.is_empty() {
        // Empty parameters are interpreted as all zeroes.
        return Ok(vec![0.0; nparts * npars]);
    }
    if pars.len() != nparts * npars {
        return Err(KesslerError::InvalidParameters(format!(
            "The input array of parameter values must have shape ({nparts}, {npars}), \
             but instead its flattened size is {}",
            pars.len()
        )));
    }
    if pars.iter().any(|x| !x.is_finite()) {
        return Err(KesslerError::InvalidParameters(
            "The input array of parameter values contains a non-finite value".into(),
        ));
    }
    Ok(pars)
}
