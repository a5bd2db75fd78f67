//! Lane-packed batch integrator.
//!
//! Groups of `BATCH_LANES` particles share one cache entry. Lanes keep
//! independent adaptive substeps (particles in a batch generally take
//! different step sequences), so the batch is a container of lane cores
//! plus the per-lane target times, mirroring the scalar API per lane.

use std::sync::Arc;

use kessler_types::DFloat;

use crate::dynamics::Dynamics;
use crate::taylor::TaylorAdaptive;

/// Number of particles packed per batch integrator.
pub const BATCH_LANES: usize = 4;

/// Batch adaptive Taylor integrator.
pub struct TaylorAdaptiveBatch {
    lanes: Vec<TaylorAdaptive>,
    /// Per-lane propagation target times.
    pub pfor_ts: Vec<DFloat>,
    active: usize,
}

impl TaylorAdaptiveBatch {
    /// Creates a batch whose lanes are configured identically.
    pub fn new(dynamics: Arc<dyn Dynamics>, tol: f64, high_accuracy: bool) -> Self {
        let lanes = (0..BATCH_LANES)
            .map(|_| TaylorAdaptive::new(Arc::clone(&dynamics), tol, high_accuracy))
            .collect();
        Self {
            lanes,
            pfor_ts: vec![DFloat::ZERO; BATCH_LANES],
            active: 0,
        }
    }

    /// Number of lanes holding a particle after `set_batch`.
    pub fn active_lanes(&self) -> usize {
        self.active
    }

    /// Lane accessor.
    pub fn lane(&self, l: usize) -> &TaylorAdaptive {
        &self.lanes[l]
    }

    /// Mutable lane accessor.
    pub fn lane_mut(&mut self, l: usize) -> &mut TaylorAdaptive {
        &mut self.lanes[l]
    }

    /// Packs up to `BATCH_LANES` particles from a row-major state slice
    /// (`7` scalars per particle) and per-particle parameter rows.
    pub fn set_batch(
        &mut self,
        states: &[f64],
        pars: &[f64],
        npars: usize,
        time: DFloat,
        target: DFloat,
    ) {
        let n = states.len() / 7;
        debug_assert!(n <= BATCH_LANES);
        self.active = n;
        for l in 0..n {
            let st = &states[l * 7..l * 7 + 7];
            let pr = &pars[l * npars..(l + 1) * npars];
            self.lanes[l].set_particle(st, pr, time);
            self.pfor_ts[l] = target;
        }
    }
}
