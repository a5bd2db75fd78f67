//! Integrator caches.
//!
//! Concurrent pools of scalar and batch integrators. Workers acquire an
//! entry, overwrite its state from a particle (or a lane-packed group),
//! drive it across the superstep, and the guard pushes it back.

use std::sync::Arc;

use kessler_types::{Pool, PoolGuard};

use crate::batch::TaylorAdaptiveBatch;
use crate::dynamics::Dynamics;
use crate::taylor::TaylorAdaptive;

/// The scalar and batch integrator pools for one simulation.
pub struct IntegratorCaches {
    dynamics: Arc<dyn Dynamics>,
    tol: f64,
    high_accuracy: bool,
    scalar: Pool<TaylorAdaptive>,
    batch: Pool<TaylorAdaptiveBatch>,
}

impl IntegratorCaches {
    /// Creates empty caches; entries are built on first acquisition with
    /// identical configuration.
    pub fn new(dynamics: Arc<dyn Dynamics>, tol: f64, high_accuracy: bool) -> Self {
        Self {
            dynamics,
            tol,
            high_accuracy,
            scalar: Pool::new(),
            batch: Pool::new(),
        }
    }

    /// Acquires a scalar integrator.
    pub fn acquire_scalar(&self) -> PoolGuard<'_, TaylorAdaptive> {
        self.scalar.acquire_with(|| {
            TaylorAdaptive::new(Arc::clone(&self.dynamics), self.tol, self.high_accuracy)
        })
    }

    /// Acquires a batch integrator.
    pub fn acquire_batch(&self) -> PoolGuard<'_, TaylorAdaptiveBatch> {
        self.batch.acquire_with(|| {
            TaylorAdaptiveBatch::new(Arc::clone(&self.dynamics), self.tol, self.high_accuracy)
        })
    }
}
