//! Snapshot contract types.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use kessler_prop::{Dynamics, FreeMotion, KeplerDynamics};
use kessler_sim::{Sim, SimConfig};
use kessler_types::{DFloat, KesslerError, KesslerResult};

/// Identity of the dynamical model, used to rebuild the compiled
/// recurrences on restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DynamicsId {
    /// Point-mass gravity with the given `mu`; `mu_parameterized` selects
    /// the per-particle perturbed variant.
    Kepler { mu: f64, mu_parameterized: bool },
    /// Force-free motion.
    FreeMotion,
    /// A caller-supplied model: the hint is opaque to the engine and is
    /// handed back on restore so the caller can rebuild the model.
    Custom { hint: String },
}

impl DynamicsId {
    /// Identity of the parameter-free Kepler model.
    pub fn kepler(mu: f64) -> Self {
        DynamicsId::Kepler {
            mu,
            mu_parameterized: false,
        }
    }
}

/// A complete, serializable simulation snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimSnapshot {
    /// Row-major particle state, `(x, y, z, vx, vy, vz, radius)`.
    pub state: Vec<f64>,
    /// Flattened per-particle parameters.
    pub pars: Vec<f64>,
    /// Double-double simulation time, both components.
    pub time_hi: f64,
    pub time_lo: f64,
    /// The full driver configuration.
    pub config: SimConfig,
    /// Model identity / rebuild hint.
    pub dynamics: DynamicsId,
}

impl SimSnapshot {
    /// Captures a snapshot of a simulation. The caller states the model
    /// identity, since compiled recurrences cannot be serialized.
    pub fn capture(sim: &Sim, dynamics: DynamicsId) -> Self {
        Self {
            state: sim.state().to_vec(),
            pars: sim.pars().to_vec(),
            time_hi: sim.time().hi(),
            time_lo: sim.time().lo(),
            config: sim.config().clone(),
            dynamics,
        }
    }

    /// Restores a simulation with a built-in model identity.
    pub fn restore(&self) -> KesslerResult<Sim> {
        let dynamics: Arc<dyn Dynamics> = match &self.dynamics {
            DynamicsId::Kepler {
                mu,
                mu_parameterized,
            } => {
                if *mu_parameterized {
                    Arc::new(KeplerDynamics::with_mu_parameter(*mu))
                } else {
                    Arc::new(KeplerDynamics::new(*mu))
                }
            }
            DynamicsId::FreeMotion => Arc::new(FreeMotion),
            DynamicsId::Custom { hint } => {
                return Err(KesslerError::Serialization(format!(
                    "a custom dynamics snapshot (hint: {hint:?}) must be restored with \
                     restore_with"
                )));
            }
        };
        self.restore_with(dynamics)
    }

    /// Restores a simulation with a caller-rebuilt model (required for
    /// `DynamicsId::Custom`).
    pub fn restore_with(&self, dynamics: Arc<dyn Dynamics>) -> KesslerResult<Sim> {
        Sim::restore(
            self.state.clone(),
            self.pars.clone(),
            DFloat::from_parts(self.time_hi, self.time_lo),
            self.config.clone(),
            dynamics,
        )
    }

    /// Serializes to JSON.
    pub fn to_json_string(&self) -> KesslerResult<String> {
        serde_json::to_string(self).map_err(|e| KesslerError::Serialization(e.to_string()))
    }

    /// Deserializes from JSON.
    pub fn from_json_str(json: &str) -> KesslerResult<Self> {
        serde_json::from_str(json).map_err(|e| KesslerError::Serialization(e.to_string()))
    }
}
