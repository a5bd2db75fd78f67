//! Driver configuration.
//!
//! All knobs of the detection pipeline in one serializable struct.
//! Validation rejects invalid values synchronously; the `Sim` setters call
//! into the same checks so a failed setter leaves the simulation unchanged.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use kessler_prop::CentralBody;
use kessler_types::{constants, KesslerError, KesslerResult};

/// Configuration for the simulation driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Collisional timestep (chunk length). Must be finite and positive.
    pub ct: f64,

    /// Chunks per superstep. At least 1.
    pub n_par_ct: u32,

    /// Integrator tolerance. Defaults to machine epsilon.
    pub tol: f64,

    /// Selects the compensated-summation integrator variant.
    pub high_accuracy: bool,

    /// Central body for reentry detection. A zero-radius sphere disables
    /// reentry.
    pub reentry_radius: CentralBody,

    /// Particles beyond this radius trigger an exit event; 0 disables.
    pub exit_radius: f64,

    /// Conjunction threshold distance; 0 disables conjunction detection.
    pub conj_thresh: f64,

    /// Particles with collisional radius at or below this value are
    /// collision-inactive.
    pub min_coll_radius: f64,

    /// When non-empty, collisions are reported only for pairs with at
    /// least one member listed.
    pub coll_whitelist: BTreeSet<usize>,

    /// Same as `coll_whitelist`, for conjunctions.
    pub conj_whitelist: BTreeSet<usize>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            ct: constants::DEFAULT_CT,
            n_par_ct: constants::DEFAULT_N_PAR_CT,
            tol: f64::EPSILON,
            high_accuracy: false,
            reentry_radius: CentralBody::default(),
            exit_radius: 0.0,
            conj_thresh: 0.0,
            min_coll_radius: 0.0,
            coll_whitelist: BTreeSet::new(),
            conj_whitelist: BTreeSet::new(),
        }
    }
}

impl SimConfig {
    /// A default configuration with the given collisional timestep.
    pub fn with_ct(ct: f64) -> Self {
        Self {
            ct,
            ..Default::default()
        }
    }

    /// Checks every field, returning the first violation.
    pub fn validate(&self) -> KesslerResult<()> {
        check_ct(self.ct)?;
        check_n_par_ct(self.n_par_ct)?;
        if !(self.tol.is_finite() && self.tol > 0.0) {
            return Err(KesslerError::InvalidConfig(format!(
                "the integrator tolerance must be finite and positive, not {}",
                self.tol
            )));
        }
        check_central_body(&self.reentry_radius)?;
        check_nonnegative("exit radius", self.exit_radius)?;
        check_nonnegative("conjunction threshold", self.conj_thresh)?;
        check_nonnegative("minimum collisional radius", self.min_coll_radius)?;
        Ok(())
    }
}

pub(crate) fn check_ct(ct: f64) -> KesslerResult<()> {
    if ct.is_finite() && ct > 0.0 {
        Ok(())
    } else {
        Err(KesslerError::InvalidConfig(format!(
            "the collisional timestep must be finite and positive, not {ct}"
        )))
    }
}

pub(crate) fn check_n_par_ct(n: u32) -> KesslerResult<()> {
    if n >= 1 {
        Ok(())
    } else {
        Err(KesslerError::InvalidConfig(
            "the number of collisional timesteps per superstep must be at least 1".into(),
        ))
    }
}

pub(crate) fn check_nonnegative(name: &str, value: f64) -> KesslerResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(KesslerError::InvalidConfig(format!(
            "the {name} must be finite and non-negative, not {value}"
        )))
    }
}

pub(crate) fn check_central_body(body: &CentralBody) -> KesslerResult<()> {
    match body {
        CentralBody::Sphere(r) => check_nonnegative("reentry radius", *r),
        CentralBody::Triaxial(axes) => {
            if axes.iter().all(|a| a.is_finite() && *a > 0.0) {
                Ok(())
            } else {
                Err(KesslerError::InvalidConfig(format!(
                    "the semiaxes of a triaxial central body must be finite and positive, \
                     not {axes:?}"
                )))
            }
        }
    }
}
