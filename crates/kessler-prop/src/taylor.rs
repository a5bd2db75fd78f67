//! Scalar adaptive Taylor integrator.
//!
//! Builds the full Taylor coefficient table about the current time, picks
//! the substep from the trailing coefficient norms, and advances the state
//! by dense evaluation. The coefficient table remains valid after `step`
//! so the propagator can capture it for the collision pipeline.

use std::sync::Arc;

use kessler_poly::{eval, eval_compensated};
use kessler_types::DFloat;

use crate::dynamics::{conv_at, power_series_coeff, Dynamics, TaylorWorkspace};
use crate::var;

/// Taylor order for a given tolerance: roughly `-ln(tol) / 2`, clamped
/// to a sane range.
pub fn order_for_tol(tol: f64) -> usize {
    let raw = (-tol.ln() * 0.5).ceil();
    if raw.is_finite() && raw > 0.0 {
        ((raw as usize) + 1).clamp(2, 40)
    } else {
        2
    }
}

/// Result of one adaptive substep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// The state advanced by `h`; the workspace holds this substep's
    /// coefficients.
    Advanced {
        /// Substep length actually taken.
        h: f64,
    },
    /// The state or the coefficient table became non-finite. The state is
    /// left at the last valid substep end.
    NonFinite,
}

/// Scalar adaptive Taylor integrator for one particle.
pub struct TaylorAdaptive {
    order: usize,
    tol: f64,
    high_accuracy: bool,
    dynamics: Arc<dyn Dynamics>,
    ws: TaylorWorkspace,
    /// x, y, z, vx, vy, vz, radial distance.
    state: [f64; 7],
    time: DFloat,
    pars: Vec<f64>,
}

impl TaylorAdaptive {
    /// Creates an integrator. All integrators in a cache are configured
    /// identically (order, tolerance, high-accuracy mode).
    pub fn new(dynamics: Arc<dyn Dynamics>, tol: f64, high_accuracy: bool) -> Self {
        let order = order_for_tol(tol);
        let naux = dynamics.naux();
        Self {
            order,
            tol,
            high_accuracy,
            dynamics,
            ws: TaylorWorkspace::new(order, naux),
            state: [0.0; 7],
            time: DFloat::ZERO,
            pars: Vec::new(),
        }
    }

    /// Taylor order.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Current time.
    pub fn time(&self) -> DFloat {
        self.time
    }

    /// Current state (x, y, z, vx, vy, vz, radial distance).
    pub fn state(&self) -> &[f64; 7] {
        &self.state
    }

    /// Coefficients of the substep taken by the last successful `step`.
    pub fn workspace(&self) -> &TaylorWorkspace {
        &self.ws
    }

    /// Overwrites the integrator with a particle's state and parameters.
    pub fn set_particle(&mut self, state: &[f64], pars: &[f64], time: DFloat) {
        self.state[..6].copy_from_slice(&state[..6]);
        self.state[6] =
            (state[0] * state[0] + state[1] * state[1] + state[2] * state[2]).sqrt();
        self.pars.clear();
        self.pars.extend_from_slice(pars);
        self.time = time;
    }

    /// Takes one adaptive substep of at most `max_h`.
    pub fn step(&mut self, max_h: f64) -> StepOutcome {
        self.build_coefficients();

        let h = match self.select_stepsize(max_h) {
            Some(h) => h,
            None => return StepOutcome::NonFinite,
        };

        // Dense-evaluate the new state at the substep end.
        for v in 0..6 {
            let row = self.ws.row(v);
            self.state[v] = if self.high_accuracy {
                eval_compensated(row, h)
            } else {
                eval(row, h)
            };
        }
        self.state[6] = (self.state[0] * self.state[0]
            + self.state[1] * self.state[1]
            + self.state[2] * self.state[2])
            .sqrt();

        if !self.state.iter().all(|x| x.is_finite()) {
            return StepOutcome::NonFinite;
        }

        self.time += h;
        StepOutcome::Advanced { h }
    }

    fn build_coefficients(&mut self) {
        self.ws.reset();
        for v in 0..6 {
            self.ws.set(v, 0, self.state[v]);
        }

        for m in 0..=self.order {
            // Squared radius through order m.
            let sm = conv_at(self.ws.row(var::X), self.ws.row(var::X), m)
                + conv_at(self.ws.row(var::Y), self.ws.row(var::Y), m)
                + conv_at(self.ws.row(var::Z), self.ws.row(var::Z), m);
            self.ws.s.push(sm);

            // Radial distance r = s^{1/2}. Singular at the origin: the row
            // goes non-finite there and downstream consumers fall back to
            // bounds derived from the position rows.
            let rm = if m == 0 {
                sm.sqrt()
            } else {
                power_series_coeff(&self.ws.s, &self.ws.row(var::R)[..m], m, 0.5)
            };
            self.ws.set(var::R, m, rm);

            if m < self.order {
                let acc = self.dynamics.accel_coeffs(&mut self.ws, m, &self.pars);
                let inv = 1.0 / (m + 1) as f64;
                self.ws
                    .set(var::X, m + 1, self.ws.get(var::VX, m) * inv);
                self.ws
                    .set(var::Y, m + 1, self.ws.get(var::VY, m) * inv);
                self.ws
                    .set(var::Z, m + 1, self.ws.get(var::VZ, m) * inv);
                self.ws.set(var::VX, m + 1, acc[0] * inv);
                self.ws.set(var::VY, m + 1, acc[1] * inv);
                self.ws.set(var::VZ, m + 1, acc[2] * inv);
            }
        }
    }

    /// Stepsize from the trailing coefficient norms, scaled by the state
    /// magnitude. Returns `None` when the table is non-finite.
    fn select_stepsize(&self, max_h: f64) -> Option<f64> {
        let mut scale = 1.0_f64;
        for v in 0..6 {
            scale = scale.max(self.state[v].abs());
        }

        let mut h = f64::INFINITY;
        for k in [self.order - 1, self.order] {
            if k == 0 {
                continue;
            }
            let mut norm = 0.0_f64;
            for v in 0..7 {
                let c = self.ws.get(v, k);
                if c.is_finite() {
                    norm = norm.max(c.abs());
                } else if v != var::R {
                    return None;
                }
            }
            if norm > 0.0 {
                h = h.min((self.tol * scale / norm).powf(1.0 / k as f64));
            }
        }

        // Non-finite low-order coefficients are caught here even when the
        // trailing norms happen to be finite.
        for v in 0..6 {
            if !self.ws.get(v, 1).is_finite() {
                return None;
            }
        }

        let h = (h * 0.9).min(max_h);
        if h.is_finite() && h > 0.0 {
            Some(h)
        } else {
            None
        }
    }
}
