//! Integration tests for kessler-prop.

use std::sync::Arc;

use approx::assert_relative_eq;
use kessler_prop::{
    CentralBody, Dynamics, FreeMotion, KeplerDynamics, Propagator, StepData, TaylorAdaptive,
};
use kessler_types::DFloat;

fn propagate(
    dynamics: Arc<dyn Dynamics>,
    state: &[f64],
    pars: &[f64],
    delta_t: f64,
) -> Vec<StepData> {
    let prop = Propagator::new(dynamics, f64::EPSILON, false);
    let mut s_data = vec![StepData::default(); state.len() / 7];
    let report = prop.propagate_all(
        state,
        pars,
        DFloat::ZERO,
        delta_t,
        CentralBody::Sphere(0.0),
        0.0,
        &mut s_data,
    );
    assert!(report.ste_vec.is_empty());
    assert!(report.err_nf_state_vec.is_empty());
    s_data
}

// ─── Propagation Tests ────────────────────────────────────────

#[test]
fn batch_groups_match_scalar_results() {
    // Six particles: one full batch of four plus a scalar remainder of two.
    let mut state = Vec::new();
    for i in 0..6 {
        let a = 1.0 + 0.1 * i as f64;
        state.extend_from_slice(&[a, 0.0, 0.0, 0.0, a.powf(-0.5), 0.0, 0.0]);
    }

    let s_data = propagate(Arc::new(KeplerDynamics::new(1.0)), &state, &[], 1.0);

    // Each particle independently: same initial conditions through a
    // standalone scalar integrator must land on the same state.
    for i in 0..6 {
        let mut ta = TaylorAdaptive::new(Arc::new(KeplerDynamics::new(1.0)), f64::EPSILON, false);
        ta.set_particle(&state[i * 7..i * 7 + 7], &[], DFloat::ZERO);
        let target = DFloat::from(1.0);
        let mut guard = 0;
        while ta.time() < target {
            let remaining = target.diff_f64(ta.time());
            if remaining <= 0.0 {
                break;
            }
            ta.step(remaining);
            guard += 1;
            assert!(guard < 10_000);
        }

        let mut out = [0.0; 7];
        s_data[i].eval_state(DFloat::ZERO, DFloat::from(1.0), false, &mut out);
        for v in 0..6 {
            assert_relative_eq!(out[v], ta.state()[v], epsilon = 1e-12);
        }
    }
}

#[test]
fn eccentric_orbit_conserves_energy() {
    // e ~ 0.5 orbit: v_apo < v_circ at apoapsis.
    let state = [2.0, 0.0, 0.0, 0.0, 0.4, 0.0, 0.0];
    let s_data = propagate(Arc::new(KeplerDynamics::new(1.0)), &state, &[], 10.0);

    let energy = |s: &[f64; 7]| {
        let r = (s[0] * s[0] + s[1] * s[1] + s[2] * s[2]).sqrt();
        let v2 = s[3] * s[3] + s[4] * s[4] + s[5] * s[5];
        0.5 * v2 - 1.0 / r
    };

    let mut out = [0.0; 7];
    s_data[0].eval_state(DFloat::ZERO, DFloat::ZERO, false, &mut out);
    let e0 = energy(&out);
    for k in 1..=20 {
        let t = 0.5 * k as f64;
        s_data[0].eval_state(DFloat::ZERO, DFloat::from(t), false, &mut out);
        assert_relative_eq!(energy(&out), e0, epsilon = 1e-11);
    }
}

#[test]
fn parameterized_mu_changes_trajectory() {
    let dynamics = Arc::new(KeplerDynamics::with_mu_parameter(1.0));
    let state = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0];

    let nominal = propagate(dynamics.clone(), &state, &[0.0], 1.0);
    let perturbed = propagate(dynamics, &state, &[0.1], 1.0);

    let mut a = [0.0; 7];
    let mut b = [0.0; 7];
    nominal[0].eval_state(DFloat::ZERO, DFloat::from(1.0), false, &mut a);
    perturbed[0].eval_state(DFloat::ZERO, DFloat::from(1.0), false, &mut b);
    assert!((a[0] - b[0]).abs() > 1e-4, "mu parameter had no effect");
}

#[test]
fn eval_state_clamps_outside_coverage() {
    let state = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
    let s_data = propagate(Arc::new(FreeMotion), &state, &[], 1.0);

    let mut out = [0.0; 7];
    // Past the last substep end: clamped to the superstep end state.
    s_data[0].eval_state(DFloat::ZERO, DFloat::from(5.0), false, &mut out);
    assert_relative_eq!(out[0], 2.0, epsilon = 1e-12);
    // Before the superstep: clamped to the initial state.
    s_data[0].eval_state(DFloat::ZERO, DFloat::from(-1.0), false, &mut out);
    assert_relative_eq!(out[0], 1.0, epsilon = 1e-12);
}

#[test]
fn triaxial_reentry_uses_substep_endpoints() {
    let prop = Propagator::new(Arc::new(FreeMotion), f64::EPSILON, false);
    // Heading into a flattened ellipsoid along x.
    let state = [2.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0];
    let mut s_data = vec![StepData::default()];
    let report = prop.propagate_all(
        &state,
        &[],
        DFloat::ZERO,
        3.0,
        CentralBody::Triaxial([1.0, 0.5, 0.5]),
        0.0,
        &mut s_data,
    );
    assert_eq!(report.ste_vec.len(), 1);
    let ev = report.ste_vec[0];
    // Fires at the first substep endpoint at or after the crossing (t = 1).
    assert!(ev.time >= 1.0 - 1e-9, "fired early: {}", ev.time);
    assert!(ev.time <= 3.0);
}
