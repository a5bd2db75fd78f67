//! End-to-end tests for the simulation driver.

use std::collections::BTreeSet;
use std::sync::Arc;

use approx::assert_relative_eq;
use kessler_sim::{
    CentralBody, FreeMotion, KeplerDynamics, KesslerError, Outcome, Sim, SimConfig,
};

fn free_sim(state: Vec<f64>, ct: f64, n_par_ct: u32) -> Sim {
    let mut config = SimConfig::with_ct(ct);
    config.n_par_ct = n_par_ct;
    Sim::new(state, Vec::new(), Arc::new(FreeMotion), config).unwrap()
}

// ─── Construction & Defaults ──────────────────────────────────

#[test]
fn default_sim_is_empty() {
    let s = Sim::default();
    assert_eq!(s.nparts(), 0);
    assert_eq!(s.config().ct, 1.0);
}

#[test]
fn empty_sim_has_expected_defaults() {
    let s = Sim::with_defaults(Vec::new(), 1.0).unwrap();
    assert_eq!(s.nparts(), 0);
    assert!(s.state().is_empty());
    assert!(s.pars().is_empty());
    assert_eq!(s.time().to_f64(), 0.0);
    assert_eq!(s.config().ct, 1.0);
    assert_eq!(s.config().tol, f64::EPSILON);
    assert!(!s.config().high_accuracy);
    assert_eq!(s.npars(), 0);
}

#[test]
fn state_size_must_be_multiple_of_seven() {
    let err = Sim::with_defaults(vec![0.1], 1.0).unwrap_err();
    assert_eq!(
        err.to_string(),
        "The size of the state vector is 1, which is not a multiple of 7"
    );
}

#[test]
fn pars_must_be_empty_without_dynamics_parameters() {
    let state = vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
    let err = Sim::new(
        state,
        vec![0.1],
        Arc::new(KeplerDynamics::new(1.0)),
        SimConfig::default(),
    )
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "The input array of parameter values must be empty when the number of parameters \
         in the dynamics is zero"
    );
}

#[test]
fn pars_shape_is_validated() {
    let state = vec![
        1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, //
        1.5, 0.0, 0.0, 0.0, 0.8, 0.0, 0.0,
    ];
    let err = Sim::new(
        state,
        vec![0.1],
        Arc::new(KeplerDynamics::with_mu_parameter(1.0)),
        SimConfig::default(),
    )
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "The input array of parameter values must have shape (2, 1), but instead its \
         flattened size is 1"
    );
}

#[test]
fn empty_pars_mean_zeroes() {
    let state = vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
    let s = Sim::new(
        state,
        Vec::new(),
        Arc::new(KeplerDynamics::with_mu_parameter(1.0)),
        SimConfig::default(),
    )
    .unwrap();
    assert_eq!(s.pars(), &[0.0]);
}

// ─── State & Parameter Management ─────────────────────────────

#[test]
fn set_new_state_pars_round_trips_bitwise() {
    let mut s = Sim::with_defaults(Vec::new(), 0.5).unwrap();
    let state = vec![
        0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, //
        1.1, 1.2, 1.3, 1.4, 1.5, 1.6, 1.7,
    ];
    s.set_new_state_pars(state.clone(), Vec::new()).unwrap();
    assert_eq!(s.state(), &state[..]);
    assert_eq!(s.nparts(), 2);

    // A failed update leaves everything unchanged.
    assert!(s.set_new_state_pars(vec![0.1], Vec::new()).is_err());
    assert_eq!(s.state(), &state[..]);
}

#[test]
fn remove_particles_empty_is_a_no_op() {
    let state = vec![
        0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, //
        0.2, 0.2, 0.2, 0.2, 0.2, 0.2, 0.2,
    ];
    let mut s = Sim::with_defaults(state.clone(), 0.5).unwrap();
    s.remove_particles(&[]).unwrap();
    assert_eq!(s.state(), &state[..]);
}

#[test]
fn remove_particles_compacts_and_dedups() {
    let state = vec![
        0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, //
        0.2, 0.2, 0.2, 0.2, 0.2, 0.2, 0.2,
    ];
    let mut s = Sim::with_defaults(state, 0.5).unwrap();

    // Repeated indices are allowed.
    s.remove_particles(&[1, 1]).unwrap();
    assert_eq!(s.state(), &[0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1]);

    s.remove_particles(&[0, 0]).unwrap();
    assert!(s.state().is_empty());
}

#[test]
fn remove_particles_rejects_invalid_indices() {
    let mut s = Sim::with_defaults(Vec::new(), 1.0).unwrap();
    let err = s.remove_particles(&[3, 1, 2]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "An invalid vector of indices was passed to the function for particle removal: [1, 2, 3]"
    );
    assert!(matches!(err, KesslerError::InvalidIndices(_)));
}

#[test]
fn removal_shifts_later_indices_down() {
    // Old index 4 becomes new index 2 after removing {1, 3}.
    let mut state = Vec::new();
    for i in 0..5 {
        let v = i as f64;
        state.extend_from_slice(&[v, v, v, v, v, v, 0.0]);
    }
    let mut s = Sim::with_defaults(state, 1.0).unwrap();
    s.remove_particles(&[1, 3]).unwrap();
    assert_eq!(s.nparts(), 3);
    assert_eq!(s.state()[2 * 7], 4.0);
}

// ─── Boundary Behaviors ───────────────────────────────────────

#[test]
fn empty_sim_step_advances_time() {
    let mut s = free_sim(Vec::new(), 0.25, 8);
    let outcome = s.step().unwrap();
    assert_eq!(outcome, Outcome::Success);
    assert_relative_eq!(s.time().to_f64(), 2.0, max_relative = 1e-15);
}

#[test]
fn zero_conj_thresh_emits_no_conjunctions() {
    // Two particles passing within 0.2 of each other.
    let state = vec![
        -5.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, //
        5.0, 0.2, 0.0, -1.0, 0.0, 0.0, 0.0,
    ];
    let mut s = free_sim(state, 10.0, 1);
    let outcome = s.step().unwrap();
    assert_eq!(outcome, Outcome::Success);
    assert!(s.conjunctions().is_empty());
}

#[test]
fn co_located_pair_collides_at_time_zero() {
    let state = vec![
        1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 0.1, //
        1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 0.1,
    ];
    let mut s = free_sim(state, 1.0, 1);
    match s.step().unwrap() {
        Outcome::Collision { i, j, time } => {
            assert_eq!((i, j), (0, 1));
            assert_eq!(time, 0.0);
        }
        other => panic!("expected collision, got {other:?}"),
    }
    // The clock does not advance past the event.
    assert_eq!(s.time().to_f64(), 0.0);
}

#[test]
fn grazing_pair_within_epsilon_is_a_collision() {
    // Minimum distance 1.0 against a combined radius marginally larger:
    // the closed inequality must report the graze.
    let r = 0.5 + 1e-9;
    let state = vec![
        -2.0, 0.0, 0.0, 1.0, 0.0, 0.0, r, //
        2.0, 1.0, 0.0, -1.0, 0.0, 0.0, r,
    ];
    let mut s = free_sim(state, 4.0, 1);
    match s.step().unwrap() {
        Outcome::Collision { i, j, time } => {
            assert_eq!((i, j), (0, 1));
            assert!((time - 2.0).abs() < 1e-3, "graze at {time}");
        }
        other => panic!("expected collision, got {other:?}"),
    }
}

// ─── End-to-End Scenarios ─────────────────────────────────────

#[test]
fn keplerian_orbit_closes_after_one_period() {
    let state0 = vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
    let period = 2.0 * std::f64::consts::PI;
    let mut config = SimConfig::with_ct(period / 16.0);
    config.n_par_ct = 16;
    let mut s = Sim::new(
        state0.clone(),
        Vec::new(),
        Arc::new(KeplerDynamics::new(1.0)),
        config,
    )
    .unwrap();

    let outcome = s.step().unwrap();
    assert_eq!(outcome, Outcome::Success);
    assert_relative_eq!(s.time().to_f64(), period, max_relative = 1e-15);
    for v in 0..6 {
        assert!(
            (s.state()[v] - state0[v]).abs() < 1e-10,
            "component {v}: {} vs {}",
            s.state()[v],
            state0[v]
        );
    }
}

#[test]
fn head_on_collision_is_reported_in_band() {
    let state = vec![
        -1.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.05, //
        1.0, 0.0, 0.0, -0.5, 0.0, 0.0, 0.05,
    ];
    let mut s = free_sim(state, 0.1, 20);
    match s.step().unwrap() {
        Outcome::Collision { i, j, time } => {
            assert_eq!((i, j), (0, 1));
            assert!(
                (1.9 - 1e-9..=1.91).contains(&time),
                "collision at {time}"
            );
            // The authoritative state is advanced to the event time.
            assert_relative_eq!(s.time().to_f64(), time, max_relative = 1e-15);
            let gap = s.state()[7] - s.state()[0];
            assert_relative_eq!(gap, 0.1, epsilon = 1e-6);
        }
        other => panic!("expected collision, got {other:?}"),
    }
}

#[test]
fn grazing_conjunction_is_reported_once() {
    let state = vec![
        -5.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, //
        5.0, 1.0, 0.0, -1.0, 0.0, 0.0, 0.0,
    ];
    let mut config = SimConfig::with_ct(10.0);
    config.conj_thresh = 1.001;
    let mut s = Sim::new(state, Vec::new(), Arc::new(FreeMotion), config).unwrap();

    assert_eq!(s.step().unwrap(), Outcome::Success);
    let conj = s.conjunctions();
    assert_eq!(conj.len(), 1);
    let c = &conj[0];
    assert_eq!((c.i, c.j), (0, 1));
    assert_relative_eq!(c.dist, 1.0, epsilon = 1e-9);
    assert_relative_eq!(c.time, 5.0, epsilon = 1e-6);
}

#[test]
fn reentry_preempts_later_collision() {
    let state = vec![
        // Plunges through the reentry sphere at t = 0.5.
        0.6, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, //
        // This pair would collide at t = 0.8.
        -0.45, 5.0, 0.0, 0.5, 0.0, 0.0, 0.05, //
        0.45, 5.0, 0.0, -0.5, 0.0, 0.0, 0.05,
    ];
    let mut config = SimConfig::with_ct(0.1);
    config.n_par_ct = 20;
    config.reentry_radius = CentralBody::Sphere(0.1);
    let mut s = Sim::new(state, Vec::new(), Arc::new(FreeMotion), config).unwrap();

    match s.step().unwrap() {
        Outcome::Reentry { i, time } => {
            assert_eq!(i, 0);
            assert_relative_eq!(time, 0.5, epsilon = 1e-6);
        }
        other => panic!("expected reentry, got {other:?}"),
    }
    assert_relative_eq!(s.time().to_f64(), 0.5, epsilon = 1e-6);
}

#[test]
fn exit_radius_reports_escape() {
    let state = vec![10.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
    let mut config = SimConfig::with_ct(10.0);
    config.exit_radius = 15.0;
    let mut s = Sim::new(state, Vec::new(), Arc::new(FreeMotion), config).unwrap();
    match s.step().unwrap() {
        Outcome::Exit { i, time } => {
            assert_eq!(i, 0);
            assert_relative_eq!(time, 5.0, epsilon = 1e-6);
        }
        other => panic!("expected exit, got {other:?}"),
    }
}

#[test]
fn collision_whitelist_filters_pairs() {
    // Three mutually-overlapping static particles.
    let state = vec![
        0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.6, //
        0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.6, //
        0.0, 0.5, 0.0, 0.0, 0.0, 0.0, 0.6,
    ];
    let mut config = SimConfig::with_ct(1.0);
    config.coll_whitelist = BTreeSet::from([0]);
    let mut s = Sim::new(state, Vec::new(), Arc::new(FreeMotion), config).unwrap();

    match s.step().unwrap() {
        Outcome::Collision { i, j, .. } => {
            assert!(i == 0 || j == 0, "pair ({i}, {j}) skips the whitelist");
            // Lexicographic tie-break at equal times picks (0, 1).
            assert_eq!((i, j), (0, 1));
        }
        other => panic!("expected collision, got {other:?}"),
    }
}

#[test]
fn removal_matches_fresh_simulation() {
    // Five well-separated circular orbits.
    let mut state = Vec::new();
    for i in 0..5 {
        let a: f64 = 1.0 + 0.5 * i as f64;
        state.extend_from_slice(&[a, 0.0, 0.0, 0.0, a.powf(-0.5), 0.0, 0.0]);
    }
    let dynamics = Arc::new(KeplerDynamics::new(1.0));

    let mut pruned = Sim::new(
        state.clone(),
        Vec::new(),
        dynamics.clone(),
        SimConfig::with_ct(0.5),
    )
    .unwrap();
    pruned.remove_particles(&[1, 3]).unwrap();

    let survivors: Vec<f64> = [0_usize, 2, 4]
        .iter()
        .flat_map(|&i| state[i * 7..(i + 1) * 7].to_vec())
        .collect();
    let mut fresh = Sim::new(survivors, Vec::new(), dynamics, SimConfig::with_ct(0.5)).unwrap();

    assert_eq!(pruned.state(), fresh.state());
    pruned.step().unwrap();
    fresh.step().unwrap();
    for (a, b) in pruned.state().iter().zip(fresh.state()) {
        assert_relative_eq!(a, b, epsilon = 1e-12);
    }
}

#[test]
fn cloned_sim_steps_identically() {
    let state = vec![
        1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.01, //
        -1.2, 0.0, 0.0, 0.0, -0.9, 0.0, 0.01,
    ];
    let mut a = Sim::new(
        state,
        Vec::new(),
        Arc::new(KeplerDynamics::new(1.0)),
        SimConfig::with_ct(0.25),
    )
    .unwrap();
    let mut b = a.clone();

    let oa = a.step().unwrap();
    let ob = b.step().unwrap();
    assert_eq!(oa, ob);
    assert_eq!(a.state(), b.state());
    assert_eq!(a.time(), b.time());
}

#[test]
fn repeated_steps_accumulate_time_exactly() {
    let state = vec![5.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
    let mut s = free_sim(state, 0.125, 4);
    for _ in 0..100 {
        assert_eq!(s.step().unwrap(), Outcome::Success);
    }
    assert_relative_eq!(s.time().to_f64(), 50.0, max_relative = 1e-15);
}

// ─── Telemetry Integration ────────────────────────────────────

#[test]
fn event_bus_sees_step_lifecycle() {
    use kessler_sim::{EventBus, EventKind, SimEvent};
    use std::sync::{Arc as SArc, Mutex};

    struct Capture(SArc<Mutex<Vec<SimEvent>>>);
    impl kessler_telemetry::EventSink for Capture {
        fn handle(&mut self, event: &SimEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
        fn name(&self) -> &str {
            "capture"
        }
    }

    let store = SArc::new(Mutex::new(Vec::new()));
    let mut bus = EventBus::new();
    bus.add_sink(Box::new(Capture(SArc::clone(&store))));

    let state = vec![3.0, 0.0, 0.0, 0.0, 0.1, 0.0, 0.0];
    let mut s = free_sim(state, 0.5, 2);
    s.set_event_bus(bus);
    s.step().unwrap();

    let events = store.lock().unwrap();
    assert!(matches!(events.first().unwrap().kind, EventKind::StepBegin { .. }));
    assert!(matches!(events.last().unwrap().kind, EventKind::StepEnd { .. }));
    let bp_count = events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::BroadPhase { .. }))
        .count();
    assert_eq!(bp_count, 2, "one broad-phase event per chunk");
}

// ─── Setter Validation ────────────────────────────────────────

#[test]
fn setters_validate_and_leave_state_unchanged() {
    let mut s = Sim::with_defaults(Vec::new(), 1.0).unwrap();

    assert!(s.set_ct(-1.0).is_err());
    assert_eq!(s.config().ct, 1.0);

    assert!(s.set_n_par_ct(0).is_err());
    assert_eq!(s.config().n_par_ct, 1);

    assert!(s.set_conj_thresh(f64::NAN).is_err());
    assert_eq!(s.config().conj_thresh, 0.0);

    assert!(s.set_min_coll_radius(-0.5).is_err());
    s.set_min_coll_radius(0.25).unwrap();
    assert_eq!(s.config().min_coll_radius, 0.25);

    assert!(s
        .set_reentry_radius(CentralBody::Triaxial([1.0, -1.0, 1.0]))
        .is_err());
    s.set_reentry_radius(CentralBody::Triaxial([1.0, 1.0, 0.5]))
        .unwrap();

    let err = s.set_coll_whitelist(BTreeSet::from([5])).unwrap_err();
    assert!(err.to_string().contains("out of range"));
}

#[test]
fn min_coll_radius_deactivates_small_particles() {
    // Radii at the threshold are inactive (strict inequality).
    let state = vec![
        0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.05, //
        0.05, 0.0, 0.0, 0.0, 0.0, 0.0, 0.05,
    ];
    let mut config = SimConfig::with_ct(1.0);
    config.min_coll_radius = 0.05;
    let mut s = Sim::new(state, Vec::new(), Arc::new(FreeMotion), config).unwrap();
    assert_eq!(s.step().unwrap(), Outcome::Success);
}
