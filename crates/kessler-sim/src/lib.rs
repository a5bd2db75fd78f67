//! # kessler-sim
//!
//! The simulation driver: owns the particle state, orchestrates the
//! superstep pipeline (propagate → per-chunk AABB/Morton/BVH/broad/narrow),
//! selects the earliest terminal event, and exposes the public stepping
//! and configuration API.
//!
//! ## Pipeline
//!
//! [`Sim::step`] runs one superstep of `n_par_ct` chunks and returns an
//! [`Outcome`]: success, the earliest collision, reentry, exit, or a
//! non-finite-state report. Conjunctions accumulate across steps and are
//! retrieved with [`Sim::conjunctions`].

pub mod config;
pub mod outcome;
pub mod sim;

pub use config::SimConfig;
pub use outcome::Outcome;
pub use sim::Sim;

// Re-exports for callers assembling a simulation.
pub use kessler_detect::Conjunction;
pub use kessler_prop::{CentralBody, Dynamics, FreeMotion, KeplerDynamics};
pub use kessler_telemetry::{EventBus, EventKind, SimEvent};
pub use kessler_types::{DFloat, KesslerError, KesslerResult};
