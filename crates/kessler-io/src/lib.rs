//! # kessler-io
//!
//! The persistence boundary of the kessler engine.
//!
//! A [`SimSnapshot`] captures everything a simulation needs to resume:
//! particle state, parameters, the double-double clock, the full
//! configuration, and the identity of the dynamical model (or a rebuild
//! hint for custom models). Per-superstep buffers are never serialized.

pub mod contract;

pub use contract::{DynamicsId, SimSnapshot};
