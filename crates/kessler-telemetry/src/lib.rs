//! # kessler-telemetry
//!
//! Structured telemetry for the simulation driver. The driver emits
//! [`SimEvent`]s during each superstep; pluggable sinks consume them
//! (in-memory capture, `tracing` logs, custom exporters).

pub mod bus;
pub mod events;
pub mod sinks;

pub use bus::EventBus;
pub use events::{EventKind, SimEvent};
pub use sinks::{EventSink, TracingSink, VecSink};
