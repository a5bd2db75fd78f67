//! # kessler-prop
//!
//! Taylor propagation with dense polynomial output.
//!
//! Each superstep, every particle is advanced by an adaptive high-order
//! Taylor integrator whose per-substep coefficients are captured into
//! [`StepData`]. The integrators live in concurrent pools and are driven
//! in parallel by the [`Propagator`].
//!
//! ## Key Types
//!
//! - [`Dynamics`] — pluggable acceleration recurrences (the boundary to the
//!   symbolic/compiled layer)
//! - [`TaylorAdaptive`] — scalar adaptive Taylor integrator
//! - [`TaylorAdaptiveBatch`] — lane-packed batch variant
//! - [`Propagator`] — per-superstep parallel driver with terminal events

pub mod batch;
pub mod cache;
pub mod dynamics;
pub mod propagator;
pub mod taylor;

pub use batch::{TaylorAdaptiveBatch, BATCH_LANES};
pub use cache::IntegratorCaches;
pub use dynamics::{Dynamics, FreeMotion, KeplerDynamics, TaylorWorkspace};
pub use propagator::{
    CentralBody, PropagationReport, Propagator, StepData, TerminalCode, TerminalEvent,
};
pub use taylor::{order_for_tol, StepOutcome, TaylorAdaptive};

/// Variable indices inside the 7-row Taylor coefficient tables.
pub mod var {
    /// Position components.
    pub const X: usize = 0;
    pub const Y: usize = 1;
    pub const Z: usize = 2;
    /// Velocity components.
    pub const VX: usize = 3;
    pub const VY: usize = 4;
    pub const VZ: usize = 5;
    /// Radial distance from the origin.
    pub const R: usize = 6;
}
