//! Step outcomes.

use serde::{Deserialize, Serialize};

/// The result of one superstep.
///
/// Event times are absolute simulation times rounded to `f64`; the
/// driver's internal clock keeps the full double-double value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// The superstep completed with no interrupting event.
    Success,
    /// The earliest collision of the superstep.
    Collision { i: usize, j: usize, time: f64 },
    /// A particle crossed into the central body.
    Reentry { i: usize, time: f64 },
    /// A particle crossed the exit radius outward.
    Exit { i: usize, time: f64 },
    /// A particle's state became non-finite during propagation.
    NonFiniteState { i: usize, time: f64 },
}

impl Outcome {
    /// Short tag for telemetry and logs.
    pub fn tag(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Collision { .. } => "collision",
            Outcome::Reentry { .. } => "reentry",
            Outcome::Exit { .. } => "exit",
            Outcome::NonFiniteState { .. } => "err_nf_state",
        }
    }

    /// Whether the superstep was interrupted before its end.
    pub fn is_interrupting(&self) -> bool {
        !matches!(self, Outcome::Success)
    }
}
