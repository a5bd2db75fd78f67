//! Telemetry event types.
//!
//! Events are lightweight value types tagged with the superstep index.
//! They carry enough data for monitoring and post-hoc analysis without
//! referencing any per-superstep buffer.

use serde::{Deserialize, Serialize};

/// One telemetry event from the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    /// Superstep number (0-indexed, monotonically increasing).
    pub step: u64,
    /// Event payload.
    pub kind: EventKind,
}

/// Event payload variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventKind {
    /// A superstep started.
    StepBegin {
        /// Simulation time at the superstep begin.
        time: f64,
        /// Number of particles entering the superstep.
        nparts: usize,
    },

    /// A superstep completed.
    StepEnd {
        /// Short tag of the returned outcome ("success", "collision", ...).
        outcome: String,
        /// Simulation time after the advance.
        time: f64,
    },

    /// Broad phase finished for one chunk.
    BroadPhase {
        /// Chunk index within the superstep.
        chunk: u32,
        /// Number of candidate AABB pairs.
        pairs: usize,
    },

    /// A collision was recorded by the narrow phase.
    CollisionDetected { i: usize, j: usize, time: f64 },

    /// A conjunction was recorded by the narrow phase.
    ConjunctionDetected {
        i: usize,
        j: usize,
        time: f64,
        dist: f64,
    },

    /// A particle was disabled for the rest of the superstep
    /// (non-finite state or divergent integration).
    ParticleDisabled { i: usize, time: f64 },
}

impl SimEvent {
    /// Creates an event for the given superstep.
    pub fn new(step: u64, kind: EventKind) -> Self {
        Self { step, kind }
    }
}
