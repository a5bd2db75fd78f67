//! Pluggable event sinks.

use crate::events::{EventKind, SimEvent};

/// Trait for event consumers.
pub trait EventSink: Send {
    /// Processes a single event.
    fn handle(&mut self, event: &SimEvent);

    /// Called once at shutdown. Flush buffers, close files.
    fn finalize(&mut self) {}

    /// Human-readable sink name.
    fn name(&self) -> &str;
}

/// Collects events into a `Vec` for tests and inspection.
#[derive(Default)]
pub struct VecSink {
    pub events: Vec<SimEvent>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for VecSink {
    fn handle(&mut self, event: &SimEvent) {
        self.events.push(event.clone());
    }

    fn name(&self) -> &str {
        "vec_sink"
    }
}

/// Forwards events to the `tracing` subscriber.
///
/// Collisions and disabled particles log at WARN, everything else at the
/// configured base level (DEBUG by default).
pub struct TracingSink;

impl EventSink for TracingSink {
    fn handle(&mut self, event: &SimEvent) {
        match &event.kind {
            EventKind::CollisionDetected { i, j, time } => {
                tracing::warn!(step = event.step, i, j, time, "collision");
            }
            EventKind::ParticleDisabled { i, time } => {
                tracing::warn!(step = event.step, i, time, "particle disabled");
            }
            kind => {
                tracing::debug!(step = event.step, ?kind, "sim event");
            }
        }
    }

    fn name(&self) -> &str {
        "tracing_sink"
    }
}
