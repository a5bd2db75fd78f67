//! Event bus — queued event dispatch with pluggable sinks.
//!
//! Emission goes through an `mpsc` channel so workers can report without
//! synchronizing on the sink list; the driver flushes the queue to the
//! sinks at the end of each superstep, after all parallel stages joined.

use std::sync::mpsc;

use crate::events::SimEvent;
use crate::sinks::EventSink;

/// Telemetry bus for the simulation driver.
///
/// Disabled by default: a bus with no sinks (or explicitly disabled)
/// drops events with no work beyond the flag test.
pub struct EventBus {
    sender: mpsc::Sender<SimEvent>,
    receiver: mpsc::Receiver<SimEvent>,
    sinks: Vec<Box<dyn EventSink>>,
    enabled: bool,
}

impl EventBus {
    /// Creates a bus with no sinks, enabled.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver,
            sinks: Vec::new(),
            enabled: true,
        }
    }

    /// Registers a sink.
    pub fn add_sink(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Number of registered sinks.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Enables or disables emission.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether events are currently accepted.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// A sender handle for emission from parallel workers.
    pub fn sender(&self) -> mpsc::Sender<SimEvent> {
        self.sender.clone()
    }

    /// Queues one event (no-op when disabled or without sinks).
    pub fn emit(&self, event: SimEvent) {
        if !self.enabled || self.sinks.is_empty() {
            return;
        }
        let _ = self.sender.send(event);
    }

    /// Delivers all queued events to the sinks. Called by the driver
    /// after the parallel stages of a superstep have joined.
    pub fn flush(&mut self) {
        while let Ok(event) = self.receiver.try_recv() {
            for sink in &mut self.sinks {
                sink.handle(&event);
            }
        }
    }

    /// Flushes and finalizes every sink.
    pub fn shutdown(&mut self) {
        self.flush();
        for sink in &mut self.sinks {
            sink.finalize();
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
