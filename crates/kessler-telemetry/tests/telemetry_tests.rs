//! Integration tests for kessler-telemetry.

use std::sync::{Arc, Mutex};

use kessler_telemetry::{EventBus, EventKind, EventSink, SimEvent, VecSink};

/// Sink sharing its storage with the test body.
struct SharedSink(Arc<Mutex<Vec<SimEvent>>>);

impl EventSink for SharedSink {
    fn handle(&mut self, event: &SimEvent) {
        self.0.lock().unwrap().push(event.clone());
    }

    fn name(&self) -> &str {
        "shared_sink"
    }
}

fn step_begin(step: u64) -> SimEvent {
    SimEvent::new(
        step,
        EventKind::StepBegin {
            time: step as f64,
            nparts: 100,
        },
    )
}

#[test]
fn events_reach_registered_sink_on_flush() {
    let store = Arc::new(Mutex::new(Vec::new()));
    let mut bus = EventBus::new();
    bus.add_sink(Box::new(SharedSink(Arc::clone(&store))));

    bus.emit(step_begin(0));
    bus.emit(SimEvent::new(
        0,
        EventKind::CollisionDetected {
            i: 3,
            j: 7,
            time: 0.25,
        },
    ));
    assert!(store.lock().unwrap().is_empty(), "delivery only on flush");
    bus.flush();

    let events = store.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[1].kind,
        EventKind::CollisionDetected { i: 3, j: 7, .. }
    ));
}

#[test]
fn vec_sink_collects_events() {
    let mut probe = VecSink::new();
    probe.handle(&step_begin(1));
    assert_eq!(probe.events.len(), 1);
    assert_eq!(probe.name(), "vec_sink");
}

#[test]
fn disabled_bus_drops_events() {
    let mut bus = EventBus::new();
    bus.add_sink(Box::new(VecSink::new()));
    bus.set_enabled(false);
    assert!(!bus.is_enabled());
    bus.emit(step_begin(0));
    bus.flush(); // must not panic; nothing delivered
}

#[test]
fn bus_without_sinks_is_a_no_op() {
    let bus = EventBus::new();
    assert_eq!(bus.sink_count(), 0);
    bus.emit(step_begin(0));
}

#[test]
fn sender_handle_feeds_the_queue() {
    let mut bus = EventBus::new();
    bus.add_sink(Box::new(VecSink::new()));
    let tx = bus.sender();
    tx.send(step_begin(2)).unwrap();
    bus.flush();
}

#[test]
fn events_serialize_round_trip() {
    let ev = SimEvent::new(
        5,
        EventKind::ConjunctionDetected {
            i: 1,
            j: 2,
            time: 42.5,
            dist: 0.9,
        },
    );
    let json = serde_json::to_string(&ev).unwrap();
    let back: SimEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(back.step, 5);
    match back.kind {
        EventKind::ConjunctionDetected { i, j, dist, .. } => {
            assert_eq!((i, j), (1, 2));
            assert!((dist - 0.9).abs() < 1e-12);
        }
        other => panic!("wrong kind: {other:?}"),
    }
}
