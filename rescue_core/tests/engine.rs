use chrono::{DateTime, TimeDelta, Utc};
use rescue_core::mocks::RecordingSink;
use rescue_core::{
    CancelReason, EngineError, EngineEvent, EventBus, ExecutionEngine, Protocol, ProtocolStore,
    RunId,
};
use rescue_traits::{Clock, ManualClock, Timer, TimerCallback, TimerError, TimerHandle};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MIN: Duration = Duration::from_secs(60);

struct Rig {
    engine: ExecutionEngine,
    clock: ManualClock,
    store: Arc<ProtocolStore>,
    sink: Arc<RecordingSink>,
}

fn two_step(id: u32, name: &str) -> Protocol {
    Protocol::builder(id, name)
        .seizure_duration_threshold(2.0)
        .step(1.0, 5.0, "X")
        .step(1.0, 2.5, "Y")
        .build()
        .expect("valid protocol")
}

fn rig() -> Rig {
    let clock = ManualClock::new();
    let bus = Arc::new(EventBus::new());
    let sink = Arc::new(RecordingSink::new());
    bus.subscribe(sink.clone());
    let store = Arc::new(ProtocolStore::new(bus.clone()));
    store.register(two_step(1, "Two step")).unwrap();
    let engine = ExecutionEngine::new(
        store.clone(),
        bus,
        Arc::new(clock.clone()),
        Arc::new(clock.clone()),
    );
    sink.clear();
    Rig {
        engine,
        clock,
        store,
        sink,
    }
}

fn dose_runs(events: &[EngineEvent]) -> Vec<(RunId, f64)> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::DoseDue { run, dose_mg, .. } => Some((*run, *dose_mg)),
            _ => None,
        })
        .collect()
}

#[test]
fn two_step_protocol_runs_end_to_end() {
    let r = rig();
    let t0 = DateTime::<Utc>::UNIX_EPOCH;

    let run = r.engine.start(1).unwrap();
    assert!(r.engine.is_running());
    assert_eq!(
        r.sink.kinds(),
        vec!["protocol_started", "schedule_ready", "dose_due"]
    );

    let events = r.sink.events();
    match &events[1] {
        EngineEvent::ScheduleReady { schedule, .. } => {
            assert_eq!(schedule.len(), 2);
            assert_eq!(schedule[0].absolute_time, t0 + TimeDelta::minutes(1));
            assert_eq!(schedule[0].dose_mg, 5.0);
            assert_eq!(schedule[0].medication, "X");
            assert_eq!(schedule[1].absolute_time, t0 + TimeDelta::minutes(2));
            assert_eq!(schedule[1].dose_mg, 2.5);
            assert_eq!(schedule[1].medication, "Y");
        }
        other => panic!("expected schedule_ready, got {other:?}"),
    }
    match &events[2] {
        EngineEvent::DoseDue {
            at,
            dose_mg,
            medication,
            step_index,
            ..
        } => {
            assert_eq!(*at, t0);
            assert_eq!(*dose_mg, 5.0);
            assert_eq!(medication, "X");
            assert_eq!(*step_index, 0);
        }
        other => panic!("expected dose_due, got {other:?}"),
    }

    r.clock.advance(MIN);
    match r.sink.events().last() {
        Some(EngineEvent::DoseDue {
            at,
            dose_mg,
            medication,
            ..
        }) => {
            assert_eq!(*at, t0 + TimeDelta::minutes(1));
            assert_eq!(*dose_mg, 2.5);
            assert_eq!(medication, "Y");
        }
        other => panic!("expected second dose_due, got {other:?}"),
    }
    assert!(r.engine.is_running());

    r.clock.advance(MIN);
    assert_eq!(
        r.sink.kinds(),
        vec![
            "protocol_started",
            "schedule_ready",
            "dose_due",
            "dose_due",
            "protocol_completed"
        ]
    );
    assert_eq!(r.clock.now(), t0 + TimeDelta::minutes(2));
    assert!(!r.engine.is_running());
    assert!(r.sink.events().iter().all(|e| e.run() == Some(run)));
    assert_eq!(r.clock.pending(), 0);
}

#[test]
fn unknown_protocol_leaves_state_untouched() {
    let r = rig();
    assert_eq!(r.engine.start(99), Err(EngineError::ProtocolNotFound(99)));
    assert!(!r.engine.is_running());
    assert!(r.sink.events().is_empty());

    let run = r.engine.start(1).unwrap();
    r.sink.clear();
    assert!(r.engine.start(99).is_err());
    assert!(r.engine.is_running());
    assert!(r.sink.events().is_empty());
    assert!(matches!(
        r.engine.status(),
        rescue_core::EngineStatus::Running { run: current, .. } if current == run
    ));
}

#[test]
fn starting_b_preempts_a() {
    let r = rig();
    r.store.register(two_step(2, "B")).unwrap();
    r.sink.clear();

    let a = r.engine.start(1).unwrap();
    r.clock.advance(Duration::from_secs(30));
    let b = r.engine.start(2).unwrap();
    assert_ne!(a, b);
    r.clock.advance(10 * MIN);

    let events = r.sink.events();
    let preempted_at = events
        .iter()
        .position(|e| matches!(e, EngineEvent::ProtocolPreempted { run, .. } if *run == a))
        .expect("A preempted");
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, EngineEvent::ProtocolCompleted { run, .. } if *run == a))
    );
    assert!(
        events[preempted_at..]
            .iter()
            .all(|e| e.run() != Some(a) || e.is_terminal())
    );
    assert_eq!(dose_runs(&events), vec![(a, 5.0), (b, 5.0), (b, 2.5)]);
    assert_eq!(
        events.last().map(EngineEvent::kind),
        Some("protocol_completed")
    );
    assert!(!r.engine.is_running());
}

#[test]
fn restarting_the_same_protocol_preempts_the_old_run() {
    let r = rig();
    let first = r.engine.start(1).unwrap();
    let second = r.engine.start(1).unwrap();
    assert!(second > first);
    assert_eq!(r.clock.pending(), 1);
    r.clock.advance(2 * MIN);
    let kinds = r.sink.kinds();
    assert_eq!(kinds.iter().filter(|k| **k == "protocol_completed").count(), 1);
    assert_eq!(kinds.iter().filter(|k| **k == "protocol_preempted").count(), 1);
}

#[test]
fn cancel_when_idle_is_a_noop() {
    let r = rig();
    assert!(!r.engine.cancel());
    assert!(r.sink.events().is_empty());
}

#[test]
fn cancel_stops_remaining_doses() {
    let r = rig();
    let run = r.engine.start(1).unwrap();
    assert!(r.engine.cancel());
    r.clock.advance(10 * MIN);
    assert_eq!(
        r.sink.kinds(),
        vec![
            "protocol_started",
            "schedule_ready",
            "dose_due",
            "protocol_cancelled"
        ]
    );
    assert!(matches!(
        r.sink.events().last(),
        Some(EngineEvent::ProtocolCancelled { run: r2, reason: CancelReason::Manual, .. }) if *r2 == run
    ));
}

#[test]
fn reregistering_mid_run_keeps_the_snapshot() {
    let r = rig();
    let run = r.engine.start(1).unwrap();
    let replacement = Protocol::builder(1, "Replacement")
        .step(5.0, 9.0, "Z")
        .step(5.0, 9.0, "Z")
        .step(5.0, 9.0, "Z")
        .build()
        .unwrap();
    let old = r.store.register(replacement).unwrap().expect("replaced");
    assert_eq!(old.name, "Two step");

    r.clock.advance(2 * MIN);
    let events = r.sink.events();
    assert_eq!(dose_runs(&events), vec![(run, 5.0), (run, 2.5)]);
    assert!(matches!(
        events.last(),
        Some(EngineEvent::ProtocolCompleted { name, .. }) if name == "Two step"
    ));
    assert_eq!(r.store.get(1).unwrap().name, "Replacement");
}

#[test]
fn timer_failure_on_first_step_cancels_and_returns_error() {
    let r = rig();
    r.clock.refuse_arms(true);
    let err = r.engine.start(1).unwrap_err();
    assert!(matches!(err, EngineError::TimerArm(_)));
    assert!(!r.engine.is_running());
    assert!(matches!(
        r.sink.events().last(),
        Some(EngineEvent::ProtocolCancelled {
            reason: CancelReason::TimerFailure(_),
            ..
        })
    ));

    r.clock.refuse_arms(false);
    r.engine.start(1).expect("caller-initiated retry works");
}

#[test]
fn timer_failure_mid_run_returns_to_idle() {
    let r = rig();
    r.engine.start(1).unwrap();
    r.clock.refuse_arms(true);
    r.clock.advance(MIN);
    assert!(!r.engine.is_running());
    assert_eq!(
        r.sink.kinds(),
        vec![
            "protocol_started",
            "schedule_ready",
            "dose_due",
            "dose_due",
            "protocol_cancelled"
        ]
    );
}

#[test]
fn sinks_may_query_the_engine() {
    let r = rig();
    let engine = r.engine.clone();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    r.engine.bus().subscribe(Arc::new(move |e: &EngineEvent| {
        s.lock().unwrap().push((e.kind(), engine.is_running()));
    }));
    r.engine.start(1).unwrap();
    r.clock.advance(2 * MIN);
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.first(), Some(&("protocol_started", true)));
    assert_eq!(seen.last(), Some(&("protocol_completed", false)));
}

#[test]
fn concurrent_starts_leave_exactly_one_run() {
    let r = rig();
    let threads: Vec<_> = (0..8)
        .map(|_| {
            let engine = r.engine.clone();
            std::thread::spawn(move || engine.start(1).unwrap())
        })
        .collect();
    let runs: Vec<RunId> = threads.into_iter().map(|t| t.join().unwrap()).collect();
    assert_eq!(runs.len(), 8);
    assert_eq!(r.clock.pending(), 1);

    let kinds = r.sink.kinds();
    assert_eq!(kinds.iter().filter(|k| **k == "protocol_started").count(), 8);
    assert_eq!(kinds.iter().filter(|k| **k == "protocol_preempted").count(), 7);

    r.clock.advance(2 * MIN);
    let events = r.sink.events();
    let completed: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::ProtocolCompleted { .. }))
        .collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].run(), runs.iter().max().copied());
}

/// Timer whose handles never disarm, so callbacks can be fired after cancellation.
#[derive(Default)]
struct LeakyTimer {
    armed: Mutex<Vec<TimerCallback>>,
}

impl Timer for LeakyTimer {
    fn arm(&self, _delay: Duration, callback: TimerCallback) -> Result<TimerHandle, TimerError> {
        let mut armed = self.armed.lock().unwrap();
        armed.push(callback);
        Ok(TimerHandle::new(armed.len() as u64, || {}))
    }
}

#[test]
fn stale_timer_fire_is_ignored() {
    let clock = ManualClock::new();
    let bus = Arc::new(EventBus::new());
    let sink = Arc::new(RecordingSink::new());
    bus.subscribe(sink.clone());
    let store = Arc::new(ProtocolStore::new(bus.clone()));
    store.register(two_step(1, "A")).unwrap();
    store.register(two_step(2, "B")).unwrap();
    let timer = Arc::new(LeakyTimer::default());
    let engine = ExecutionEngine::new(store, bus, Arc::new(clock), timer.clone());

    engine.start(1).unwrap();
    let stale = timer.armed.lock().unwrap().remove(0);
    engine.start(2).unwrap();
    sink.clear();

    stale();
    assert!(sink.events().is_empty());
    assert_eq!(engine.current_step_index(), Some(1));

    engine.cancel();
    let fresh = timer.armed.lock().unwrap().remove(0);
    sink.clear();
    fresh();
    assert!(sink.events().is_empty());
    assert!(!engine.is_running());
}

#[test]
fn manual_events_do_not_touch_the_run() {
    let r = rig();
    r.engine.start(1).unwrap();
    r.engine.manual_dispense(1.0, "Diazepam").unwrap();
    r.engine.mark_seizure(rescue_core::SeizureMark::Start);
    assert_eq!(r.engine.current_step_index(), Some(1));
    assert_eq!(
        &r.sink.kinds()[3..],
        &["manual_dose", "seizure_marked"]
    );
}
