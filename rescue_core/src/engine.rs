//! Protocol execution state machine.
//!
//! At most one run is active. `start`, `cancel` and timer fires are
//! serialized behind one state lock; every armed timer carries the id of the
//! run it was armed for and is ignored once that run is gone.
//!
//! Events produced by a transition are delivered after the state lock is
//! released, strictly in transition order. Sinks may query the engine
//! (`is_running`, `status`) but must not call `start`/`cancel` from inside
//! `on_event`; hand such work to another thread (see [`ChannelSink`]).
//!
//! [`ChannelSink`]: crate::events::ChannelSink

use crate::error::{EngineError, Result};
use crate::events::{CancelReason, EngineEvent, EventBus, RunId, SeizureMark};
use crate::protocol::{Protocol, ProtocolId, UNKNOWN_MEDICATION};
use crate::schedule::{self, ScheduledDose};
use crate::store::ProtocolStore;
use chrono::{DateTime, Utc};
use rescue_traits::{Clock, Timer, TimerHandle};
use serde::Serialize;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

struct ActiveRun {
    id: RunId,
    protocol: Arc<Protocol>,
    schedule: Vec<ScheduledDose>,
    started_at: DateTime<Utc>,
    /// Index of the next step to dispatch, in `0..=steps.len()`
    step_index: usize,
    pending_timer: Option<TimerHandle>,
}

#[derive(Default)]
struct ExecutionState {
    generation: u64,
    next_ticket: u64,
    run: Option<ActiveRun>,
}

impl ExecutionState {
    fn take_ticket(&mut self) -> u64 {
        let t = self.next_ticket;
        self.next_ticket += 1;
        t
    }
}

/// Publishes event batches in ticket order.
#[derive(Default)]
struct Delivery {
    turn: Mutex<u64>,
    cv: Condvar,
}

/// Advances the turn even if a sink panics mid-batch.
struct TurnGuard<'a>(&'a Delivery);

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        let mut turn = self.0.turn.lock().unwrap_or_else(PoisonError::into_inner);
        *turn += 1;
        self.0.cv.notify_all();
    }
}

/// Snapshot of the engine for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EngineStatus {
    Idle,
    Running {
        run: RunId,
        protocol_id: ProtocolId,
        name: String,
        started_at: DateTime<Utc>,
        /// Next step to dispatch; equals `total_steps` while the last window runs
        step_index: usize,
        total_steps: usize,
        /// Schedule entries whose windows have not closed yet
        remaining: Vec<ScheduledDose>,
    },
}

impl EngineStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

struct Inner {
    store: Arc<ProtocolStore>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    timer: Arc<dyn Timer>,
    state: Mutex<ExecutionState>,
    delivery: Delivery,
}

/// Cheaply cloneable handle to the engine.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<ProtocolStore>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        timer: Arc<dyn Timer>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                bus,
                clock,
                timer,
                state: Mutex::new(ExecutionState::default()),
                delivery: Delivery::default(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<ProtocolStore> {
        &self.inner.store
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    /// Start protocol `id`, pre-empting any active run.
    ///
    /// An unknown id leaves the engine untouched. A timer failure while
    /// arming step 0 cancels the new run and is returned as `TimerArm`.
    pub fn start(&self, id: ProtocolId) -> Result<RunId> {
        self.inner.start(id)
    }

    /// Cancel the active run. Returns false when the engine was idle.
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_state().run.is_some()
    }

    pub fn current_step_index(&self) -> Option<usize> {
        self.inner.lock_state().run.as_ref().map(|r| r.step_index)
    }

    pub fn status(&self) -> EngineStatus {
        let st = self.inner.lock_state();
        match st.run.as_ref() {
            None => EngineStatus::Idle,
            Some(run) => EngineStatus::Running {
                run: run.id,
                protocol_id: run.protocol.id,
                name: run.protocol.name.clone(),
                started_at: run.started_at,
                step_index: run.step_index,
                total_steps: run.protocol.steps.len(),
                remaining: run
                    .schedule
                    .iter()
                    .skip(run.step_index.saturating_sub(1))
                    .cloned()
                    .collect(),
            },
        }
    }

    /// Operator-initiated dose outside any protocol run.
    pub fn manual_dispense(&self, dose_mg: f64, medication: &str) -> Result<()> {
        if !(dose_mg.is_finite() && dose_mg > 0.0) {
            return Err(EngineError::InvalidDose(format!(
                "dose must be a finite number > 0 mg, got {dose_mg}"
            )));
        }
        let medication = match medication.trim() {
            "" => UNKNOWN_MEDICATION.to_string(),
            m => m.to_string(),
        };
        tracing::info!(dose_mg, medication = %medication, "manual dose");
        let at = self.inner.clock.now();
        self.inner.emit(EngineEvent::ManualDose {
            at,
            dose_mg,
            medication,
        });
        Ok(())
    }

    pub fn mark_seizure(&self, mark: SeizureMark) {
        tracing::info!(?mark, "seizure marked");
        let at = self.inner.clock.now();
        self.inner.emit(EngineEvent::SeizureMarked { at, mark });
    }

    /// Record a positive detection on the event stream.
    pub fn record_detection(&self) {
        let at = self.inner.clock.now();
        self.inner.emit(EngineEvent::SeizureDetected { at });
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, ExecutionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `events` once every earlier ticket has been delivered.
    fn deliver(&self, ticket: u64, events: &[EngineEvent]) {
        {
            let mut turn = self
                .delivery
                .turn
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            while *turn != ticket {
                turn = self
                    .delivery
                    .cv
                    .wait(turn)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        let _advance = TurnGuard(&self.delivery);
        for event in events {
            self.bus.publish(event);
        }
    }

    /// Single event outside any run transition.
    fn emit(&self, event: EngineEvent) {
        let ticket = self.lock_state().take_ticket();
        self.deliver(ticket, std::slice::from_ref(&event));
    }

    fn start(self: &Arc<Self>, id: ProtocolId) -> Result<RunId> {
        let protocol = self.store.get(id).ok_or_else(|| {
            tracing::warn!(protocol_id = id, "start requested for unknown protocol");
            EngineError::ProtocolNotFound(id)
        })?;

        let mut events = Vec::new();
        let (ticket, outcome) = {
            let mut st = self.lock_state();
            if let Some(prev) = st.run.take() {
                tracing::info!(
                    run = %prev.id,
                    protocol_id = prev.protocol.id,
                    name = %prev.protocol.name,
                    "protocol preempted"
                );
                events.push(EngineEvent::ProtocolPreempted {
                    run: prev.id,
                    protocol_id: prev.protocol.id,
                    name: prev.protocol.name.clone(),
                });
                // dropping the run disarms its timer before a new one is armed
                drop(prev);
            }

            st.generation += 1;
            let run = RunId(st.generation);
            let now = self.clock.now();
            let schedule = schedule::build(&protocol, now);
            tracing::info!(
                %run,
                protocol_id = protocol.id,
                name = %protocol.name,
                steps = protocol.steps.len(),
                "protocol started"
            );
            events.push(EngineEvent::ProtocolStarted {
                run,
                protocol_id: protocol.id,
                name: protocol.name.clone(),
            });
            events.push(EngineEvent::ScheduleReady {
                run,
                protocol_id: protocol.id,
                schedule: schedule.clone(),
            });
            st.run = Some(ActiveRun {
                id: run,
                protocol,
                schedule,
                started_at: now,
                step_index: 0,
                pending_timer: None,
            });
            let outcome = self.dispatch(&mut st, &mut events).map(|()| run);
            (st.take_ticket(), outcome)
        };
        self.deliver(ticket, &events);
        outcome
    }

    /// Emit `dose_due` for the next step and arm the timer closing its window.
    /// On arm failure the run is cleared and cancelled with `TimerFailure`.
    fn dispatch(
        self: &Arc<Self>,
        st: &mut ExecutionState,
        events: &mut Vec<EngineEvent>,
    ) -> Result<()> {
        let Some(run) = st.run.as_mut() else {
            return Ok(());
        };
        let index = run.step_index;
        let Some(step) = run.protocol.steps.get(index).cloned() else {
            return Ok(());
        };

        let at = self.clock.now();
        tracing::info!(
            run = %run.id,
            step = index,
            dose_mg = step.dose_mg,
            medication = %step.medication,
            "dose due"
        );
        events.push(EngineEvent::DoseDue {
            run: run.id,
            protocol_id: run.protocol.id,
            protocol: run.protocol.name.clone(),
            step_index: index,
            dose_mg: step.dose_mg,
            medication: step.medication.clone(),
            at,
        });
        run.step_index = index + 1;
        // replacing the fired handle below is a no-op disarm
        run.pending_timer = None;

        let weak: Weak<Self> = Arc::downgrade(self);
        let tag = run.id;
        let armed = self.timer.arm(
            step.delay(),
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_timer(tag);
                }
            }),
        );

        match armed {
            Ok(handle) => {
                run.pending_timer = Some(handle);
                Ok(())
            }
            Err(e) => {
                let msg = e.to_string();
                if let Some(failed) = st.run.take() {
                    tracing::error!(
                        run = %failed.id,
                        protocol_id = failed.protocol.id,
                        error = %msg,
                        "timer arm failed; run cancelled"
                    );
                    events.push(EngineEvent::ProtocolCancelled {
                        run: failed.id,
                        protocol_id: failed.protocol.id,
                        name: failed.protocol.name.clone(),
                        reason: CancelReason::TimerFailure(msg.clone()),
                    });
                }
                Err(EngineError::TimerArm(msg))
            }
        }
    }

    fn on_timer(self: &Arc<Self>, tag: RunId) {
        let mut events = Vec::new();
        let ticket = {
            let mut st = self.lock_state();
            let Some(run) = st.run.as_mut() else {
                tracing::debug!(run = %tag, "stale timer fire ignored (idle)");
                return;
            };
            if run.id != tag {
                tracing::debug!(run = %tag, current = %run.id, "stale timer fire ignored");
                return;
            }

            if run.step_index >= run.protocol.steps.len() {
                if let Some(done) = st.run.take() {
                    tracing::info!(
                        run = %done.id,
                        protocol_id = done.protocol.id,
                        name = %done.protocol.name,
                        "protocol completed"
                    );
                    events.push(EngineEvent::ProtocolCompleted {
                        run: done.id,
                        protocol_id: done.protocol.id,
                        name: done.protocol.name.clone(),
                    });
                }
            } else if let Err(e) = self.dispatch(&mut st, &mut events) {
                tracing::debug!(error = %e, "dispatch from timer failed");
            }
            st.take_ticket()
        };
        self.deliver(ticket, &events);
    }

    fn cancel(&self) -> bool {
        let (ticket, event) = {
            let mut st = self.lock_state();
            let Some(run) = st.run.take() else {
                tracing::debug!("cancel on idle engine");
                return false;
            };
            st.generation += 1;
            tracing::info!(
                run = %run.id,
                protocol_id = run.protocol.id,
                name = %run.protocol.name,
                step = run.step_index,
                "protocol cancelled"
            );
            let event = EngineEvent::ProtocolCancelled {
                run: run.id,
                protocol_id: run.protocol.id,
                name: run.protocol.name.clone(),
                reason: CancelReason::Manual,
            };
            drop(run);
            (st.take_ticket(), event)
        };
        self.deliver(ticket, std::slice::from_ref(&event));
        true
    }
}
