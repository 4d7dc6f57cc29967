//! Engine event stream.
//!
//! Every observer (console, JSONL log, simulated pump, UI) implements
//! [`EventSink`] and is registered on an [`EventBus`]. The engine delivers
//! events in transition order; per run the order is `ProtocolStarted`,
//! `ScheduleReady`, zero or more `DoseDue`, then exactly one of
//! `ProtocolCompleted`, `ProtocolCancelled`, `ProtocolPreempted`.

use crate::protocol::ProtocolId;
use crate::schedule::ScheduledDose;
use chrono::{DateTime, Utc};
use crossbeam_channel as xch;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};

/// Generation tag of one protocol run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Operator override
    Manual,
    /// The timer backend refused to arm the next step
    TimerFailure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SeizureMark {
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListChange {
    Registered,
    Replaced,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    ProtocolStarted {
        run: RunId,
        protocol_id: ProtocolId,
        name: String,
    },
    ScheduleReady {
        run: RunId,
        protocol_id: ProtocolId,
        schedule: Vec<ScheduledDose>,
    },
    DoseDue {
        run: RunId,
        protocol_id: ProtocolId,
        protocol: String,
        step_index: usize,
        dose_mg: f64,
        medication: String,
        at: DateTime<Utc>,
    },
    ProtocolCompleted {
        run: RunId,
        protocol_id: ProtocolId,
        name: String,
    },
    ProtocolCancelled {
        run: RunId,
        protocol_id: ProtocolId,
        name: String,
        reason: CancelReason,
    },
    ProtocolPreempted {
        run: RunId,
        protocol_id: ProtocolId,
        name: String,
    },
    ProtocolListChanged {
        protocol_id: ProtocolId,
        change: ListChange,
    },
    SeizureDetected {
        at: DateTime<Utc>,
    },
    SeizureMarked {
        at: DateTime<Utc>,
        mark: SeizureMark,
    },
    ManualDose {
        at: DateTime<Utc>,
        dose_mg: f64,
        medication: String,
    },
}

impl EngineEvent {
    /// Run this event belongs to, for run lifecycle events.
    pub fn run(&self) -> Option<RunId> {
        match self {
            Self::ProtocolStarted { run, .. }
            | Self::ScheduleReady { run, .. }
            | Self::DoseDue { run, .. }
            | Self::ProtocolCompleted { run, .. }
            | Self::ProtocolCancelled { run, .. }
            | Self::ProtocolPreempted { run, .. } => Some(*run),
            _ => None,
        }
    }

    /// Stable snake_case name, matching the serialized `event` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProtocolStarted { .. } => "protocol_started",
            Self::ScheduleReady { .. } => "schedule_ready",
            Self::DoseDue { .. } => "dose_due",
            Self::ProtocolCompleted { .. } => "protocol_completed",
            Self::ProtocolCancelled { .. } => "protocol_cancelled",
            Self::ProtocolPreempted { .. } => "protocol_preempted",
            Self::ProtocolListChanged { .. } => "protocol_list_changed",
            Self::SeizureDetected { .. } => "seizure_detected",
            Self::SeizureMarked { .. } => "seizure_marked",
            Self::ManualDose { .. } => "manual_dose",
        }
    }

    /// True for the events that end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ProtocolCompleted { .. }
                | Self::ProtocolCancelled { .. }
                | Self::ProtocolPreempted { .. }
        )
    }
}

pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

impl<F> EventSink for F
where
    F: Fn(&EngineEvent) + Send + Sync,
{
    fn on_event(&self, event: &EngineEvent) {
        self(event);
    }
}

/// Observer list. Publishing snapshots the list, so sinks may subscribe others.
#[derive(Default)]
pub struct EventBus {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sinks", &self.sink_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    /// Subscribe a channel and return its receiving end.
    pub fn subscribe_channel(&self) -> xch::Receiver<EngineEvent> {
        let (sink, rx) = ChannelSink::new();
        self.subscribe(Arc::new(sink));
        rx
    }

    pub fn sink_count(&self) -> usize {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn publish(&self, event: &EngineEvent) {
        let sinks = self
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for sink in &sinks {
            sink.on_event(event);
        }
    }
}

/// Forwards events into an unbounded channel for consumers on other threads.
pub struct ChannelSink {
    tx: xch::Sender<EngineEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, xch::Receiver<EngineEvent>) {
        let (tx, rx) = xch::unbounded();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn on_event(&self, event: &EngineEvent) {
        // Receiver gone: the consumer stopped listening
        let _ = self.tx.send(event.clone());
    }
}
