//! Append-only JSONL log of administered doses and seizure marks.
//!
//! One JSON object per line. Dose records carry
//! `{timestamp, dose_mg, medication, protocol}`; seizure records carry
//! `{timestamp, event}`. Lifecycle-only events are not logged here.

use crate::events::{EngineEvent, EventSink, SeizureMark};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Protocol label for doses given outside a run.
pub const MANUAL_PROTOCOL: &str = "Manual";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LogRecord {
    Dose {
        timestamp: String,
        dose_mg: f64,
        medication: String,
        protocol: String,
    },
    Seizure {
        timestamp: String,
        event: &'static str,
    },
}

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Map an engine event to its log record, if it is one that gets logged.
pub fn record_for(event: &EngineEvent) -> Option<LogRecord> {
    match event {
        EngineEvent::DoseDue {
            protocol,
            dose_mg,
            medication,
            at,
            ..
        } => Some(LogRecord::Dose {
            timestamp: stamp(*at),
            dose_mg: *dose_mg,
            medication: medication.clone(),
            protocol: protocol.clone(),
        }),
        EngineEvent::ManualDose {
            at,
            dose_mg,
            medication,
        } => Some(LogRecord::Dose {
            timestamp: stamp(*at),
            dose_mg: *dose_mg,
            medication: medication.clone(),
            protocol: MANUAL_PROTOCOL.to_string(),
        }),
        EngineEvent::SeizureMarked { at, mark } => Some(LogRecord::Seizure {
            timestamp: stamp(*at),
            event: match mark {
                SeizureMark::Start => "Seizure Start",
                SeizureMark::Stop => "Seizure Stop",
            },
        }),
        EngineEvent::SeizureDetected { at } => Some(LogRecord::Seizure {
            timestamp: stamp(*at),
            event: "Seizure Detected",
        }),
        _ => None,
    }
}

/// Event sink appending [`LogRecord`]s to a file.
///
/// The file is opened per write in append mode; a write failure is reported
/// through `tracing` and never reaches the engine.
#[derive(Debug)]
pub struct JsonlEventLog {
    path: PathBuf,
    /// Serializes appends from concurrent publishers
    write_lock: Mutex<()>,
}

impl JsonlEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &LogRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(record)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

impl EventSink for JsonlEventLog {
    fn on_event(&self, event: &EngineEvent) {
        let Some(record) = record_for(event) else {
            return;
        };
        if let Err(e) = self.append(&record) {
            tracing::warn!(path = %self.path.display(), error = %e, "event log write failed");
        }
    }
}
