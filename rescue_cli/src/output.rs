//! Console rendering of engine events and status.

use chrono::{DateTime, Local, Utc};
use rescue_core::{CancelReason, EngineEvent, EngineStatus, ListChange, SeizureMark};

fn hms(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

/// One event as printed to stdout: a JSON line, or a human-readable block.
pub fn render_event(event: &EngineEvent, json: bool) -> String {
    if json {
        return serde_json::to_string(event)
            .unwrap_or_else(|e| format!("{{\"event\":\"unserializable\",\"error\":\"{e}\"}}"));
    }
    match event {
        EngineEvent::ProtocolStarted {
            run,
            protocol_id,
            name,
        } => format!("Protocol {protocol_id} \"{name}\" started ({run})"),
        EngineEvent::ScheduleReady { schedule, .. } => {
            let mut s = format!("Schedule ({} doses):", schedule.len());
            for (i, d) in schedule.iter().enumerate() {
                s.push_str(&format!(
                    "\n  {}. {}  {:.2} mg {}",
                    i + 1,
                    hms(&d.absolute_time),
                    d.dose_mg,
                    d.medication
                ));
            }
            s
        }
        EngineEvent::DoseDue {
            step_index,
            dose_mg,
            medication,
            at,
            ..
        } => format!(
            "[{}] Dose due (step {}): {dose_mg:.2} mg {medication}",
            hms(at),
            step_index + 1
        ),
        EngineEvent::ProtocolCompleted { name, .. } => format!("Protocol \"{name}\" completed"),
        EngineEvent::ProtocolCancelled { name, reason, .. } => match reason {
            CancelReason::Manual => format!("Protocol \"{name}\" cancelled"),
            CancelReason::TimerFailure(msg) => {
                format!("Protocol \"{name}\" cancelled: timer failure ({msg})")
            }
        },
        EngineEvent::ProtocolPreempted { name, .. } => {
            format!("Protocol \"{name}\" preempted by a new run")
        }
        EngineEvent::ProtocolListChanged {
            protocol_id,
            change,
        } => {
            let what = match change {
                ListChange::Registered => "registered",
                ListChange::Replaced => "replaced",
                ListChange::Removed => "removed",
            };
            format!("Protocol {protocol_id} {what}")
        }
        EngineEvent::SeizureDetected { at } => format!("[{}] Seizure detected", hms(at)),
        EngineEvent::SeizureMarked { at, mark } => {
            let what = match mark {
                SeizureMark::Start => "start",
                SeizureMark::Stop => "stop",
            };
            format!("[{}] Seizure {what} marked", hms(at))
        }
        EngineEvent::ManualDose {
            at,
            dose_mg,
            medication,
        } => format!("[{}] Manual dose: {dose_mg:.2} mg {medication}", hms(at)),
    }
}

pub fn render_status(status: &EngineStatus, auto_mode: bool, json: bool) -> String {
    if json {
        let mut v = serde_json::to_value(status).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = v.as_object_mut() {
            obj.insert("auto_mode".into(), auto_mode.into());
        }
        return v.to_string();
    }
    let auto = if auto_mode { "on" } else { "off" };
    match status {
        EngineStatus::Idle => format!("Idle (auto-mode {auto})"),
        EngineStatus::Running {
            name,
            step_index,
            total_steps,
            remaining,
            ..
        } => {
            // remaining[0] closes the current window; the next dose fires then
            let next = match (remaining.first(), remaining.get(1)) {
                (Some(window), Some(d)) => format!(
                    ", next dose {:.2} mg at {}",
                    d.dose_mg,
                    hms(&window.absolute_time)
                ),
                (Some(window), None) => format!(", completes at {}", hms(&window.absolute_time)),
                _ => String::new(),
            };
            format!(
                "Running \"{name}\": {step_index}/{total_steps} doses given{next} (auto-mode {auto})"
            )
        }
    }
}
