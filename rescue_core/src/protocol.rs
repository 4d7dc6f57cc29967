//! Protocol and step definitions.
//!
//! Durations are stored in minutes, as entered by clinicians; [`Step::delay`]
//! converts to a `Duration` for the timer.

use crate::error::{EngineError, Result};
use serde::Serialize;
use std::time::Duration;

pub type ProtocolId = u32;

/// Medication label used when a step does not name one.
pub const UNKNOWN_MEDICATION: &str = "Unknown";

/// Upper bound on the summed step durations (one year).
pub const MAX_PROTOCOL_MINUTES: f64 = 365.0 * 24.0 * 60.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    /// Minutes after the previous step (the first step counts from run start)
    pub duration_minutes: f64,
    pub dose_mg: f64,
    pub medication: String,
}

impl Step {
    pub fn new(duration_minutes: f64, dose_mg: f64) -> Self {
        Self {
            duration_minutes,
            dose_mg,
            medication: UNKNOWN_MEDICATION.to_string(),
        }
    }

    pub fn with_medication(mut self, medication: impl Into<String>) -> Self {
        self.medication = medication.into();
        self
    }

    /// Step duration as a timer delay. Saturates for values that passed no validation.
    pub fn delay(&self) -> Duration {
        minutes_to_duration(self.duration_minutes).unwrap_or(Duration::MAX)
    }
}

#[inline]
fn minutes_to_duration(minutes: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(minutes * 60.0).ok()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Protocol {
    pub id: ProtocolId,
    pub name: String,
    /// Minutes; informational, not enforced as a gate
    pub seizure_duration_threshold: f64,
    /// Administration order
    pub steps: Vec<Step>,
    /// Minutes; informational
    pub total_duration: f64,
}

impl Protocol {
    pub fn builder(id: ProtocolId, name: impl Into<String>) -> ProtocolBuilder {
        ProtocolBuilder::new(id, name)
    }

    /// Basic shape checks applied on registration.
    pub fn validate(&self) -> Result<()> {
        let id = Some(self.id);
        if self.name.trim().is_empty() {
            return Err(EngineError::invalid(id, "name must not be empty"));
        }
        if !self.seizure_duration_threshold.is_finite() || self.seizure_duration_threshold < 0.0 {
            return Err(EngineError::invalid(
                id,
                "seizure_duration_threshold must be a finite number >= 0",
            ));
        }
        if !self.total_duration.is_finite() || self.total_duration < 0.0 {
            return Err(EngineError::invalid(
                id,
                "total_duration must be a finite number >= 0",
            ));
        }
        if self.steps.is_empty() {
            return Err(EngineError::invalid(id, "steps must not be empty"));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if !(step.duration_minutes.is_finite() && step.duration_minutes > 0.0) {
                return Err(EngineError::invalid(
                    id,
                    format!("step {i}: duration must be > 0 minutes"),
                ));
            }
            match minutes_to_duration(step.duration_minutes) {
                None => {
                    return Err(EngineError::invalid(
                        id,
                        format!("step {i}: duration is out of range"),
                    ));
                }
                Some(d) if d.is_zero() => {
                    return Err(EngineError::invalid(
                        id,
                        format!("step {i}: duration rounds to zero"),
                    ));
                }
                Some(_) => {}
            }
            if !(step.dose_mg.is_finite() && step.dose_mg > 0.0) {
                return Err(EngineError::invalid(
                    id,
                    format!("step {i}: dose_mg must be > 0"),
                ));
            }
            if step.medication.trim().is_empty() {
                return Err(EngineError::invalid(
                    id,
                    format!("step {i}: medication must not be empty"),
                ));
            }
        }
        if self.steps_duration_minutes() > MAX_PROTOCOL_MINUTES {
            return Err(EngineError::invalid(
                id,
                format!("steps last longer than {MAX_PROTOCOL_MINUTES} minutes in total"),
            ));
        }
        Ok(())
    }

    pub fn steps_duration_minutes(&self) -> f64 {
        self.steps.iter().map(|s| s.duration_minutes).sum()
    }
}

/// The protocol registered at startup unless configuration opts out.
pub fn default_protocol() -> Protocol {
    Protocol {
        id: 1,
        name: "Default Protocol".to_string(),
        seizure_duration_threshold: 2.0,
        steps: vec![
            Step::new(1.0, 5.0),
            Step::new(1.0, 2.5),
            Step::new(1.0, 1.0),
            Step::new(1.0, 0.5),
        ],
        total_duration: 4.0,
    }
}

/// Incremental protocol construction.
///
/// `total_duration` is recomputed from the steps unless set explicitly.
#[derive(Debug, Clone)]
pub struct ProtocolBuilder {
    id: ProtocolId,
    name: String,
    seizure_duration_threshold: f64,
    steps: Vec<Step>,
    total_duration: Option<f64>,
}

impl ProtocolBuilder {
    pub fn new(id: ProtocolId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            seizure_duration_threshold: 0.0,
            steps: Vec::new(),
            total_duration: None,
        }
    }

    pub fn seizure_duration_threshold(mut self, minutes: f64) -> Self {
        self.seizure_duration_threshold = minutes;
        self
    }

    pub fn step(mut self, duration_minutes: f64, dose_mg: f64, medication: impl Into<String>) -> Self {
        self.steps
            .push(Step::new(duration_minutes, dose_mg).with_medication(medication));
        self
    }

    pub fn push_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn total_duration(mut self, minutes: f64) -> Self {
        self.total_duration = Some(minutes);
        self
    }

    pub fn build(self) -> Result<Protocol> {
        let total_duration = self
            .total_duration
            .unwrap_or_else(|| self.steps.iter().map(|s| s.duration_minutes).sum());
        let protocol = Protocol {
            id: self.id,
            name: self.name,
            seizure_duration_threshold: self.seizure_duration_threshold,
            steps: self.steps,
            total_duration,
        };
        protocol.validate()?;
        Ok(protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sums_total_duration() {
        let p = Protocol::builder(3, "Taper")
            .seizure_duration_threshold(5.0)
            .step(1.0, 5.0, "Midazolam")
            .step(2.5, 2.0, "Midazolam")
            .build()
            .expect("valid protocol");
        assert!((p.total_duration - 3.5).abs() < 1e-9);
        assert_eq!(p.steps[1].medication, "Midazolam");
    }

    #[test]
    fn builder_keeps_explicit_total() {
        let p = Protocol::builder(3, "Taper")
            .step(1.0, 5.0, "X")
            .total_duration(10.0)
            .build()
            .expect("valid protocol");
        assert!((p.total_duration - 10.0).abs() < 1e-9);
    }

    #[test]
    fn builder_rejects_empty_steps() {
        let err = Protocol::builder(2, "Empty").build().expect_err("no steps");
        assert!(matches!(err, EngineError::InvalidProtocol { id: Some(2), .. }));
    }

    #[test]
    fn default_protocol_is_valid() {
        let p = default_protocol();
        p.validate().expect("default protocol");
        assert_eq!(p.steps.len(), 4);
        assert!((p.steps_duration_minutes() - p.total_duration).abs() < 1e-9);
        assert!(p.steps.iter().all(|s| s.medication == UNKNOWN_MEDICATION));
    }

    #[test]
    fn sub_nanosecond_step_is_rejected() {
        let err = Protocol::builder(5, "Tiny")
            .step(1e-12, 1.0, "X")
            .build()
            .expect_err("zero delay");
        assert!(err.to_string().contains("rounds to zero"));
    }

    #[test]
    fn total_beyond_one_year_is_rejected() {
        let ok = Protocol::builder(5, "Year")
            .step(MAX_PROTOCOL_MINUTES, 1.0, "X")
            .build();
        assert!(ok.is_ok());
        let err = Protocol::builder(5, "Long")
            .step(MAX_PROTOCOL_MINUTES, 1.0, "X")
            .step(1.0, 1.0, "X")
            .build()
            .expect_err("too long");
        assert!(err.to_string().contains("minutes in total"));
    }

    #[test]
    fn delay_converts_minutes() {
        assert_eq!(Step::new(1.5, 1.0).delay(), Duration::from_secs(90));
    }
}
