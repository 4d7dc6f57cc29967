//! Conversions bridging `rescue_config` import documents and core protocol types.

use crate::error::EngineError;
use crate::protocol::{Protocol, Step, UNKNOWN_MEDICATION};
use rescue_config::{ProtocolDoc, StepDoc};

// ── Step ─────────────────────────────────────────────────────────────────────

impl From<&StepDoc> for Step {
    fn from(s: &StepDoc) -> Self {
        Self {
            duration_minutes: s.duration,
            dose_mg: s.dose_mg,
            medication: s
                .medication
                .clone()
                .unwrap_or_else(|| UNKNOWN_MEDICATION.to_string()),
        }
    }
}

impl From<&Step> for StepDoc {
    fn from(s: &Step) -> Self {
        Self {
            duration: s.duration_minutes,
            dose_mg: s.dose_mg,
            medication: Some(s.medication.clone()),
        }
    }
}

// ── Protocol ─────────────────────────────────────────────────────────────────

impl TryFrom<&ProtocolDoc> for Protocol {
    type Error = EngineError;

    fn try_from(d: &ProtocolDoc) -> Result<Self, Self::Error> {
        let protocol = Self {
            id: d.id,
            name: d.name.clone(),
            seizure_duration_threshold: d.seizure_duration_threshold,
            steps: d.steps.iter().map(Step::from).collect(),
            total_duration: d.total_duration_or_sum(),
        };
        protocol.validate()?;
        Ok(protocol)
    }
}

impl From<&Protocol> for ProtocolDoc {
    fn from(p: &Protocol) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            seizure_duration_threshold: p.seizure_duration_threshold,
            steps: p.steps.iter().map(StepDoc::from).collect(),
            total_duration: Some(p.total_duration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(steps: Vec<StepDoc>) -> ProtocolDoc {
        ProtocolDoc {
            id: 7,
            name: "Doc".into(),
            seizure_duration_threshold: 2.0,
            steps,
            total_duration: None,
        }
    }

    #[test]
    fn missing_medication_becomes_unknown() {
        let p = Protocol::try_from(&doc(vec![StepDoc {
            duration: 1.0,
            dose_mg: 5.0,
            medication: None,
        }]))
        .expect("valid");
        assert_eq!(p.steps[0].medication, UNKNOWN_MEDICATION);
        assert!((p.total_duration - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_dose_is_rejected() {
        let err = Protocol::try_from(&doc(vec![StepDoc {
            duration: 1.0,
            dose_mg: 0.0,
            medication: None,
        }]))
        .expect_err("zero dose");
        assert!(err.to_string().contains("dose_mg must be > 0"));
    }

    #[test]
    fn total_duration_is_not_recomputed_when_present() {
        let mut d = doc(vec![StepDoc {
            duration: 1.0,
            dose_mg: 1.0,
            medication: Some("X".into()),
        }]);
        d.total_duration = Some(12.0);
        let p = Protocol::try_from(&d).expect("valid");
        assert!((p.total_duration - 12.0).abs() < 1e-9);
        let back = ProtocolDoc::from(&p);
        assert_eq!(back, d);
    }
}
