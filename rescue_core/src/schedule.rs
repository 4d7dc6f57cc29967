//! Schedule derivation: relative step durations → absolute dose times.

use crate::protocol::Protocol;
use chrono::{DateTime, Utc};
use rescue_traits::clock::add_saturating;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledDose {
    pub absolute_time: DateTime<Utc>,
    pub dose_mg: f64,
    pub medication: String,
}

/// Cumulative schedule starting at `start`: entry `i` is stamped with the end
/// of step `i`'s window. Pure and deterministic for a fixed `start`.
pub fn build(protocol: &Protocol, start: DateTime<Utc>) -> Vec<ScheduledDose> {
    let mut t = start;
    protocol
        .steps
        .iter()
        .map(|step| {
            t = add_saturating(t, step.delay());
            ScheduledDose {
                absolute_time: t,
                dose_mg: step.dose_mg,
                medication: step.medication.clone(),
            }
        })
        .collect()
}
