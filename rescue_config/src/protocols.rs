//! Protocol import documents (JSON).
//!
//! Expected shape (object or array of objects):
//!
//! ```json
//! { "id": 2, "name": "Midazolam taper", "seizure_duration_threshold": 5,
//!   "steps": [ { "duration": 1, "dose_mg": 5, "medication": "Midazolam" } ] }
//! ```
//!
//! Only the document shape is checked here. Value rules (positive durations
//! and doses, non-empty steps) belong to the protocol store.
use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDoc {
    /// Minutes after the previous step
    pub duration: f64,
    pub dose_mg: f64,
    #[serde(default)]
    pub medication: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolDoc {
    pub id: u32,
    pub name: String,
    /// Minutes; informational
    pub seizure_duration_threshold: f64,
    pub steps: Vec<StepDoc>,
    /// Minutes; computed as the sum of step durations when absent
    #[serde(default)]
    pub total_duration: Option<f64>,
}

impl ProtocolDoc {
    pub fn total_duration_or_sum(&self) -> f64 {
        self.total_duration
            .unwrap_or_else(|| self.steps.iter().map(|s| s.duration).sum())
    }
}

/// Parse an import payload into per-entry results, in document order.
///
/// Fails only when the payload is not JSON at all or is neither an object nor
/// an array; a bad entry is reported in its slot.
pub fn parse_protocol_docs(text: &str) -> eyre::Result<Vec<Result<ProtocolDoc, serde_json::Error>>> {
    let value: Value = serde_json::from_str(text).wrap_err("protocol import is not valid JSON")?;
    match value {
        Value::Array(items) => Ok(items.into_iter().map(serde_json::from_value).collect()),
        obj @ Value::Object(_) => Ok(vec![serde_json::from_value(obj)]),
        other => eyre::bail!(
            "protocol import must be a JSON object or array, got {}",
            json_kind(&other)
        ),
    }
}

pub fn load_protocol_docs(
    path: &Path,
) -> eyre::Result<Vec<Result<ProtocolDoc, serde_json::Error>>> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read protocol file {}", path.display()))?;
    parse_protocol_docs(&text).wrap_err_with(|| format!("parse protocol file {}", path.display()))
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
