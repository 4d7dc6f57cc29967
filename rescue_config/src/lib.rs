#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and protocol import documents for the rescue dosing system.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - `protocols` holds the JSON import schema; entries are parsed one by one
//!   so a malformed entry never hides its valid neighbours.
use serde::Deserialize;
use std::path::PathBuf;

pub mod protocols;

pub use protocols::{ProtocolDoc, StepDoc, load_protocol_docs, parse_protocol_docs};

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DetectionCfg {
    /// How often the detection predicate is evaluated (ms)
    pub interval_ms: u64,
    /// Route detections to the default protocol when true
    pub auto_mode: bool,
    /// Protocol started by auto-mode detections
    pub default_protocol_id: u32,
    /// Per-check trigger probability of the simulated detector (0.0..=1.0)
    pub probability: f64,
    /// Optional RNG seed for reproducible simulated detections
    pub seed: Option<u64>,
}

impl Default for DetectionCfg {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            auto_mode: true,
            default_protocol_id: 1,
            probability: 0.05,
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProtocolsCfg {
    /// Optional JSON import file (object or array of protocol objects)
    pub file: Option<PathBuf>,
    /// Register the built-in "Default Protocol" before importing
    pub include_default: bool,
}

impl Default for ProtocolsCfg {
    fn default() -> Self {
        Self {
            file: None,
            include_default: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimerCfg {
    /// Divides every timer delay; 1.0 is real time.
    pub speedup: f64,
}

impl Default for TimerCfg {
    fn default() -> Self {
        Self { speedup: 1.0 }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
    /// Append-only dose/seizure event log (one JSON object per line)
    pub events_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionCfg,
    pub protocols: ProtocolsCfg,
    pub timer: TimerCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Detection
        if self.detection.interval_ms == 0 {
            eyre::bail!("detection.interval_ms must be >= 1");
        }
        if self.detection.interval_ms > 60 * 60 * 1000 {
            eyre::bail!("detection.interval_ms is unreasonably large (>1h)");
        }
        if !(0.0..=1.0).contains(&self.detection.probability) {
            eyre::bail!("detection.probability must be in [0.0, 1.0]");
        }

        // Timer
        if !(self.timer.speedup.is_finite() && self.timer.speedup > 0.0) {
            eyre::bail!("timer.speedup must be a finite number > 0");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly, got {rot:?}");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = load_toml("").expect("parse");
        assert_eq!(cfg.detection.interval_ms, 1000);
        assert!(cfg.detection.auto_mode);
        assert_eq!(cfg.detection.default_protocol_id, 1);
        assert!(cfg.protocols.include_default);
        assert!((cfg.timer.speedup - 1.0).abs() < f64::EPSILON);
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn nan_speedup_is_rejected() {
        let mut cfg = Config::default();
        cfg.timer.speedup = f64::NAN;
        assert!(cfg.validate().is_err());
    }
}
