//! Simulated collaborators for running the engine without a patient or pump.
//!
//! - `RandomPredicate`: detection that fires with a fixed per-check probability
//! - `ScriptedPredicate`: detection driven by a fixed sequence (tests, demos)
//! - `SimulatedPump`: event sink that "administers" each dose by recording it
pub mod error;

use crate::error::{Result, SimError};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rescue_core::logger::MANUAL_PROTOCOL;
use rescue_core::{EngineEvent, EventSink, SeizurePredicate};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Random detection: each check is positive with probability `p`.
pub struct RandomPredicate {
    rng: StdRng,
    probability: f64,
}

impl std::fmt::Debug for RandomPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomPredicate")
            .field("probability", &self.probability)
            .finish_non_exhaustive()
    }
}

impl RandomPredicate {
    /// `seed = None` draws from OS entropy.
    pub fn new(probability: f64, seed: Option<u64>) -> Result<Self> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(SimError::Probability(probability));
        }
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Ok(Self { rng, probability })
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }
}

impl SeizurePredicate for RandomPredicate {
    fn check(&mut self) -> bool {
        self.rng.gen_bool(self.probability)
    }
}

/// Replays a fixed sequence of check results.
#[derive(Debug, Clone)]
pub struct ScriptedPredicate {
    script: VecDeque<bool>,
    cycle: bool,
}

impl ScriptedPredicate {
    /// Plays `script` once, then reports no detection.
    pub fn new(script: impl IntoIterator<Item = bool>) -> Self {
        Self {
            script: script.into_iter().collect(),
            cycle: false,
        }
    }

    /// Repeats `script` forever.
    pub fn cycling(script: impl IntoIterator<Item = bool>) -> Result<Self> {
        let script: VecDeque<bool> = script.into_iter().collect();
        if script.is_empty() {
            return Err(SimError::EmptyScript);
        }
        Ok(Self {
            script,
            cycle: true,
        })
    }

    /// Positive on check `n` (1-based) only.
    pub fn positive_on(n: usize) -> Self {
        Self::new((1..=n).map(|i| i == n))
    }
}

impl SeizurePredicate for ScriptedPredicate {
    fn check(&mut self) -> bool {
        match self.script.pop_front() {
            Some(v) => {
                if self.cycle {
                    self.script.push_back(v);
                }
                v
            }
            None => false,
        }
    }
}

/// One simulated administration.
#[derive(Debug, Clone, PartialEq)]
pub struct Administration {
    pub at: DateTime<Utc>,
    pub dose_mg: f64,
    pub medication: String,
    /// Protocol name, or "Manual"
    pub source: String,
}

/// Records every `dose_due` and `manual_dose` as if a pump delivered it.
#[derive(Debug, Default)]
pub struct SimulatedPump {
    given: Mutex<Vec<Administration>>,
}

impl SimulatedPump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn administrations(&self) -> Vec<Administration> {
        self.given
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn total_mg(&self) -> f64 {
        self.given
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|a| a.dose_mg)
            .sum()
    }

    fn administer(&self, a: Administration) {
        tracing::info!(
            dose_mg = a.dose_mg,
            medication = %a.medication,
            source = %a.source,
            "administering dose (simulated)"
        );
        self.given
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(a);
    }
}

impl EventSink for SimulatedPump {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::DoseDue {
                at,
                dose_mg,
                medication,
                protocol,
                ..
            } => self.administer(Administration {
                at: *at,
                dose_mg: *dose_mg,
                medication: medication.clone(),
                source: protocol.clone(),
            }),
            EngineEvent::ManualDose {
                at,
                dose_mg,
                medication,
            } => self.administer(Administration {
                at: *at,
                dose_mg: *dose_mg,
                medication: medication.clone(),
                source: MANUAL_PROTOCOL.to_string(),
            }),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_plays_once_then_stays_quiet() {
        let mut p = ScriptedPredicate::new([false, true]);
        assert!(!p.check());
        assert!(p.check());
        assert!(!p.check());
        assert!(!p.check());
    }

    #[test]
    fn cycling_repeats() {
        let mut p = ScriptedPredicate::cycling([true, false]).unwrap();
        let seen: Vec<bool> = (0..5).map(|_| p.check()).collect();
        assert_eq!(seen, vec![true, false, true, false, true]);
        assert_eq!(
            ScriptedPredicate::cycling([]).unwrap_err(),
            SimError::EmptyScript
        );
    }

    #[test]
    fn positive_on_nth_check() {
        let mut p = ScriptedPredicate::positive_on(3);
        let seen: Vec<bool> = (0..4).map(|_| p.check()).collect();
        assert_eq!(seen, vec![false, false, true, false]);
    }
}
