//! Periodic seizure detection and routing into the engine.
//!
//! [`Detector`] evaluates a [`SeizurePredicate`] every `interval` using the
//! [`Timer`] abstraction and calls its handler on each positive result. It
//! keeps running after a detection; repeated detections during a run are
//! resolved by engine pre-emption, not by suppressing checks.
//!
//! [`DetectionRouter`] is the usual handler: it records the detection on the
//! event stream and, when auto-mode is on, starts the default protocol.

use crate::engine::ExecutionEngine;
use crate::error::EngineError;
use crate::events::RunId;
use crate::protocol::ProtocolId;
use rescue_traits::{Timer, TimerError, TimerHandle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;

/// Opaque detection signal. Called once per check interval.
pub trait SeizurePredicate: Send {
    fn check(&mut self) -> bool;
}

impl<F> SeizurePredicate for F
where
    F: FnMut() -> bool + Send,
{
    fn check(&mut self) -> bool {
        self()
    }
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detection interval must be > 0")]
    ZeroInterval,
    #[error("failed to arm detection timer: {0}")]
    Timer(String),
}

#[derive(Default)]
struct Schedule {
    generation: u64,
    running: bool,
    pending: Option<TimerHandle>,
}

struct Shared {
    predicate: Mutex<Box<dyn SeizurePredicate>>,
    on_detect: Box<dyn Fn() + Send + Sync>,
    interval: Duration,
    timer: Arc<dyn Timer>,
    schedule: Mutex<Schedule>,
    checks: AtomicU64,
    detections: AtomicU64,
}

/// Periodic predicate evaluator. Dropping it stops detection.
///
/// The next check is armed after the predicate and the detection handler
/// return, so the effective period is `interval` plus the handler's run time.
pub struct Detector {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("interval", &self.shared.interval)
            .field("running", &self.is_running())
            .field("checks", &self.checks())
            .field("detections", &self.detections())
            .finish()
    }
}

impl Detector {
    pub fn new(
        predicate: impl SeizurePredicate + 'static,
        interval: Duration,
        timer: Arc<dyn Timer>,
        on_detect: impl Fn() + Send + Sync + 'static,
    ) -> Result<Self, DetectorError> {
        if interval.is_zero() {
            return Err(DetectorError::ZeroInterval);
        }
        Ok(Self {
            shared: Arc::new(Shared {
                predicate: Mutex::new(Box::new(predicate)),
                on_detect: Box::new(on_detect),
                interval,
                timer,
                schedule: Mutex::new(Schedule::default()),
                checks: AtomicU64::new(0),
                detections: AtomicU64::new(0),
            }),
        })
    }

    /// Begin periodic checks. No-op when already running.
    pub fn start(&self) -> Result<(), DetectorError> {
        let mut sch = self.shared.lock_schedule();
        if sch.running {
            return Ok(());
        }
        sch.generation += 1;
        let handle = self
            .shared
            .arm(sch.generation)
            .map_err(|e| DetectorError::Timer(e.to_string()))?;
        sch.pending = Some(handle);
        sch.running = true;
        tracing::info!(interval = ?self.shared.interval, "detector started");
        Ok(())
    }

    /// Stop checking. Idempotent; an in-flight check finishes but does not re-arm.
    pub fn stop(&self) {
        let mut sch = self.shared.lock_schedule();
        if !sch.running {
            return;
        }
        sch.running = false;
        sch.generation += 1;
        sch.pending = None;
        tracing::info!("detector stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock_schedule().running
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    /// Predicate evaluations so far.
    pub fn checks(&self) -> u64 {
        self.shared.checks.load(Ordering::Relaxed)
    }

    pub fn detections(&self) -> u64 {
        self.shared.detections.load(Ordering::Relaxed)
    }
}

impl Drop for Detector {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn lock_schedule(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(self: &Arc<Self>, generation: u64) -> Result<TimerHandle, TimerError> {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.timer.arm(
            self.interval,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.tick(generation);
                }
            }),
        )
    }

    fn is_current(&self, generation: u64) -> bool {
        let sch = self.lock_schedule();
        sch.running && sch.generation == generation
    }

    fn tick(self: &Arc<Self>, generation: u64) {
        if !self.is_current(generation) {
            return;
        }

        let positive = self
            .predicate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .check();
        self.checks.fetch_add(1, Ordering::Relaxed);
        if positive {
            self.detections.fetch_add(1, Ordering::Relaxed);
            tracing::info!("seizure detected");
            (self.on_detect)();
        }

        let mut sch = self.lock_schedule();
        if !(sch.running && sch.generation == generation) {
            return;
        }
        match self.arm(generation) {
            Ok(handle) => sch.pending = Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "detection timer re-arm failed; detector stopped");
                sch.running = false;
                sch.pending = None;
            }
        }
    }
}

/// What a detection turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Auto-mode off: observed and logged, nothing started
    Ignored,
    Started(RunId),
    Failed(EngineError),
}

/// Routes detections to `engine.start(default_protocol_id)` while auto-mode is on.
#[derive(Debug)]
pub struct DetectionRouter {
    engine: ExecutionEngine,
    default_protocol_id: ProtocolId,
    auto_mode: AtomicBool,
}

impl DetectionRouter {
    pub fn new(engine: ExecutionEngine, default_protocol_id: ProtocolId, auto_mode: bool) -> Self {
        Self {
            engine,
            default_protocol_id,
            auto_mode: AtomicBool::new(auto_mode),
        }
    }

    pub fn set_auto_mode(&self, on: bool) {
        self.auto_mode.store(on, Ordering::SeqCst);
        tracing::info!(auto_mode = on, "auto-mode changed");
    }

    pub fn auto_mode(&self) -> bool {
        self.auto_mode.load(Ordering::SeqCst)
    }

    pub fn default_protocol_id(&self) -> ProtocolId {
        self.default_protocol_id
    }

    pub fn on_detection(&self) -> RouteOutcome {
        self.engine.record_detection();
        if !self.auto_mode() {
            tracing::info!("auto-mode off; detection not routed");
            return RouteOutcome::Ignored;
        }
        match self.engine.start(self.default_protocol_id) {
            Ok(run) => RouteOutcome::Started(run),
            Err(e) => {
                tracing::error!(
                    protocol_id = self.default_protocol_id,
                    error = %e,
                    "auto-start after detection failed"
                );
                RouteOutcome::Failed(e)
            }
        }
    }

    /// Detection handler for [`Detector::new`].
    pub fn handler(self: &Arc<Self>) -> impl Fn() + Send + Sync + 'static {
        let router = Arc::clone(self);
        move || {
            router.on_detection();
        }
    }
}
