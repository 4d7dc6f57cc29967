//! Real-time timer backend: one short-lived thread per armed timer.
//!
//! Each timer thread blocks on a bounded(1) channel with `recv_timeout`; a
//! message (or a dropped sender) disarms it, a timeout fires the callback.
//! Cancelling never joins, so a callback may drop its own predecessor handle.

use crossbeam_channel as xch;
use rescue_traits::{Timer, TimerCallback, TimerError, TimerHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug)]
pub struct ThreadTimer {
    /// Divides every delay; 1.0 is real time
    speedup: f64,
    next_id: AtomicU64,
}

impl Default for ThreadTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadTimer {
    pub fn new() -> Self {
        Self {
            speedup: 1.0,
            next_id: AtomicU64::new(1),
        }
    }

    /// Compress time by `speedup` (> 0, finite). Other values fall back to real time.
    pub fn with_speedup(speedup: f64) -> Self {
        let speedup = if speedup.is_finite() && speedup > 0.0 {
            speedup
        } else {
            tracing::warn!(speedup, "invalid timer speedup; using real time");
            1.0
        };
        Self {
            speedup,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn speedup(&self) -> f64 {
        self.speedup
    }

    fn scaled(&self, delay: Duration) -> Duration {
        if (self.speedup - 1.0).abs() < f64::EPSILON {
            return delay;
        }
        Duration::try_from_secs_f64(delay.as_secs_f64() / self.speedup).unwrap_or(Duration::MAX)
    }
}

impl Timer for ThreadTimer {
    fn arm(&self, delay: Duration, callback: TimerCallback) -> Result<TimerHandle, TimerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let wait = self.scaled(delay);
        let (tx, rx) = xch::bounded::<()>(1);

        std::thread::Builder::new()
            .name(format!("rescue-timer-{id}"))
            .spawn(move || match rx.recv_timeout(wait) {
                Err(xch::RecvTimeoutError::Timeout) => {
                    tracing::trace!(timer = id, "timer fired");
                    callback();
                }
                Ok(()) | Err(xch::RecvTimeoutError::Disconnected) => {
                    tracing::trace!(timer = id, "timer disarmed");
                }
            })?;

        Ok(TimerHandle::new(id, move || {
            // Full or disconnected: the thread already fired or is exiting
            let _ = tx.try_send(());
        }))
    }
}
