use std::fmt;
use std::time::Duration;

/// Callback run once when a timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Error type returned by timer backends when a timer cannot be armed.
pub type TimerError = Box<dyn std::error::Error + Send + Sync>;

/// Single-shot timer service.
///
/// Implementations must run `callback` at most once, no earlier than `delay`
/// after `arm` returns, and never after the returned handle was cancelled
/// (a callback that already started may still be running).
pub trait Timer: Send + Sync {
    fn arm(&self, delay: Duration, callback: TimerCallback) -> Result<TimerHandle, TimerError>;
}

/// Ownership token for an armed timer. Cancelling or dropping it disarms the timer.
pub struct TimerHandle {
    id: u64,
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl TimerHandle {
    pub fn new(id: u64, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Backend-assigned id, unique per timer instance.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(mut self) {
        self.disarm();
    }

    fn disarm(&mut self) {
        if let Some(f) = self.cancel.take() {
            f();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.disarm();
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id)
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}
