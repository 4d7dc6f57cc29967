use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Wall-clock abstraction used to stamp schedules and log records.
///
/// - now(): current UTC time
/// - ms_since(): helper to compute elapsed milliseconds from an epoch
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Milliseconds elapsed since `epoch`, saturating at 0 when `epoch` is in the future.
    fn ms_since(&self, epoch: DateTime<Utc>) -> u64 {
        let delta = self.now().signed_duration_since(epoch);
        u64::try_from(delta.num_milliseconds()).unwrap_or(0)
    }
}

/// Default clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Convert a std duration into a chrono delta, saturating at `TimeDelta::MAX`.
#[inline]
pub fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

/// `t + d`, saturating at the largest representable UTC instant.
#[inline]
pub fn add_saturating(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    t.checked_add_signed(to_delta(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
