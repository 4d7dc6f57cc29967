//! Deterministic clock + timer for tests and simulations.
//!
//! `ManualClock` never reads the system time. Time moves only through
//! [`ManualClock::advance`], which fires every due timer in deadline order
//! (ties in arm order) with the clock set to that timer's deadline.

use crate::clock::{Clock, add_saturating};
use crate::timer::{Timer, TimerCallback, TimerError, TimerHandle};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug)]
struct ArmRefused;

impl std::fmt::Display for ArmRefused {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("manual clock refused to arm timer")
    }
}

impl std::error::Error for ArmRefused {}

struct ManualState {
    now: DateTime<Utc>,
    next_id: u64,
    pending: BTreeMap<(DateTime<Utc>, u64), TimerCallback>,
    refuse_arms: bool,
}

#[derive(Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_at(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl std::fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock();
        f.debug_struct("ManualClock")
            .field("now", &st.now)
            .field("pending", &st.pending.len())
            .finish()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                now: start,
                next_id: 1,
                pending: BTreeMap::new(),
                refuse_arms: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move time forward by `d`, firing due timers. Returns how many fired.
    ///
    /// Callbacks run without the clock lock held, so they may arm new timers;
    /// those fire within the same call when their deadline is also due.
    pub fn advance(&self, d: Duration) -> usize {
        let target = add_saturating(self.lock().now, d);
        let mut fired = 0;
        loop {
            let due = {
                let mut st = self.lock();
                let next = st.pending.keys().next().copied();
                match next {
                    Some((deadline, _)) if deadline <= target => {
                        st.now = deadline;
                        st.pending.pop_first().map(|(_, cb)| cb)
                    }
                    _ => None,
                }
            };
            match due {
                Some(cb) => {
                    cb();
                    fired += 1;
                }
                None => break,
            }
        }
        let mut st = self.lock();
        if st.now < target {
            st.now = target;
        }
        fired
    }

    /// Number of armed, not-yet-fired timers.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.lock().pending.keys().next().map(|(t, _)| *t)
    }

    /// When set, every subsequent `arm` fails until cleared.
    pub fn refuse_arms(&self, refuse: bool) {
        self.lock().refuse_arms = refuse;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }
}

impl Timer for ManualClock {
    fn arm(&self, delay: Duration, callback: TimerCallback) -> Result<TimerHandle, TimerError> {
        let mut st = self.lock();
        if st.refuse_arms {
            return Err(Box::new(ArmRefused));
        }
        let id = st.next_id;
        st.next_id += 1;
        let key = (add_saturating(st.now, delay), id);
        st.pending.insert(key, callback);
        drop(st);

        let weak = Arc::downgrade(&self.state);
        Ok(TimerHandle::new(id, move || {
            if let Some(state) = weak.upgrade() {
                let mut st = state.lock().unwrap_or_else(PoisonError::into_inner);
                st.pending.remove(&key);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fires_in_deadline_order_and_sets_now() {
        let clock = ManualClock::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let t0 = clock.now();

        let o = order.clone();
        let c = clock.clone();
        let _b = clock
            .arm(
                Duration::from_secs(2),
                Box::new(move || o.lock().unwrap().push(("b", c.ms_since(t0)))),
            )
            .unwrap();
        let o = order.clone();
        let c = clock.clone();
        let _a = clock
            .arm(
                Duration::from_secs(1),
                Box::new(move || o.lock().unwrap().push(("a", c.ms_since(t0)))),
            )
            .unwrap();

        assert_eq!(clock.advance(Duration::from_secs(5)), 2);
        assert_eq!(*order.lock().unwrap(), vec![("a", 1_000), ("b", 2_000)]);
        assert_eq!(clock.ms_since(t0), 5_000);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let clock = ManualClock::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = clock
            .arm(
                Duration::from_millis(10),
                Box::new(move || {
                    h.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert_eq!(clock.pending(), 1);
        handle.cancel();
        assert_eq!(clock.pending(), 0);
        clock.advance(Duration::from_secs(1));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callbacks_can_rearm_within_one_advance() {
        let clock = ManualClock::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let keep = Arc::new(Mutex::new(Vec::new()));

        let (c, h, k) = (clock.clone(), hits.clone(), keep.clone());
        let first = clock
            .arm(
                Duration::from_secs(1),
                Box::new(move || {
                    h.fetch_add(1, Ordering::SeqCst);
                    let h2 = h.clone();
                    let next = c
                        .arm(
                            Duration::from_secs(1),
                            Box::new(move || {
                                h2.fetch_add(1, Ordering::SeqCst);
                            }),
                        )
                        .unwrap();
                    k.lock().unwrap().push(next);
                }),
            )
            .unwrap();
        keep.lock().unwrap().push(first);

        assert_eq!(clock.advance(Duration::from_secs(3)), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn refused_arm_returns_error() {
        let clock = ManualClock::new();
        clock.refuse_arms(true);
        assert!(clock.arm(Duration::from_secs(1), Box::new(|| {})).is_err());
        clock.refuse_arms(false);
        assert!(clock.arm(Duration::from_secs(1), Box::new(|| {})).is_ok());
    }
}
