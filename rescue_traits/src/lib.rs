pub mod clock;
pub mod manual;
pub mod timer;

pub use clock::{Clock, SystemClock};
pub use manual::ManualClock;
pub use timer::{Timer, TimerCallback, TimerError, TimerHandle};
