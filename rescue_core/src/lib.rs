#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Protocol execution engine (platform-agnostic).
//!
//! All timing goes through `rescue_traits::Clock` and `rescue_traits::Timer`,
//! so the same engine runs on real threads (`timer::ThreadTimer`) or under a
//! deterministic `ManualClock`.
//!
//! ## Architecture
//!
//! - **Protocols**: validated definitions and the builder (`protocol` module)
//! - **Store**: id → `Arc<Protocol>` registry with batch JSON import (`store`)
//! - **Schedule**: pure relative → absolute dose time derivation (`schedule`)
//! - **Engine**: single-run state machine with run-tagged timers (`engine`)
//! - **Events**: ordered event stream and sinks (`events`, `logger`)
//! - **Detection**: periodic predicate evaluation and auto-start (`detector`)

pub mod conversions;
pub mod detector;
pub mod engine;
pub mod error;
pub mod events;
pub mod logger;
pub mod mocks;
pub mod protocol;
pub mod schedule;
pub mod store;
pub mod timer;

pub use detector::{DetectionRouter, Detector, DetectorError, RouteOutcome, SeizurePredicate};
pub use engine::{EngineStatus, ExecutionEngine};
pub use error::{EngineError, Result};
pub use events::{
    CancelReason, ChannelSink, EngineEvent, EventBus, EventSink, ListChange, RunId, SeizureMark,
};
pub use logger::JsonlEventLog;
pub use protocol::{Protocol, ProtocolBuilder, ProtocolId, Step, default_protocol};
pub use schedule::ScheduledDose;
pub use store::{ImportReport, ProtocolStore};
pub use timer::ThreadTimer;
