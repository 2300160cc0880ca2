//! Core building blocks shared by every detector.
//!
//! This module contains:
//! - The sampling gate that rate-limits inbound events
//! - The bounded session buffer and its record encoding
//! - The append-only session file writer
//! - The poll schedule for interval-driven detectors

pub mod buffer;
pub mod gate;
pub mod record;
pub mod scheduler;
pub mod writer;

// Re-export commonly used types
pub use buffer::SessionBuffer;
pub use gate::{Rejection, SamplingGate};
pub use record::{Field, Record};
pub use scheduler::{
    Clock, ManualClock, Millis, PollAction, PollDeadline, PollPhase, PollSchedule, PollTiming,
    SessionClock,
};
pub use writer::{PersistError, SessionFile};
