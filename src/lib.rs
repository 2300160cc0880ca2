//! Sensor Trust Agent - detector core for behavioral-biometric capture.
//!
//! This library gathers motion, location, wireless, ambient and hardware
//! signals through a set of pluggable detectors, rate-limits and buffers them
//! per session, and appends them to crash-tolerant session files that are
//! handed off for upload once the session ends.
//!
//! # Guarantees
//!
//! - **Gated**: push-driven samples closer than the configured interval are dropped
//! - **Bounded**: a detector never buffers more than its flush threshold
//! - **Append-only**: session files are only ever appended, one record per line
//! - **Isolated**: a detector missing a permission or sensor never blocks the others
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Sensor Trust Agent                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌────────┐  │
//! │  │ Platform  │──▶│ Sampling  │──▶│  Session  │──▶│Session │  │
//! │  │  events   │   │   Gate    │   │  Buffer   │   │  File  │  │
//! │  └───────────┘   └───────────┘   └───────────┘   └────────┘  │
//! │        ▲                                              │      │
//! │  ┌───────────┐   ┌───────────┐                  ┌────────┐  │
//! │  │   Poll    │   │ Event Bus │──▶ listeners     │Handoff │  │
//! │  │  Driver   │   │           │                  │  sink  │  │
//! │  └───────────┘   └───────────┘                  └────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sensor_trust_agent::{
//!     platform::{CountingRadio, HandoffLog, Platform, PreferenceStore, StaticCapabilities,
//!                SwitchableNetwork},
//!     Config, SensorAgent, SessionMode,
//! };
//! use std::sync::Arc;
//!
//! let platform = Platform {
//!     capabilities: Arc::new(StaticCapabilities::all()),
//!     network: Arc::new(SwitchableNetwork::default()),
//!     radio: Arc::new(CountingRadio::default()),
//!     store: Arc::new(PreferenceStore::in_memory()),
//!     sink: Arc::new(HandoffLog::new()),
//! };
//! let mut agent = SensorAgent::new(Config::default(), platform);
//! agent.authorize_gathering("owner-1");
//! agent.start_session(SessionMode::Gather).expect("session starts");
//! // Feed events with agent.deliver(...)
//! let files = agent.stop_session().expect("session stops");
//! ```

pub mod bus;
pub mod config;
pub mod core;
pub mod detector;
pub mod platform;
pub mod registry;
pub mod session;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use bus::{BusEvent, EventBus, ServiceMessage, StatusEvent, Subscriber};
pub use config::{Config, SourceConfig};
pub use crate::core::{Field, PollTiming, Record, SamplingGate, SessionBuffer, SessionFile};
pub use detector::{Detector, DetectorState, DetectorType, SensorEvent};
pub use registry::DetectorRegistry;
pub use session::{AgentError, SensorAgent, SessionContext, SessionMode};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
