//! Transparency module.
//!
//! Tracks and exposes how much data each session captured, dropped and
//! persisted, supporting user trust and auditability.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, SharedTransparencyLog, TransparencyLog,
    TransparencyStats,
};
