//! Session transparency log.
//!
//! Tracks what the detectors captured, dropped and persisted, so a user (or a
//! test) can see exactly how much data a session produced. Only counts are
//! kept here, never record contents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Capture statistics for the current session.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Records appended to a session buffer
    records_accepted: AtomicU64,
    /// Events dropped by a sampling gate or received while not listening
    events_dropped: AtomicU64,
    /// Records successfully written to a session file
    records_persisted: AtomicU64,
    /// Records lost because a flush failed
    records_lost: AtomicU64,
    /// Poll cycles skipped because the resource was unavailable
    polls_skipped: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    pub fn new() -> Self {
        Self {
            records_accepted: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            records_persisted: AtomicU64::new(0),
            records_lost: AtomicU64::new(0),
            polls_skipped: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log that accumulates on top of previously saved totals.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            debug!("could not load previous transparency stats: {e}");
        }

        log
    }

    pub fn record_accepted(&self) {
        self.records_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persisted(&self, count: u64) {
        self.records_persisted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_lost(&self, count: u64) {
        self.records_lost.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_poll_skipped(&self) {
        self.polls_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            records_accepted: self.records_accepted.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            records_persisted: self.records_persisted.load(Ordering::Relaxed),
            records_lost: self.records_lost.load(Ordering::Relaxed),
            polls_skipped: self.polls_skipped.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Records captured: {}\n\
             - Events dropped (rate limit / not listening): {}\n\
             - Records persisted: {}\n\
             - Records lost to write failures: {}\n\
             - Poll cycles skipped: {}\n\
             - Session duration: {} seconds",
            stats.records_accepted,
            stats.events_dropped,
            stats.records_persisted,
            stats.records_lost,
            stats.polls_skipped,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                records_accepted: stats.records_accepted,
                events_dropped: stats.events_dropped,
                records_persisted: stats.records_persisted,
                records_lost: stats.records_lost,
                polls_skipped: stats.polls_skipped,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.records_accepted
                    .store(persisted.records_accepted, Ordering::Relaxed);
                self.events_dropped
                    .store(persisted.events_dropped, Ordering::Relaxed);
                self.records_persisted
                    .store(persisted.records_persisted, Ordering::Relaxed);
                self.records_lost
                    .store(persisted.records_lost, Ordering::Relaxed);
                self.polls_skipped
                    .store(persisted.polls_skipped, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    pub fn reset(&self) {
        self.records_accepted.store(0, Ordering::Relaxed);
        self.events_dropped.store(0, Ordering::Relaxed);
        self.records_persisted.store(0, Ordering::Relaxed);
        self.records_lost.store(0, Ordering::Relaxed);
        self.polls_skipped.store(0, Ordering::Relaxed);
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of transparency statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub records_accepted: u64,
    pub events_dropped: u64,
    pub records_persisted: u64,
    pub records_lost: u64,
    pub polls_skipped: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    records_accepted: u64,
    events_dropped: u64,
    records_persisted: u64,
    records_lost: u64,
    polls_skipped: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let log = TransparencyLog::new();
        log.record_accepted();
        log.record_accepted();
        log.record_dropped();
        log.record_persisted(2);

        let stats = log.stats();
        assert_eq!(stats.records_accepted, 2);
        assert_eq!(stats.events_dropped, 1);
        assert_eq!(stats.records_persisted, 2);
        assert_eq!(stats.records_lost, 0);
    }

    #[test]
    fn test_reset() {
        let log = TransparencyLog::new();
        log.record_lost(5);
        log.record_poll_skipped();
        log.reset();

        let stats = log.stats();
        assert_eq!(stats.records_lost, 0);
        assert_eq!(stats.polls_skipped, 0);
    }

    #[test]
    fn test_persisted_totals_survive_restart() {
        let path = std::env::temp_dir()
            .join(format!("transparency-{}", uuid::Uuid::new_v4()))
            .join("transparency.json");
        let log = TransparencyLog::with_persistence(path.clone());
        log.record_persisted(7);
        log.save().unwrap();

        let reloaded = TransparencyLog::with_persistence(path.clone());
        assert_eq!(reloaded.stats().records_persisted, 7);
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_summary_format() {
        let summary = TransparencyLog::new().summary();
        assert!(summary.contains("Records captured"));
        assert!(summary.contains("Records lost"));
    }
}
