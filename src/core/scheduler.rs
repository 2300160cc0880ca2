//! Poll cadence for detectors that are not push-driven.
//!
//! A [`PollSchedule`] is a pure state machine over a millisecond clock
//! supplied by the caller. The session's poll driver thread owns the timing;
//! the schedule only decides what should happen at a given instant.
//!
//! Each cycle is scheduled for `T0`. The window stays open until a completion
//! signal or for `guaranteed_listen` after it actually opened, even when the
//! driver woke late. The next cycle is due at `max(now, T0 + restart_interval)`,
//! so an overrunning poll never causes unbounded drift.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Milliseconds on the session's monotonic clock.
pub type Millis = u64;

/// Monotonic millisecond clock shared by a session's polled detectors.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Millis;
}

/// Milliseconds elapsed since the session started.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SessionClock {
    fn now_ms(&self) -> Millis {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(Millis::MAX)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn set(&self, now: Millis) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Millis) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}

/// Cadence parameters for one polled detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollTiming {
    /// Time between the starts of consecutive poll cycles.
    pub restart_interval_ms: Millis,
    /// Longest a poll window stays open without a completion signal.
    pub guaranteed_listen_ms: Millis,
}

impl PollTiming {
    pub const fn new(restart_interval_ms: Millis, guaranteed_listen_ms: Millis) -> Self {
        Self {
            restart_interval_ms,
            guaranteed_listen_ms,
        }
    }
}

/// Current position in the poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Waiting { fire_at: Millis },
    Listening { opened_at: Millis, close_at: Millis },
}

/// What the owner of the schedule must do now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAction {
    /// Open the listen window: acquire the resource and start collecting.
    Open,
    /// The window timed out: release the resource and flush what was collected.
    ForceClose,
}

/// A due poll, tagged with the schedule generation it was computed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollDeadline {
    pub at: Millis,
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub struct PollSchedule {
    timing: PollTiming,
    phase: PollPhase,
    generation: u64,
}

impl PollSchedule {
    pub fn new(timing: PollTiming) -> Self {
        Self {
            timing,
            phase: PollPhase::Idle,
            generation: 0,
        }
    }

    pub fn timing(&self) -> PollTiming {
        self.timing
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_listening(&self) -> bool {
        matches!(self.phase, PollPhase::Listening { .. })
    }

    /// Schedule the first poll at `now`.
    pub fn start(&mut self, now: Millis) {
        self.generation += 1;
        self.phase = PollPhase::Waiting { fire_at: now };
    }

    /// Cancel any pending poll. Returns true if a window was open.
    ///
    /// Bumps the generation so deadlines handed out earlier can no longer fire.
    pub fn cancel(&mut self) -> bool {
        let was_listening = self.is_listening();
        self.generation += 1;
        self.phase = PollPhase::Idle;
        was_listening
    }

    /// When the schedule next needs attention, if ever.
    pub fn next_deadline(&self) -> Option<PollDeadline> {
        let at = match self.phase {
            PollPhase::Idle => return None,
            PollPhase::Waiting { fire_at } => fire_at,
            PollPhase::Listening { close_at, .. } => close_at,
        };
        Some(PollDeadline {
            at,
            generation: self.generation,
        })
    }

    /// Advance the schedule to `now`.
    ///
    /// `generation` must be the one from the deadline that woke the caller;
    /// a stale generation means the schedule was cancelled or restarted in
    /// between, and nothing fires.
    pub fn fire(&mut self, now: Millis, generation: u64) -> Option<PollAction> {
        if generation != self.generation {
            return None;
        }
        match self.phase {
            PollPhase::Idle => None,
            PollPhase::Waiting { fire_at } if now >= fire_at => {
                // Cadence counts from the scheduled time, the window from now.
                self.phase = PollPhase::Listening {
                    opened_at: fire_at,
                    close_at: now.saturating_add(self.timing.guaranteed_listen_ms),
                };
                Some(PollAction::Open)
            }
            PollPhase::Listening { opened_at, close_at } if now >= close_at => {
                self.schedule_next(now, opened_at);
                Some(PollAction::ForceClose)
            }
            _ => None,
        }
    }

    /// The open window finished on its own. Returns false if no window was open.
    pub fn complete(&mut self, now: Millis) -> bool {
        match self.phase {
            PollPhase::Listening { opened_at, .. } => {
                self.schedule_next(now, opened_at);
                true
            }
            _ => false,
        }
    }

    /// The window could not open (resource unavailable). The cycle is skipped
    /// and the cadence is unchanged.
    pub fn skip(&mut self, now: Millis) {
        if let PollPhase::Listening { opened_at, .. } = self.phase {
            self.schedule_next(now, opened_at);
        }
    }

    fn schedule_next(&mut self, now: Millis, opened_at: Millis) {
        let fire_at = now.max(opened_at.saturating_add(self.timing.restart_interval_ms));
        self.phase = PollPhase::Waiting { fire_at };
    }
}
