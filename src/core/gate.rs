//! Minimum-spacing gate for inbound event timestamps.
//!
//! Gating works on the event source's own clock (hardware event time for
//! sensors), never on wall-clock time.

use std::time::Duration;

/// Why an event was refused by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Arrived sooner than the minimum interval after the last accepted event.
    TooSoon,
    /// Timestamp not after the last accepted event (duplicate or clock anomaly).
    OutOfOrder,
}

/// Enforces a minimum interval between accepted events.
#[derive(Debug, Clone)]
pub struct SamplingGate {
    min_interval_nanos: u64,
    last_timestamp_nanos: Option<u64>,
}

impl SamplingGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval_nanos: u64::try_from(min_interval.as_nanos()).unwrap_or(u64::MAX),
            last_timestamp_nanos: None,
        }
    }

    /// A gate that accepts every strictly increasing timestamp.
    pub fn unthrottled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Check an event timestamp, recording it when accepted.
    pub fn check(&mut self, timestamp_nanos: u64) -> Result<(), Rejection> {
        if let Some(last) = self.last_timestamp_nanos {
            if timestamp_nanos <= last {
                return Err(Rejection::OutOfOrder);
            }
            if timestamp_nanos - last < self.min_interval_nanos {
                return Err(Rejection::TooSoon);
            }
        }
        self.last_timestamp_nanos = Some(timestamp_nanos);
        Ok(())
    }

    /// True iff the event is accepted. See [`SamplingGate::check`].
    pub fn accept(&mut self, timestamp_nanos: u64) -> bool {
        self.check(timestamp_nanos).is_ok()
    }

    pub fn last_timestamp_nanos(&self) -> Option<u64> {
        self.last_timestamp_nanos
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_nanos(self.min_interval_nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;

    #[test]
    fn test_first_event_always_accepted() {
        let mut gate = SamplingGate::new(Duration::from_secs(3600));
        assert!(gate.accept(7));
        assert_eq!(gate.last_timestamp_nanos(), Some(7));
    }

    #[test]
    fn test_events_closer_than_interval_are_dropped() {
        let mut gate = SamplingGate::new(Duration::from_millis(15));
        assert!(gate.accept(0));
        assert_eq!(gate.check(10 * MS), Err(Rejection::TooSoon));
        assert!(gate.accept(20 * MS));
        assert_eq!(gate.last_timestamp_nanos(), Some(20 * MS));
    }

    #[test]
    fn test_exact_interval_is_accepted() {
        let mut gate = SamplingGate::new(Duration::from_millis(15));
        assert!(gate.accept(100 * MS));
        assert!(gate.accept(115 * MS));
    }

    #[test]
    fn test_backwards_timestamp_never_moves_gate() {
        let mut gate = SamplingGate::new(Duration::from_millis(1));
        assert!(gate.accept(50 * MS));
        assert_eq!(gate.check(10 * MS), Err(Rejection::OutOfOrder));
        assert_eq!(gate.check(50 * MS), Err(Rejection::OutOfOrder));
        assert_eq!(gate.last_timestamp_nanos(), Some(50 * MS));
    }

    #[test]
    fn test_unthrottled_still_rejects_duplicates() {
        let mut gate = SamplingGate::unthrottled();
        assert!(gate.accept(1));
        assert!(gate.accept(2));
        assert!(!gate.accept(2));
    }
}
