//! Push-driven motion sensors: accelerometer, gyroscope and magnetometer.

use super::{Detector, DetectorBase, DetectorType, SensorEvent};
use crate::bus::BusEvent;
use crate::core::gate::SamplingGate;
use crate::detector::types::MotionSample;
use crate::record;
use crate::session::SessionContext;
use std::time::Duration;
use tracing::trace;

/// A hardware sensor delivering timestamped `x y z` samples.
///
/// Every sample goes through the sampling gate on hardware event time; rows
/// carry wall-clock epoch millis derived from the platform's boot epoch.
pub struct MotionDetector {
    base: DetectorBase,
    gate: SamplingGate,
    boot_epoch_millis: i64,
    auth_listen: Duration,
}

impl MotionDetector {
    pub fn accelerometer(ctx: &SessionContext) -> Self {
        Self::new(DetectorType::Accelerometer, Duration::ZERO, ctx)
    }

    pub fn gyroscope(ctx: &SessionContext) -> Self {
        Self::new(DetectorType::Gyroscope, Duration::ZERO, ctx)
    }

    pub fn magnetometer(ctx: &SessionContext) -> Self {
        Self::new(DetectorType::Magnetometer, Duration::from_secs(3), ctx)
    }

    fn new(kind: DetectorType, auth_listen: Duration, ctx: &SessionContext) -> Self {
        let base = DetectorBase::new(kind, ctx);
        let boot_epoch_millis = base.capabilities().boot_epoch_millis();

        if let Some(fifo) = kind
            .hardware()
            .and_then(|h| base.capabilities().fifo_capacity(h))
        {
            base.publish(BusEvent::meta(format!(
                "{} FIFO SIZE {} {}",
                kind.label(),
                fifo.max_events,
                fifo.reserved_events
            )));
        }

        Self {
            base,
            gate: SamplingGate::new(ctx.config.motion_interval),
            boot_epoch_millis,
            auth_listen,
        }
    }

    pub fn gate(&self) -> &SamplingGate {
        &self.gate
    }

    fn epoch_millis(&self, timestamp_nanos: u64) -> i64 {
        let since_boot = i64::try_from(timestamp_nanos / 1_000_000).unwrap_or(i64::MAX);
        self.boot_epoch_millis.saturating_add(since_boot)
    }

    fn on_sample(&mut self, sample: MotionSample) {
        if !self.base.is_listening() {
            self.base.drop_event();
            return;
        }
        if let Err(rejection) = self.gate.check(sample.timestamp_nanos) {
            trace!(detector = %self.base.kind(), ?rejection, "sample gated");
            self.base.drop_event();
            return;
        }
        let millis = self.epoch_millis(sample.timestamp_nanos);
        self.base
            .record(record![millis, sample.x, sample.y, sample.z]);
    }
}

impl Detector for MotionDetector {
    fn base(&self) -> &DetectorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut DetectorBase {
        &mut self.base
    }

    fn is_enabled(&self) -> bool {
        self.base.capability_check()
    }

    fn start_listening(&mut self) -> bool {
        let enabled = self.is_enabled();
        if !self.base.begin_start(enabled) {
            return false;
        }
        self.base.finish_start();
        true
    }

    fn stop_listening(&mut self) {
        if self.base.begin_stop() {
            self.base.finish_stop();
        }
    }

    fn on_event(&mut self, event: SensorEvent) {
        match event {
            SensorEvent::Motion(sample) => self.on_sample(sample),
            other => trace!(detector = %self.base.kind(), kind = other.kind(), "ignored event"),
        }
    }

    fn authentication_listen_interval(&self) -> Duration {
        self.auth_listen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::Field;
    use crate::detector::test_support::Harness;
    use crate::detector::types::{FifoCapacity, Hardware};
    use crate::detector::DetectorState;
    use crate::platform::StaticCapabilities;

    const MS: u64 = 1_000_000;

    fn sample(timestamp_nanos: u64) -> SensorEvent {
        SensorEvent::Motion(MotionSample {
            timestamp_nanos,
            x: 0.5,
            y: -1.0,
            z: 9.81,
        })
    }

    #[test]
    fn test_gate_scenario_keeps_first_and_third() {
        let h = Harness::with_config(StaticCapabilities::all(), |c| {
            c.motion_interval = Duration::from_millis(15);
        });
        let mut detector = MotionDetector::accelerometer(&h.ctx);
        assert!(detector.start_listening());

        detector.on_event(sample(0));
        detector.on_event(sample(10 * MS));
        detector.on_event(sample(20 * MS));

        assert_eq!(detector.base().buffered(), 2);
        assert_eq!(h.ctx.stats.stats().events_dropped, 1);
    }

    #[test]
    fn test_rows_carry_epoch_millis_and_axes() {
        let h = Harness::new(StaticCapabilities::all().with_boot_epoch_millis(1_000));
        let mut detector = MotionDetector::gyroscope(&h.ctx);
        detector.start_listening();
        detector.on_event(sample(250 * MS));

        let row = &detector.base().buffered_records()[0];
        assert_eq!(row.fields()[0], Field::Int(1_250));
        assert_eq!(row.fields()[3], Field::Float(9.81));
    }

    #[test]
    fn test_samples_before_start_are_dropped() {
        let h = Harness::new(StaticCapabilities::all());
        let mut detector = MotionDetector::accelerometer(&h.ctx);
        detector.on_event(sample(0));
        assert_eq!(detector.base().buffered(), 0);
        assert!(detector.gate().last_timestamp_nanos().is_none());
    }

    #[test]
    fn test_missing_hardware_disables() {
        let h = Harness::new(StaticCapabilities::all().without_hardware(Hardware::Magnetometer));
        let mut detector = MotionDetector::magnetometer(&h.ctx);
        assert!(!detector.is_enabled());
        assert!(!detector.start_listening());
        assert_eq!(detector.state(), DetectorState::Disabled);
    }

    #[test]
    fn test_fifo_note_published_at_construction() {
        let caps = StaticCapabilities::all().with_fifo(
            Hardware::Accelerometer,
            FifoCapacity {
                max_events: 3000,
                reserved_events: 300,
            },
        );
        let h = Harness::new(caps);
        let _detector = MotionDetector::accelerometer(&h.ctx);
        assert_eq!(
            h.events.events(),
            vec![BusEvent::meta("Accelerometer FIFO SIZE 3000 300")]
        );
    }

    #[test]
    fn test_stop_twice_flushes_once() {
        let h = Harness::new(StaticCapabilities::all());
        let mut detector = MotionDetector::accelerometer(&h.ctx);
        detector.start_listening();
        detector.on_event(sample(0));
        h.events.clear();

        detector.stop_listening();
        detector.stop_listening();

        assert_eq!(detector.base().flush_count(), 1);
        assert_eq!(h.status_events().len(), 1);
        assert_eq!(detector.base().file().line_count().unwrap(), 1);
    }

    #[test]
    fn test_failed_flush_loses_batch_and_keeps_listening() {
        let h = Harness::with_config(StaticCapabilities::all(), |c| {
            std::fs::create_dir_all(&c.data_path).unwrap();
            let blocker = c.data_path.join("not-a-dir");
            std::fs::write(&blocker, "x").unwrap();
            c.data_path = blocker;
            c.flush_overrides.insert(DetectorType::Accelerometer, 3);
        });
        let mut detector = MotionDetector::accelerometer(&h.ctx);
        assert!(detector.start_listening());

        for i in 0..3 {
            detector.on_event(sample(i * 50 * MS));
        }
        let stats = h.ctx.stats.stats();
        assert_eq!(stats.records_lost, 3);
        assert_eq!(stats.records_persisted, 0);
        assert_eq!(detector.base().buffered(), 0);
        assert_eq!(detector.state(), DetectorState::Listening);

        detector.on_event(sample(200 * MS));
        assert_eq!(detector.base().buffered(), 1);
        assert_eq!(h.ctx.stats.stats().records_accepted, 4);
    }

    #[test]
    fn test_authentication_intervals() {
        let h = Harness::new(StaticCapabilities::all());
        assert_eq!(
            MotionDetector::accelerometer(&h.ctx).authentication_listen_interval(),
            Duration::ZERO
        );
        assert_eq!(
            MotionDetector::magnetometer(&h.ctx).authentication_listen_interval(),
            Duration::from_millis(3000)
        );
    }
}
