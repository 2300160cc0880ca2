//! Detectors driven by the poll scheduler: location, bluetooth, ambient sound
//! and image.
//!
//! Each poll cycle opens a listen window by asking the platform radio to start
//! a scan. Samples are only recorded while the window is open. The window
//! closes when the platform reports completion (or, for location and image,
//! on the first sample) and otherwise when the guaranteed listen interval runs
//! out. Closing releases the radio and flushes.

use super::{Detector, DetectorBase, DetectorType, SensorEvent};
use crate::core::record::{Field, Record};
use crate::core::scheduler::{Clock, PollAction, PollDeadline, PollSchedule, PollTiming};
use crate::platform::Radio;
use crate::record;
use crate::session::SessionContext;
use std::sync::Arc;
use tracing::{debug, trace};

pub struct IntervalDetector {
    base: DetectorBase,
    schedule: PollSchedule,
    clock: Arc<dyn Clock>,
    radio: Arc<dyn Radio>,
    window_open: bool,
}

impl IntervalDetector {
    pub fn location(ctx: &SessionContext) -> Self {
        Self::new(DetectorType::Location, ctx.config.polling.location, ctx)
    }

    pub fn bluetooth(ctx: &SessionContext) -> Self {
        Self::new(DetectorType::Bluetooth, ctx.config.polling.bluetooth, ctx)
    }

    pub fn ambient_sound(ctx: &SessionContext) -> Self {
        Self::new(DetectorType::AmbientSound, ctx.config.polling.ambient_sound, ctx)
    }

    pub fn image(ctx: &SessionContext) -> Self {
        Self::new(DetectorType::Image, ctx.config.polling.image, ctx)
    }

    fn new(kind: DetectorType, timing: PollTiming, ctx: &SessionContext) -> Self {
        Self {
            base: DetectorBase::new(kind, ctx),
            schedule: PollSchedule::new(timing),
            clock: ctx.clock.clone(),
            radio: ctx.platform.radio.clone(),
            window_open: false,
        }
    }

    pub fn schedule(&self) -> &PollSchedule {
        &self.schedule
    }

    pub fn is_window_open(&self) -> bool {
        self.window_open
    }

    fn open_window(&mut self, now: u64) {
        let kind = self.base.kind();
        if self.radio.begin_scan(kind) {
            debug!(detector = %kind, "poll window opened");
            self.window_open = true;
        } else {
            debug!(detector = %kind, "resource unavailable; poll cycle skipped");
            self.schedule.skip(now);
            self.base.record_poll_skipped();
        }
    }

    fn release_radio(&mut self) {
        if self.window_open {
            self.window_open = false;
            self.radio.end_scan(self.base.kind());
        }
    }

    fn close_window(&mut self) {
        if self.window_open {
            self.release_radio();
            self.base.flush();
        }
    }

    /// Encode a sample for this detector's file. The flag says whether the
    /// sample by itself completes the window.
    fn encode(&self, event: SensorEvent) -> Option<(Record, bool)> {
        match (self.base.kind(), event) {
            (DetectorType::Location, SensorEvent::Location(fix)) => Some((
                record![
                    fix.observed_at.timestamp_millis(),
                    fix.latitude,
                    fix.longitude,
                    fix.altitude,
                    fix.accuracy,
                    fix.provider
                ],
                true,
            )),
            (DetectorType::Bluetooth, SensorEvent::Bluetooth(seen)) => Some((
                record![seen.observed_at.timestamp_millis(), seen.address, seen.rssi],
                false,
            )),
            (DetectorType::AmbientSound, SensorEvent::Sound(sound)) => Some((
                record![
                    sound.observed_at.timestamp_millis(),
                    sound.mean_amplitude,
                    sound.peak_amplitude
                ],
                false,
            )),
            (DetectorType::Image, SensorEvent::Image(frame)) => {
                let mut row = record![frame.observed_at.timestamp_millis(), frame.width, frame.height];
                for feature in frame.features {
                    row.push(Field::Float(feature));
                }
                Some((row, true))
            }
            _ => None,
        }
    }
}

impl Detector for IntervalDetector {
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
        self.schedule.start(self.clock.now_ms());
        self.base.finish_start();
        true
    }

    fn stop_listening(&mut self) {
        if !self.base.begin_stop() {
            return;
        }
        self.schedule.cancel();
        self.release_radio();
        self.base.finish_stop();
    }

    fn on_event(&mut self, event: SensorEvent) {
        if matches!(event, SensorEvent::ScanComplete) {
            if self.window_open {
                self.schedule.complete(self.clock.now_ms());
                self.close_window();
            }
            return;
        }
        if !(self.base.is_listening() && self.window_open) {
            self.base.drop_event();
            return;
        }
        let kind = event.kind();
        match self.encode(event) {
            Some((row, completes)) => {
                self.base.record(row);
                if completes {
                    self.schedule.complete(self.clock.now_ms());
                    self.close_window();
                }
            }
            None => trace!(detector = %self.base.kind(), kind, "ignored event"),
        }
    }

    fn next_poll(&self) -> Option<PollDeadline> {
        if self.base.is_listening() {
            self.schedule.next_deadline()
        } else {
            None
        }
    }

    fn poll(&mut self, generation: u64) {
        if !self.base.is_listening() {
            return;
        }
        let now = self.clock.now_ms();
        match self.schedule.fire(now, generation) {
            Some(PollAction::Open) => self.open_window(now),
            Some(PollAction::ForceClose) => {
                debug!(detector = %self.base.kind(), "poll window timed out");
                self.close_window();
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scheduler::PollPhase;
    use crate::detector::test_support::Harness;
    use crate::detector::types::{BluetoothSighting, ImageFrame, LocationFix};
    use crate::detector::{DetectorState, Permission};
    use crate::platform::StaticCapabilities;
    use chrono::Utc;

    fn fire_due(detector: &mut IntervalDetector) {
        let deadline = detector.next_poll().expect("poll pending");
        detector.poll(deadline.generation);
    }

    fn sighting(address: &str) -> SensorEvent {
        SensorEvent::Bluetooth(BluetoothSighting {
            observed_at: Utc::now(),
            address: address.to_string(),
            rssi: -60,
        })
    }

    #[test]
    fn test_unanswered_window_force_closes_on_cadence() {
        let h = Harness::with_config(StaticCapabilities::all(), |c| {
            c.polling.bluetooth = PollTiming::new(4000, 4000);
        });
        let mut detector = IntervalDetector::bluetooth(&h.ctx);
        assert!(detector.start_listening());

        fire_due(&mut detector);
        assert!(detector.is_window_open());
        detector.on_event(sighting("AA:BB"));

        h.clock.set(4000);
        assert_eq!(detector.next_poll().unwrap().at, 4000);
        fire_due(&mut detector);

        assert!(!detector.is_window_open());
        assert_eq!(detector.base().flush_count(), 1);
        assert_eq!(detector.base().file().line_count().unwrap(), 1);
        assert_eq!(detector.schedule().phase(), PollPhase::Waiting { fire_at: 4000 });
        assert_eq!(h.radio.scans_ended(), 1);
    }

    #[test]
    fn test_completion_closes_window_early() {
        let h = Harness::new(StaticCapabilities::all());
        let mut detector = IntervalDetector::bluetooth(&h.ctx);
        detector.start_listening();
        fire_due(&mut detector);
        detector.on_event(sighting("AA:BB"));
        detector.on_event(sighting("CC:DD"));

        h.clock.set(500);
        detector.on_event(SensorEvent::ScanComplete);
        assert!(!detector.is_window_open());
        assert_eq!(detector.base().file().line_count().unwrap(), 2);
        assert_eq!(
            detector.next_poll().unwrap().at,
            h.ctx.config.polling.bluetooth.restart_interval_ms
        );
    }

    #[test]
    fn test_location_fix_completes_window() {
        let h = Harness::new(StaticCapabilities::all());
        let mut detector = IntervalDetector::location(&h.ctx);
        detector.start_listening();
        fire_due(&mut detector);
        detector.on_event(SensorEvent::Location(LocationFix {
            observed_at: Utc::now(),
            latitude: 59.91,
            longitude: 10.75,
            altitude: 23.0,
            accuracy: 5.0,
            provider: "gps".into(),
        }));
        assert!(!detector.is_window_open());
        let rows = detector.base().file().read_records().unwrap();
        assert_eq!(rows[0].len(), 6);
        assert_eq!(rows[0].fields()[5], Field::Text("gps".into()));
    }

    #[test]
    fn test_image_row_appends_features() {
        let h = Harness::new(StaticCapabilities::all());
        let mut detector = IntervalDetector::image(&h.ctx);
        detector.start_listening();
        fire_due(&mut detector);
        detector.on_event(SensorEvent::Image(ImageFrame {
            observed_at: Utc::now(),
            width: 64,
            height: 48,
            features: vec![0.25, 0.5],
        }));
        let rows = detector.base().file().read_records().unwrap();
        assert_eq!(rows[0].len(), 5);
        assert_eq!(rows[0].fields()[1], Field::Int(64));
    }

    #[test]
    fn test_samples_outside_window_are_dropped() {
        let h = Harness::new(StaticCapabilities::all());
        let mut detector = IntervalDetector::bluetooth(&h.ctx);
        detector.start_listening();
        detector.on_event(sighting("AA:BB"));
        assert_eq!(detector.base().buffered(), 0);
        assert_eq!(h.ctx.stats.stats().events_dropped, 1);
    }

    #[test]
    fn test_stop_cancels_pending_poll_and_flushes_once() {
        let h = Harness::new(StaticCapabilities::all());
        let mut detector = IntervalDetector::bluetooth(&h.ctx);
        detector.start_listening();
        let stale = detector.next_poll().unwrap();
        detector.poll(stale.generation);
        detector.on_event(sighting("AA:BB"));

        detector.stop_listening();
        assert_eq!(detector.base().flush_count(), 1);
        assert_eq!(detector.base().file().line_count().unwrap(), 1);
        assert!(detector.next_poll().is_none());
        assert_eq!(h.radio.scans_ended(), 1);

        // A deadline handed out before the stop never fires after a restart.
        detector.start_listening();
        let started = h.radio.scans_started();
        detector.poll(stale.generation);
        assert_eq!(h.radio.scans_started(), started);
    }

    #[test]
    fn test_refused_radio_skips_cycle() {
        let h = Harness::new(StaticCapabilities::all());
        h.radio.set_enabled(false);
        let mut detector = IntervalDetector::ambient_sound(&h.ctx);
        detector.start_listening();
        fire_due(&mut detector);

        assert!(!detector.is_window_open());
        assert_eq!(h.ctx.stats.stats().polls_skipped, 1);
        assert_eq!(
            detector.next_poll().unwrap().at,
            h.ctx.config.polling.ambient_sound.restart_interval_ms
        );
    }

    #[test]
    fn test_denied_permission_disables() {
        let h = Harness::new(StaticCapabilities::all().deny_permission(Permission::Camera));
        let mut detector = IntervalDetector::image(&h.ctx);
        assert!(!detector.start_listening());
        assert_eq!(detector.state(), DetectorState::Disabled);
        assert!(detector.next_poll().is_none());
    }
}
