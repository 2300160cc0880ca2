//! One-shot detectors: host hardware identity and session metadata.

use super::{Detector, DetectorBase, DetectorType, SensorEvent};
use crate::bus::BusEvent;
use crate::record;
use crate::session::SessionContext;
use chrono::Utc;
use std::time::Duration;
use tracing::trace;

/// Writes a single row describing the host when constructed.
///
/// The row is flushed immediately and does not depend on start/stop; starting
/// the detector only marks it as part of the running session.
pub struct HardwareDetector {
    base: DetectorBase,
}

impl HardwareDetector {
    pub fn new(ctx: &SessionContext) -> Self {
        let mut base = DetectorBase::new(DetectorType::Hardware, ctx);
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        base.record(record![
            Utc::now().timestamp_millis(),
            host,
            std::env::consts::OS,
            std::env::consts::ARCH,
            std::env::consts::FAMILY,
            crate::VERSION
        ]);
        base.flush();
        Self { base }
    }
}

impl Detector for HardwareDetector {
    fn base(&self) -> &DetectorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut DetectorBase {
        &mut self.base
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn start_listening(&mut self) -> bool {
        if !self.base.begin_start(true) {
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
        trace!(kind = event.kind(), "hardware detector ignored event");
    }

    fn authentication_listen_interval(&self) -> Duration {
        Duration::from_secs(1)
    }
}

/// Records diagnostic notes and lifecycle changes seen on the bus.
///
/// Registered first in a gathering session so its file opens with the
/// session's context.
pub struct MetaDataDetector {
    base: DetectorBase,
}

impl MetaDataDetector {
    pub fn new(ctx: &SessionContext) -> Self {
        Self {
            base: DetectorBase::new(DetectorType::MetaData, ctx),
        }
    }

    fn note(&mut self, text: String) {
        self.base.record(record![Utc::now().timestamp_millis(), text]);
    }
}

impl Detector for MetaDataDetector {
    fn base(&self) -> &DetectorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut DetectorBase {
        &mut self.base
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn start_listening(&mut self) -> bool {
        if !self.base.begin_start(true) {
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
        trace!(kind = event.kind(), "metadata detector ignored event");
    }

    fn on_signal(&mut self, event: &BusEvent) {
        if !self.base.is_listening() {
            return;
        }
        match event {
            BusEvent::MetaData { message } => self.note(message.clone()),
            BusEvent::Status { detector, state } => {
                self.note(format!("{} {}", detector.label(), state.as_str()))
            }
            BusEvent::Service { kind, message } => self.note(match message {
                Some(m) => format!("{kind:?} {m}"),
                None => format!("{kind:?}"),
            }),
            _ => {}
        }
    }
}
