//! Broadcast-driven wifi scanning.

use super::{Detector, DetectorBase, DetectorType, SensorEvent};
use crate::bus::BusEvent;
use crate::detector::types::WifiScan;
use crate::platform::{NetworkStatus, Radio};
use crate::record;
use crate::session::SessionContext;
use std::sync::Arc;
use tracing::{debug, trace};

/// Records the access points visible in each completed wifi scan.
///
/// A scan is requested when the detector starts and whenever a rescan signal
/// arrives on the bus. At most one scan is in flight; the platform's scan
/// result or wifi state change ends it.
pub struct NetworkDetector {
    base: DetectorBase,
    network: Arc<dyn NetworkStatus>,
    radio: Arc<dyn Radio>,
    wifi_enabled: bool,
    scanning: bool,
}

impl NetworkDetector {
    pub fn new(ctx: &SessionContext) -> Self {
        let network = ctx.platform.network.clone();
        Self {
            base: DetectorBase::new(DetectorType::Network, ctx),
            wifi_enabled: network.is_wifi_enabled(),
            network,
            radio: ctx.platform.radio.clone(),
            scanning: false,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    fn perform_scan(&mut self) {
        if self.scanning || !self.is_enabled() {
            return;
        }
        if !(self.wifi_enabled && self.network.is_wifi_enabled()) {
            debug!("wifi disabled; scan skipped");
            return;
        }
        if self.radio.begin_scan(DetectorType::Network) {
            self.scanning = true;
        } else {
            debug!("wifi radio refused scan");
            self.base.record_poll_skipped();
        }
    }

    fn end_scan(&mut self) {
        if self.scanning {
            self.scanning = false;
            self.radio.end_scan(DetectorType::Network);
        }
    }

    fn on_scan(&mut self, scan: WifiScan) {
        if !self.base.is_listening() {
            self.base.drop_event();
            return;
        }
        let millis = scan.observed_at.timestamp_millis();
        for ap in scan.access_points {
            self.base.record(record![millis, ap.bssid, ap.level]);
        }
        self.base.flush();
        self.end_scan();
    }

    fn on_wifi_state(&mut self, enabled: bool) {
        self.wifi_enabled = enabled;
        self.end_scan();
        self.base.publish_status();
    }
}

impl Detector for NetworkDetector {
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
        self.perform_scan();
        true
    }

    fn stop_listening(&mut self) {
        if self.base.begin_stop() {
            self.end_scan();
            self.base.finish_stop();
        }
    }

    fn on_event(&mut self, event: SensorEvent) {
        match event {
            SensorEvent::WifiScan(scan) => self.on_scan(scan),
            SensorEvent::WifiState { enabled } => self.on_wifi_state(enabled),
            other => trace!(kind = other.kind(), "network detector ignored event"),
        }
    }

    fn on_signal(&mut self, event: &BusEvent) {
        if let BusEvent::WifiChanged { message: None } = event {
            if self.base.is_listening() {
                self.perform_scan();
            }
        }
    }
}
