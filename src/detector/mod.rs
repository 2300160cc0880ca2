//! Detectors: uniform lifecycle over heterogeneous event sources.
//!
//! Every detector implements [`Detector`] and holds a [`DetectorBase`] that
//! owns its state machine, session buffer and session file. Variants add only
//! what is specific to their source:
//!
//! - [`motion`]: push-driven hardware sensors, rate-limited by a sampling gate
//! - [`network`]: broadcast-driven wifi scans
//! - [`interval`]: location, bluetooth, ambient sound and image, driven by the
//!   poll scheduler
//! - [`static_info`]: one-shot hardware info and session metadata
//!
//! A detector's buffer, gate and schedule are only touched through
//! `&mut self`, so each detector is an independent unit of mutable state. The
//! session wraps each one in its own mutex; event callbacks run on whatever
//! thread the platform delivers on.

pub mod interval;
pub mod motion;
pub mod network;
pub mod static_info;
pub mod types;

use crate::bus::{BusEvent, EventBus};
use crate::core::buffer::SessionBuffer;
use crate::core::record::Record;
use crate::core::scheduler::PollDeadline;
use crate::core::writer::SessionFile;
use crate::platform::Capabilities;
use crate::session::SessionContext;
use crate::transparency::SharedTransparencyLog;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use interval::IntervalDetector;
pub use motion::MotionDetector;
pub use network::NetworkDetector;
pub use static_info::{HardwareDetector, MetaDataDetector};
pub use types::{DetectorType, Hardware, Permission, SensorEvent};

/// Lifecycle state of a detector.
///
/// `Idle → Starting → Listening → Stopping → Idle`; `Disabled` is entered
/// from `Idle` when a start finds the capability missing. Capabilities are
/// re-checked on every start, so a later start may still succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorState {
    Idle,
    Starting,
    Listening,
    Stopping,
    Disabled,
}

impl DetectorState {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectorState::Idle => "idle",
            DetectorState::Starting => "starting",
            DetectorState::Listening => "listening",
            DetectorState::Stopping => "stopping",
            DetectorState::Disabled => "disabled",
        }
    }
}

/// The capability set shared by every detector variant.
pub trait Detector: Send {
    fn base(&self) -> &DetectorBase;

    fn base_mut(&mut self) -> &mut DetectorBase;

    /// Pure capability check: permission granted and hardware present.
    fn is_enabled(&self) -> bool;

    /// Start listening. Returns false if disabled or already listening.
    fn start_listening(&mut self) -> bool;

    /// Stop listening and flush. No-op unless currently listening.
    fn stop_listening(&mut self);

    /// Handle an inbound platform event.
    fn on_event(&mut self, event: SensorEvent);

    /// Handle a cross-detector signal from the bus.
    fn on_signal(&mut self, _event: &BusEvent) {}

    /// How long the detector listens during an authentication session.
    /// Zero means for the whole session.
    fn authentication_listen_interval(&self) -> Duration {
        Duration::ZERO
    }

    /// Next time the poll driver must call [`Detector::poll`], if any.
    fn next_poll(&self) -> Option<PollDeadline> {
        None
    }

    /// Advance the poll schedule. Called by the poll driver.
    fn poll(&mut self, _generation: u64) {}

    fn detector_type(&self) -> DetectorType {
        self.base().kind()
    }

    fn detector_name(&self) -> &'static str {
        self.detector_type().name()
    }

    fn required_permission(&self) -> Option<Permission> {
        self.detector_type().required_permission()
    }

    fn state(&self) -> DetectorState {
        self.base().state()
    }

    fn is_listening(&self) -> bool {
        self.state() == DetectorState::Listening
    }

    /// Hand the buffered records to the session file.
    fn flush(&mut self) {
        self.base_mut().flush();
    }
}

/// State, buffer and persistence shared by every detector.
pub struct DetectorBase {
    kind: DetectorType,
    state: DetectorState,
    buffer: SessionBuffer,
    file: SessionFile,
    bus: Arc<EventBus>,
    capabilities: Arc<dyn Capabilities>,
    stats: SharedTransparencyLog,
    flushes: u64,
}

impl DetectorBase {
    pub fn new(kind: DetectorType, ctx: &SessionContext) -> Self {
        let threshold = ctx.config.flush_threshold_for(kind);
        Self {
            kind,
            state: DetectorState::Idle,
            buffer: SessionBuffer::new(threshold),
            file: SessionFile::new(&ctx.config.sessions_path(), kind, &ctx.owner_id),
            bus: ctx.bus.clone(),
            capabilities: ctx.platform.capabilities.clone(),
            stats: ctx.stats.clone(),
            flushes: 0,
        }
    }

    pub fn kind(&self) -> DetectorType {
        self.kind
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.state == DetectorState::Listening
    }

    pub fn capabilities(&self) -> &dyn Capabilities {
        self.capabilities.as_ref()
    }

    pub fn file(&self) -> &SessionFile {
        &self.file
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffered_records(&self) -> &[Record] {
        self.buffer.records()
    }

    /// Number of flushes performed, including empty ones.
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    pub fn permission_granted(&self) -> bool {
        self.kind
            .required_permission()
            .map_or(true, |p| self.capabilities.has_permission(p))
    }

    pub fn hardware_present(&self) -> bool {
        self.kind
            .hardware()
            .map_or(true, |h| self.capabilities.has_hardware(h))
    }

    /// Default capability check: permission granted and hardware present.
    pub fn capability_check(&self) -> bool {
        self.permission_granted() && self.hardware_present()
    }

    /// Enter `Starting`. `enabled` must come from a fresh capability check.
    ///
    /// Returns false (and settles in `Disabled` when not enabled) if the
    /// detector cannot start.
    pub fn begin_start(&mut self, enabled: bool) -> bool {
        match self.state {
            DetectorState::Idle | DetectorState::Disabled => {}
            _ => return false,
        }
        if !enabled {
            debug!(detector = %self.kind, "capability missing; detector disabled");
            self.set_state(DetectorState::Disabled);
            return false;
        }
        self.state = DetectorState::Starting;
        true
    }

    /// Complete a start: `Starting → Listening`, announced on the bus.
    pub fn finish_start(&mut self) {
        if self.state == DetectorState::Starting {
            info!(detector = %self.kind, "listening");
            self.set_state(DetectorState::Listening);
        }
    }

    /// Enter `Stopping`. Returns false if the detector was not listening.
    pub fn begin_stop(&mut self) -> bool {
        if self.state != DetectorState::Listening {
            return false;
        }
        self.state = DetectorState::Stopping;
        true
    }

    /// Complete a stop: flush, then `Stopping → Idle`, announced on the bus.
    pub fn finish_stop(&mut self) {
        if self.state != DetectorState::Stopping {
            return;
        }
        self.flush();
        info!(detector = %self.kind, "stopped");
        self.set_state(DetectorState::Idle);
    }

    /// Append an accepted record, flushing if the threshold is reached.
    pub fn record(&mut self, record: Record) {
        self.stats.record_accepted();
        if let Some(batch) = self.buffer.push(record) {
            self.persist(batch);
        }
    }

    /// Count an event that was deliberately not recorded.
    pub fn drop_event(&self) {
        self.stats.record_dropped();
    }

    pub fn record_poll_skipped(&self) {
        self.stats.record_poll_skipped();
    }

    /// Swap out the buffer and append it to the session file.
    pub fn flush(&mut self) {
        let batch = self.buffer.take();
        self.persist(batch);
    }

    fn persist(&mut self, batch: Vec<Record>) {
        self.flushes += 1;
        let count = batch.len() as u64;
        match self.file.append(&batch) {
            Ok(0) => {}
            Ok(written) => {
                debug!(detector = %self.kind, written, "flushed session buffer");
                self.stats.record_persisted(written as u64);
            }
            Err(e) => {
                warn!(detector = %self.kind, lost = count, "flush failed: {e}");
                self.stats.record_lost(count);
            }
        }
    }

    pub fn publish(&self, event: BusEvent) {
        self.bus.publish(event);
    }

    /// Announce the current state on the bus.
    pub fn publish_status(&self) {
        self.publish(BusEvent::Status {
            detector: self.kind,
            state: self.state,
        });
    }

    fn set_state(&mut self, state: DetectorState) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.publish_status();
    }
}

impl std::fmt::Debug for DetectorBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorBase")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .field("file", &self.file.path())
            .finish()
    }
}
