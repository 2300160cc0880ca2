//! Session controller.
//!
//! A [`SensorAgent`] owns the collaborators, the event bus and the owner
//! identity. Each gathering or authentication session gets an explicit
//! [`SessionContext`] handed to every detector at construction; ending the
//! session stops and flushes every detector, then hands the finished files to
//! the platform sink.
//!
//! Cross-detector signals published on the bus are queued and dispatched
//! outside any detector lock, either right after an event is delivered or by
//! the poll driver thread.

use crate::bus::{BusEvent, ChannelSubscriber, EventBus, ServiceMessage, SharedSubscriber};
use crate::config::Config;
use crate::core::scheduler::{Clock, Millis, SessionClock};
use crate::detector::{DetectorState, DetectorType, SensorEvent};
use crate::platform::{FinishedFile, Platform};
use crate::registry::{lock, DetectorRegistry};
use crate::transparency::{create_shared_log, SharedTransparencyLog};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Preference keys.
pub const KEY_CONFIRMED_OWNER: &str = "confirmed_owner_id";
pub const KEY_PENDING_OWNER: &str = "pending_owner_id";
pub const KEY_LEARNING: &str = "learning";
pub const KEY_START_TIME: &str = "start_time";
pub const KEY_LAST_AUTHENTICATION: &str = "last_authentication";

const SIGNAL_QUEUE_CAPACITY: usize = 256;

/// Longest the poll driver sleeps between passes.
const DRIVER_IDLE_TICK: Duration = Duration::from_millis(200);

/// What a session is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Short capture for a single authentication attempt.
    Authenticate,
    /// Learning-and-gathering session, led by the metadata detector.
    Gather,
}

/// Everything a detector needs from its session.
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<Config>,
    pub platform: Platform,
    pub bus: Arc<EventBus>,
    pub stats: SharedTransparencyLog,
    pub clock: Arc<dyn Clock>,
    pub owner_id: String,
    pub session_id: Uuid,
    pub mode: SessionMode,
}

impl SessionContext {
    /// A fresh context with its own bus and counters.
    pub fn new(
        config: Arc<Config>,
        platform: Platform,
        owner_id: impl Into<String>,
        mode: SessionMode,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            platform,
            bus: Arc::new(EventBus::new()),
            stats: create_shared_log(),
            clock,
            owner_id: owner_id.into(),
            session_id: Uuid::new_v4(),
            mode,
        }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_stats(mut self, stats: SharedTransparencyLog) -> Self {
        self.stats = stats;
        self
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("owner_id", &self.owner_id)
            .field("session_id", &self.session_id)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Session controller errors.
#[derive(Debug)]
pub enum AgentError {
    /// No owner id has been authorized for gathering.
    NotAuthorized,
    AlreadyRunning,
    NotRunning,
    /// The detector is not part of the running session.
    UnknownDetector(DetectorType),
    Io(String),
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::NotAuthorized => write!(f, "no session owner authorized"),
            AgentError::AlreadyRunning => write!(f, "a session is already running"),
            AgentError::NotRunning => write!(f, "no session is running"),
            AgentError::UnknownDetector(d) => write!(f, "detector {d} is not in this session"),
            AgentError::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for AgentError {}

/// One pass of session housekeeping: dispatch queued signals, fire due polls
/// and end authentication listen windows.
struct Pump {
    registry: Arc<DetectorRegistry>,
    signals: Receiver<BusEvent>,
    clock: Arc<dyn Clock>,
    mode: SessionMode,
    started_at: Millis,
}

impl Pump {
    fn dispatch_signals(&self) -> usize {
        let mut dispatched = 0;
        while let Ok(event) = self.signals.try_recv() {
            for detector in self.registry.iter() {
                lock(detector).on_signal(&event);
            }
            dispatched += 1;
        }
        dispatched
    }

    /// Run one pass. Returns when the next pass is due, if anything is pending.
    fn run_once(&self) -> Option<Millis> {
        self.dispatch_signals();

        let now = self.clock.now_ms();
        let elapsed = now.saturating_sub(self.started_at);
        let mut next: Option<Millis> = None;
        let mut note = |at: Millis| next = Some(next.map_or(at, |n: Millis| n.min(at)));

        for shared in self.registry.iter() {
            let mut detector = lock(shared);
            if self.mode == SessionMode::Authenticate && detector.is_listening() {
                let limit = detector.authentication_listen_interval();
                if !limit.is_zero() {
                    let limit_ms = u64::try_from(limit.as_millis()).unwrap_or(Millis::MAX);
                    if elapsed >= limit_ms {
                        info!(detector = %detector.detector_type(), "authentication listen interval over");
                        detector.stop_listening();
                        continue;
                    }
                    note(self.started_at.saturating_add(limit_ms));
                }
            }
            if let Some(deadline) = detector.next_poll() {
                if deadline.at <= now {
                    detector.poll(deadline.generation);
                }
                if let Some(deadline) = detector.next_poll() {
                    note(deadline.at);
                }
            }
        }

        self.dispatch_signals();
        next
    }
}

/// Background thread driving polls and signal dispatch for a session.
struct PollDriver {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl PollDriver {
    fn spawn(pump: Arc<Pump>) -> Result<Self, AgentError> {
        let (stop, stopped) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("poll-driver".to_string())
            .spawn(move || loop {
                let wait = match pump.run_once() {
                    Some(at) => Duration::from_millis(at.saturating_sub(pump.clock.now_ms()))
                        .min(DRIVER_IDLE_TICK),
                    None => DRIVER_IDLE_TICK,
                };
                match stopped.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| AgentError::Io(e.to_string()))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    fn shutdown(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("poll driver thread panicked");
            }
        }
    }
}

struct ActiveSession {
    ctx: SessionContext,
    registry: Arc<DetectorRegistry>,
    pump: Arc<Pump>,
    tap: SharedSubscriber,
    driver: Option<PollDriver>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrustReport {
    detectors: Vec<TrustEntry>,
    trust_score: f64,
    total_trust_score: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrustEntry {
    detector_type: String,
}

fn parse_detector(name: &str) -> Option<DetectorType> {
    DetectorType::from_name(name).or_else(|| {
        DetectorType::ALL
            .into_iter()
            .find(|t| t.label().eq_ignore_ascii_case(name.trim()))
    })
}

/// The session controller.
pub struct SensorAgent {
    config: Arc<Config>,
    platform: Platform,
    bus: Arc<EventBus>,
    stats: SharedTransparencyLog,
    clock: Arc<dyn Clock>,
    drive_polls: bool,
    active: Option<ActiveSession>,
    pending_handoff: Vec<FinishedFile>,
}

impl SensorAgent {
    pub fn new(config: Config, platform: Platform) -> Self {
        if platform.store.get_i64(KEY_START_TIME).is_none() {
            platform
                .store
                .put_i64(KEY_START_TIME, Utc::now().timestamp_millis());
        }
        Self {
            config: Arc::new(config),
            platform,
            bus: Arc::new(EventBus::new()),
            stats: create_shared_log(),
            clock: Arc::new(SessionClock::new()),
            drive_polls: true,
            active: None,
            pending_handoff: Vec::new(),
        }
    }

    pub fn with_stats(mut self, stats: SharedTransparencyLog) -> Self {
        self.stats = stats;
        self
    }

    /// Use the given clock and no background driver: polls only advance when
    /// [`SensorAgent::pump`] is called.
    pub fn with_manual_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self.drive_polls = false;
        self
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn stats(&self) -> &SharedTransparencyLog {
        &self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Epoch millis of the first time an agent was created with this store.
    pub fn install_time(&self) -> Option<i64> {
        self.platform.store.get_i64(KEY_START_TIME)
    }

    /// Request gathering for `owner_id`. It stays pending until the service
    /// confirms it. Returns false, leaving the store untouched, when it is
    /// already the confirmed owner.
    pub fn authorize_gathering(&self, owner_id: &str) -> bool {
        let store = &self.platform.store;
        if store.get_string(KEY_CONFIRMED_OWNER).as_deref() == Some(owner_id) {
            return false;
        }
        store.put_string(KEY_PENDING_OWNER, Some(owner_id));
        true
    }

    pub fn is_authorized(&self) -> bool {
        self.owner_id().is_some()
    }

    /// The id new sessions are recorded under: pending first, then confirmed.
    pub fn owner_id(&self) -> Option<String> {
        let store = &self.platform.store;
        store
            .get_string(KEY_PENDING_OWNER)
            .or_else(|| store.get_string(KEY_CONFIRMED_OWNER))
            .filter(|id| !id.is_empty())
    }

    pub fn confirmed_owner_id(&self) -> Option<String> {
        self.platform.store.get_string(KEY_CONFIRMED_OWNER)
    }

    pub fn set_learning(&self, learning: bool) {
        self.platform.store.put_bool(KEY_LEARNING, learning);
        let state = if learning { "on" } else { "off" };
        self.bus.publish(BusEvent::meta(format!("learning {state}")));
    }

    pub fn is_learning(&self) -> bool {
        self.platform.store.get_bool(KEY_LEARNING).unwrap_or(false)
    }

    /// Rate-limit authentication attempts. Returns true (and records `now`)
    /// only if the last accepted attempt is older than the cooldown.
    pub fn authenticate(&self, now: DateTime<Utc>) -> bool {
        let store = &self.platform.store;
        let now_ms = now.timestamp_millis();
        let cooldown_ms = i64::try_from(self.config.authentication_cooldown.as_millis())
            .unwrap_or(i64::MAX);
        if let Some(last) = store.get_i64(KEY_LAST_AUTHENTICATION) {
            if now_ms.saturating_sub(last) < cooldown_ms {
                debug!("authentication attempt inside cooldown");
                return false;
            }
        }
        store.put_i64(KEY_LAST_AUTHENTICATION, now_ms);
        true
    }

    /// Apply a message from the service layer and republish it on the bus.
    pub fn handle_service_message(&self, kind: ServiceMessage, message: Option<String>) {
        let store = &self.platform.store;
        match kind {
            ServiceMessage::VerificationSuccess => {
                if let Some(pending) = store.get_string(KEY_PENDING_OWNER) {
                    info!("pending owner confirmed");
                    store.put_string(KEY_CONFIRMED_OWNER, Some(&pending));
                    store.put_string(KEY_PENDING_OWNER, None);
                }
            }
            ServiceMessage::Terminate => {
                info!("gathering terminated by service");
                store.put_string(KEY_CONFIRMED_OWNER, None);
                store.put_string(KEY_PENDING_OWNER, None);
            }
            ServiceMessage::RequestDetectors => self.request_detector_status(),
            ServiceMessage::Learning => {}
        }
        self.bus.publish(BusEvent::Service { kind, message });
        self.dispatch_signals();
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|a| a.ctx.session_id)
    }

    /// Assemble and start the detectors for a new session.
    ///
    /// Returns the number of detectors listening. Detectors without their
    /// capability settle in `Disabled` without failing the session.
    pub fn start_session(&mut self, mode: SessionMode) -> Result<usize, AgentError> {
        if self.active.is_some() {
            return Err(AgentError::AlreadyRunning);
        }
        let owner_id = self.owner_id().ok_or(AgentError::NotAuthorized)?;
        self.config
            .ensure_directories()
            .map_err(|e| AgentError::Io(e.to_string()))?;

        let ctx = SessionContext::new(
            self.config.clone(),
            self.platform.clone(),
            owner_id,
            mode,
            self.clock.clone(),
        )
        .with_bus(self.bus.clone())
        .with_stats(self.stats.clone());

        let (tx, rx) = bounded(SIGNAL_QUEUE_CAPACITY);
        let tap: SharedSubscriber = Arc::new(ChannelSubscriber::new(tx, |e| {
            !matches!(e, BusEvent::TrustChanged { .. })
        }));
        self.bus.subscribe(tap.clone());

        let registry = Arc::new(DetectorRegistry::assemble(&ctx));
        let pump = Arc::new(Pump {
            registry: registry.clone(),
            signals: rx,
            clock: self.clock.clone(),
            mode,
            started_at: self.clock.now_ms(),
        });

        let listening = registry.start_all();
        pump.dispatch_signals();
        self.bus.publish(BusEvent::meta(format!("session {} started", ctx.session_id)));
        pump.dispatch_signals();

        let driver = if self.drive_polls {
            match PollDriver::spawn(pump.clone()) {
                Ok(driver) => Some(driver),
                Err(e) => {
                    registry.stop_all();
                    self.bus.unsubscribe(&tap);
                    return Err(e);
                }
            }
        } else {
            None
        };

        info!(session = %ctx.session_id, ?mode, listening, "session started");
        self.active = Some(ActiveSession {
            ctx,
            registry,
            pump,
            tap,
            driver,
        });
        Ok(listening)
    }

    /// Hand an inbound platform event to its detector.
    pub fn deliver(&self, detector: DetectorType, event: SensorEvent) -> Result<(), AgentError> {
        let active = self.active.as_ref().ok_or(AgentError::NotRunning)?;
        let shared = active
            .registry
            .get(detector)
            .ok_or(AgentError::UnknownDetector(detector))?;
        lock(shared).on_event(event);
        active.pump.dispatch_signals();
        Ok(())
    }

    /// Deliver queued bus signals to the detectors. Returns how many were handled.
    pub fn dispatch_signals(&self) -> usize {
        self.active
            .as_ref()
            .map_or(0, |a| a.pump.dispatch_signals())
    }

    /// Run one scheduling pass on the calling thread. Returns when the next
    /// pass is due.
    pub fn pump(&self) -> Option<Millis> {
        self.active.as_ref().and_then(|a| a.pump.run_once())
    }

    /// Publish one status event per detector in the running session.
    pub fn request_detector_status(&self) {
        if let Some(active) = &self.active {
            for detector in active.registry.iter() {
                lock(detector).base().publish_status();
            }
        }
    }

    pub fn detector_states(&self) -> Vec<(DetectorType, DetectorState)> {
        self.active.as_ref().map_or_else(Vec::new, |a| {
            a.registry
                .iter()
                .map(|d| {
                    let detector = lock(d);
                    (detector.detector_type(), detector.state())
                })
                .collect()
        })
    }

    /// Publish a server trust report. Malformed reports are ignored.
    /// Returns the number of trust events published.
    pub fn publish_trust(&self, json: &str) -> usize {
        let report: TrustReport = match serde_json::from_str(json) {
            Ok(report) => report,
            Err(e) => {
                debug!("ignoring malformed trust report: {e}");
                return 0;
            }
        };
        let mut published = 0;
        for entry in report.detectors {
            match parse_detector(&entry.detector_type) {
                Some(detector) => {
                    self.bus.publish(BusEvent::TrustChanged {
                        detector,
                        score: report.trust_score,
                        aggregate: report.total_trust_score,
                    });
                    published += 1;
                }
                None => debug!(name = %entry.detector_type, "unknown detector in trust report"),
            }
        }
        published
    }

    /// Stop every detector, flush, and hand the session files off.
    ///
    /// Files are handed to the sink when the network is available and kept
    /// pending otherwise. Returns every file the session produced.
    pub fn stop_session(&mut self) -> Result<Vec<FinishedFile>, AgentError> {
        let mut active = self.active.take().ok_or(AgentError::NotRunning)?;
        if let Some(driver) = active.driver.as_mut() {
            driver.shutdown();
        }

        // Reverse order, so the metadata detector sees the others stop.
        for detector in active.registry.iter().rev() {
            lock(detector).stop_listening();
            active.pump.dispatch_signals();
        }
        self.bus.unsubscribe(&active.tap);

        let finished: Vec<FinishedFile> = active
            .registry
            .iter()
            .filter_map(|d| {
                let detector = lock(d);
                let file = detector.base().file();
                file.path().exists().then(|| FinishedFile {
                    detector: detector.detector_type(),
                    path: file.path().to_path_buf(),
                    owner_id: active.ctx.owner_id.clone(),
                    session_id: active.ctx.session_id,
                })
            })
            .collect();

        self.pending_handoff.extend(finished.iter().cloned());
        self.retry_handoff();

        if let Err(e) = self.stats.save() {
            warn!("could not save transparency stats: {e}");
        }
        info!(session = %active.ctx.session_id, files = finished.len(), "session stopped");
        Ok(finished)
    }

    /// Hand pending files to the sink if the network is available.
    /// Returns how many were handed off.
    pub fn retry_handoff(&mut self) -> usize {
        if self.pending_handoff.is_empty() {
            return 0;
        }
        if !self.platform.network.is_network_available() {
            debug!(pending = self.pending_handoff.len(), "network unavailable; handoff deferred");
            return 0;
        }
        let files = std::mem::take(&mut self.pending_handoff);
        let count = files.len();
        for file in files {
            self.platform.sink.session_finished(file);
        }
        count
    }

    pub fn pending_handoff(&self) -> &[FinishedFile] {
        &self.pending_handoff
    }
}

impl Drop for SensorAgent {
    fn drop(&mut self) {
        if let Some(mut active) = self.active.take() {
            if let Some(driver) = active.driver.as_mut() {
                driver.shutdown();
            }
            active.registry.stop_all();
            self.bus.unsubscribe(&active.tap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventLog;
    use crate::core::scheduler::ManualClock;
    use crate::platform::{
        CountingRadio, HandoffLog, PreferenceStore, StaticCapabilities, SwitchableNetwork,
    };
    use chrono::Duration as ChronoDuration;

    struct Fixture {
        agent: SensorAgent,
        clock: Arc<ManualClock>,
        network: Arc<SwitchableNetwork>,
        sink: Arc<HandoffLog>,
        events: Arc<EventLog>,
        dir: std::path::PathBuf,
    }

    impl Fixture {
        fn new(capabilities: StaticCapabilities) -> Self {
            let dir = std::env::temp_dir().join(format!("session-test-{}", Uuid::new_v4()));
            let config = Config {
                data_path: dir.clone(),
                ..Config::default()
            };
            let clock = Arc::new(ManualClock::new(0));
            let network = Arc::new(SwitchableNetwork::default());
            let sink = Arc::new(HandoffLog::new());
            let platform = Platform {
                capabilities: Arc::new(capabilities),
                network: network.clone(),
                radio: Arc::new(CountingRadio::default()),
                store: Arc::new(PreferenceStore::in_memory()),
                sink: sink.clone(),
            };
            let agent = SensorAgent::new(config, platform).with_manual_clock(clock.clone());
            let events = Arc::new(EventLog::new());
            agent.bus().subscribe(events.clone());
            Self {
                agent,
                clock,
                network,
                sink,
                events,
                dir,
            }
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    #[test]
    fn test_start_requires_authorization() {
        let mut f = Fixture::new(StaticCapabilities::all());
        assert!(matches!(
            f.agent.start_session(SessionMode::Gather),
            Err(AgentError::NotAuthorized)
        ));
        f.agent.authorize_gathering("alice");
        assert!(f.agent.start_session(SessionMode::Gather).is_ok());
        assert!(matches!(
            f.agent.start_session(SessionMode::Gather),
            Err(AgentError::AlreadyRunning)
        ));
    }

    #[test]
    fn test_verification_promotes_pending_owner() {
        let f = Fixture::new(StaticCapabilities::all());
        f.agent.authorize_gathering("alice");
        assert_eq!(f.agent.confirmed_owner_id(), None);

        f.agent
            .handle_service_message(ServiceMessage::VerificationSuccess, None);
        assert_eq!(f.agent.confirmed_owner_id().as_deref(), Some("alice"));
        assert_eq!(f.agent.owner_id().as_deref(), Some("alice"));

        f.agent
            .handle_service_message(ServiceMessage::Terminate, Some("revoked".into()));
        assert!(!f.agent.is_authorized());
        assert!(f.events.events().contains(&BusEvent::Service {
            kind: ServiceMessage::Terminate,
            message: Some("revoked".into()),
        }));
    }

    #[test]
    fn test_authorizing_confirmed_owner_keeps_pending_request() {
        let f = Fixture::new(StaticCapabilities::all());
        assert!(f.agent.authorize_gathering("alice"));
        f.agent
            .handle_service_message(ServiceMessage::VerificationSuccess, None);
        assert!(f.agent.authorize_gathering("bob"));

        assert!(!f.agent.authorize_gathering("alice"));
        assert_eq!(f.agent.owner_id().as_deref(), Some("bob"));
        assert_eq!(f.agent.confirmed_owner_id().as_deref(), Some("alice"));
    }

    #[test]
    fn test_authentication_cooldown() {
        let f = Fixture::new(StaticCapabilities::all());
        let t0 = Utc::now();
        assert!(f.agent.authenticate(t0));
        assert!(!f.agent.authenticate(t0 + ChronoDuration::seconds(60)));
        assert!(f.agent.authenticate(t0 + ChronoDuration::seconds(121)));
    }

    #[test]
    fn test_install_time_recorded_once() {
        let f = Fixture::new(StaticCapabilities::all());
        assert!(f.agent.install_time().is_some());
    }

    #[test]
    fn test_learning_flag_persists_and_notes() {
        let f = Fixture::new(StaticCapabilities::all());
        assert!(!f.agent.is_learning());
        f.agent.set_learning(true);
        assert!(f.agent.is_learning());
        assert!(f.events.events().contains(&BusEvent::meta("learning on")));
    }

    #[test]
    fn test_deliver_to_unknown_detector_is_an_error() {
        let mut f = Fixture::new(StaticCapabilities::all());
        assert!(matches!(
            f.agent.deliver(DetectorType::Accelerometer, SensorEvent::ScanComplete),
            Err(AgentError::NotRunning)
        ));
        f.agent.authorize_gathering("alice");
        f.agent.start_session(SessionMode::Authenticate).unwrap();
        assert!(matches!(
            f.agent.deliver(DetectorType::MetaData, SensorEvent::ScanComplete),
            Err(AgentError::UnknownDetector(DetectorType::MetaData))
        ));
    }

    #[test]
    fn test_authentication_session_stops_short_listeners() {
        let mut f = Fixture::new(StaticCapabilities::all());
        f.agent.authorize_gathering("alice");
        f.agent.start_session(SessionMode::Authenticate).unwrap();

        f.clock.set(2999);
        f.agent.pump();
        let state_of = |agent: &SensorAgent, kind| {
            agent
                .detector_states()
                .into_iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, s)| s)
        };
        assert_eq!(
            state_of(&f.agent, DetectorType::Magnetometer),
            Some(DetectorState::Listening)
        );

        f.clock.set(3000);
        f.agent.pump();
        assert_eq!(
            state_of(&f.agent, DetectorType::Magnetometer),
            Some(DetectorState::Idle)
        );
        assert_eq!(
            state_of(&f.agent, DetectorType::Accelerometer),
            Some(DetectorState::Listening)
        );
    }

    #[test]
    fn test_trust_report_publishes_per_detector() {
        let f = Fixture::new(StaticCapabilities::all());
        let json = r#"{"detectors":[{"detectorType":"Accelerometer"},{"detectorType":"ambientsound"}],
                       "trustScore":12.5,"totalTrustScore":80.0}"#;
        assert_eq!(f.agent.publish_trust(json), 2);
        assert!(f.events.events().contains(&BusEvent::TrustChanged {
            detector: DetectorType::AmbientSound,
            score: 12.5,
            aggregate: 80.0,
        }));
        assert_eq!(f.agent.publish_trust("{not json"), 0);
    }

    #[test]
    fn test_handoff_waits_for_network() {
        let mut f = Fixture::new(StaticCapabilities::all());
        f.agent.authorize_gathering("alice");
        f.network.set_available(false);
        f.agent.start_session(SessionMode::Gather).unwrap();

        let finished = f.agent.stop_session().unwrap();
        assert!(finished.iter().any(|file| file.detector == DetectorType::Hardware));
        assert!(f.sink.files().is_empty());
        assert_eq!(f.agent.pending_handoff().len(), finished.len());

        f.network.set_available(true);
        assert_eq!(f.agent.retry_handoff(), finished.len());
        assert_eq!(f.sink.files(), finished);
        assert!(matches!(f.agent.stop_session(), Err(AgentError::NotRunning)));
    }

    #[test]
    fn test_metadata_sees_session_lifecycle() {
        let mut f = Fixture::new(StaticCapabilities::all());
        f.agent.authorize_gathering("alice");
        f.agent.start_session(SessionMode::Gather).unwrap();
        f.agent.stop_session().unwrap();

        let metadata = f
            .sink
            .files()
            .into_iter()
            .find(|file| file.detector == DetectorType::MetaData)
            .expect("metadata file handed off");
        let content = std::fs::read_to_string(metadata.path).unwrap();
        assert!(content.contains("Accelerometer%20idle"));
    }
}
