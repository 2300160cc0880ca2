//! Collaborator contracts implemented outside the detector core.
//!
//! The core never talks to the operating system directly. Permission and
//! hardware lookups, radio control, preference storage and the finished-file
//! handoff all go through the traits below. Stock implementations are
//! provided for the CLI and for tests.

use crate::detector::types::{DetectorType, FifoCapacity, Hardware, Permission};
use chrono::Utc;
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;
use uuid::Uuid;

/// Permission and hardware lookup.
pub trait Capabilities: Send + Sync {
    fn has_permission(&self, permission: Permission) -> bool;

    fn has_hardware(&self, hardware: Hardware) -> bool;

    /// Batching FIFO of a motion sensor, when the hardware reports one.
    fn fifo_capacity(&self, _hardware: Hardware) -> Option<FifoCapacity> {
        None
    }

    /// Wall-clock epoch millis corresponding to hardware event time zero.
    fn boot_epoch_millis(&self) -> i64 {
        0
    }
}

/// Connectivity checks consulted before scans that need the network.
pub trait NetworkStatus: Send + Sync {
    fn is_network_available(&self) -> bool;

    fn is_wifi_enabled(&self) -> bool;
}

/// Control over scan hardware (radios, microphone, camera) for polled windows.
pub trait Radio: Send + Sync {
    /// Start an asynchronous scan. Returns false if the resource is unavailable.
    fn begin_scan(&self, detector: DetectorType) -> bool;

    /// Release the resource acquired by `begin_scan`.
    fn end_scan(&self, detector: DetectorType);
}

/// Persisted key-value configuration (session identity, flags).
///
/// Never used for buffered sensor data.
pub trait KeyValueStore: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;

    /// Store a value; `None` removes the key.
    fn put_string(&self, key: &str, value: Option<&str>);

    fn get_bool(&self, key: &str) -> Option<bool>;

    fn put_bool(&self, key: &str, value: bool);

    fn get_i64(&self, key: &str) -> Option<i64>;

    fn put_i64(&self, key: &str, value: i64);
}

/// A session file ready for upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedFile {
    pub detector: DetectorType,
    pub path: PathBuf,
    pub owner_id: String,
    pub session_id: Uuid,
}

/// Receives finished session files once a session ends.
pub trait SessionSink: Send + Sync {
    fn session_finished(&self, file: FinishedFile);
}

/// The full set of collaborators a session needs.
#[derive(Clone)]
pub struct Platform {
    pub capabilities: Arc<dyn Capabilities>,
    pub network: Arc<dyn NetworkStatus>,
    pub radio: Arc<dyn Radio>,
    pub store: Arc<dyn KeyValueStore>,
    pub sink: Arc<dyn SessionSink>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}

/// Fixed capability table.
#[derive(Debug, Clone)]
pub struct StaticCapabilities {
    permissions: HashSet<Permission>,
    hardware: HashSet<Hardware>,
    fifo: HashMap<Hardware, FifoCapacity>,
    boot_epoch_millis: i64,
}

impl StaticCapabilities {
    /// Every permission granted and every piece of hardware present.
    pub fn all() -> Self {
        Self {
            permissions: [
                Permission::Location,
                Permission::Camera,
                Permission::RecordAudio,
                Permission::Bluetooth,
            ]
            .into_iter()
            .collect(),
            hardware: [
                Hardware::Accelerometer,
                Hardware::Gyroscope,
                Hardware::Magnetometer,
                Hardware::Wifi,
                Hardware::Gps,
                Hardware::Bluetooth,
                Hardware::Microphone,
                Hardware::Camera,
            ]
            .into_iter()
            .collect(),
            fifo: HashMap::new(),
            boot_epoch_millis: Utc::now().timestamp_millis(),
        }
    }

    /// Nothing granted, nothing present.
    pub fn none() -> Self {
        Self {
            permissions: HashSet::new(),
            hardware: HashSet::new(),
            fifo: HashMap::new(),
            boot_epoch_millis: Utc::now().timestamp_millis(),
        }
    }

    pub fn deny_permission(mut self, permission: Permission) -> Self {
        self.permissions.remove(&permission);
        self
    }

    pub fn without_hardware(mut self, hardware: Hardware) -> Self {
        self.hardware.remove(&hardware);
        self
    }

    pub fn with_fifo(mut self, hardware: Hardware, capacity: FifoCapacity) -> Self {
        self.fifo.insert(hardware, capacity);
        self
    }

    pub fn with_boot_epoch_millis(mut self, millis: i64) -> Self {
        self.boot_epoch_millis = millis;
        self
    }
}

impl Capabilities for StaticCapabilities {
    fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    fn has_hardware(&self, hardware: Hardware) -> bool {
        self.hardware.contains(&hardware)
    }

    fn fifo_capacity(&self, hardware: Hardware) -> Option<FifoCapacity> {
        self.fifo.get(&hardware).copied()
    }

    fn boot_epoch_millis(&self) -> i64 {
        self.boot_epoch_millis
    }
}

/// Network status flags that can be flipped at runtime.
#[derive(Debug)]
pub struct SwitchableNetwork {
    available: AtomicBool,
    wifi: AtomicBool,
}

impl SwitchableNetwork {
    pub fn new(available: bool, wifi: bool) -> Self {
        Self {
            available: AtomicBool::new(available),
            wifi: AtomicBool::new(wifi),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_wifi(&self, enabled: bool) {
        self.wifi.store(enabled, Ordering::SeqCst);
    }
}

impl Default for SwitchableNetwork {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl NetworkStatus for SwitchableNetwork {
    fn is_network_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn is_wifi_enabled(&self) -> bool {
        self.wifi.load(Ordering::SeqCst)
    }
}

/// Radio that grants scans while enabled and counts what it was asked to do.
#[derive(Debug)]
pub struct CountingRadio {
    enabled: AtomicBool,
    started: AtomicU64,
    ended: AtomicU64,
}

impl CountingRadio {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            started: AtomicU64::new(0),
            ended: AtomicU64::new(0),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn scans_started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    pub fn scans_ended(&self) -> u64 {
        self.ended.load(Ordering::SeqCst)
    }
}

impl Default for CountingRadio {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Radio for CountingRadio {
    fn begin_scan(&self, _detector: DetectorType) -> bool {
        if !self.enabled.load(Ordering::SeqCst) {
            return false;
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn end_scan(&self, _detector: DetectorType) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }
}

/// Errors from the JSON preference file.
#[derive(Debug)]
pub enum StoreError {
    IoError(String),
    ParseError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::IoError(e) => write!(f, "IO error: {e}"),
            StoreError::ParseError(e) => write!(f, "Parse error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Key-value store kept in memory and optionally mirrored to a JSON file.
#[derive(Debug, Default)]
pub struct PreferenceStore {
    values: Mutex<BTreeMap<String, Value>>,
    path: Option<PathBuf>,
}

impl PreferenceStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (or create on first write) a JSON-backed store.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let values = if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| StoreError::IoError(e.to_string()))?;
            serde_json::from_str(&content).map_err(|e| StoreError::ParseError(e.to_string()))?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            values: Mutex::new(values),
            path: Some(path.to_path_buf()),
        })
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: Option<Value>) {
        let snapshot = {
            let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
            match value {
                Some(v) => values.insert(key.to_string(), v),
                None => values.remove(key),
            };
            values.clone()
        };
        if let Err(e) = self.save(&snapshot) {
            warn!(key, "failed to persist preferences: {e}");
        }
    }

    fn save(&self, values: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::IoError(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(values)
            .map_err(|e| StoreError::ParseError(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| StoreError::IoError(e.to_string()))
    }
}

impl KeyValueStore for PreferenceStore {
    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    fn put_string(&self, key: &str, value: Option<&str>) {
        self.set(key, value.map(|v| Value::String(v.to_string())));
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    fn put_bool(&self, key: &str, value: bool) {
        self.set(key, Some(Value::Bool(value)));
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    fn put_i64(&self, key: &str, value: i64) {
        self.set(key, Some(Value::from(value)));
    }
}

/// Hands finished files to a channel, e.g. an upload worker.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<FinishedFile>,
}

impl ChannelSink {
    pub fn new(sender: Sender<FinishedFile>) -> Self {
        Self { sender }
    }
}

impl SessionSink for ChannelSink {
    fn session_finished(&self, file: FinishedFile) {
        if self.sender.send(file).is_err() {
            warn!("finished-file receiver dropped");
        }
    }
}

/// Keeps every handed-off file in memory.
#[derive(Debug, Default)]
pub struct HandoffLog {
    files: Mutex<Vec<FinishedFile>>,
}

impl HandoffLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> Vec<FinishedFile> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SessionSink for HandoffLog {
    fn session_finished(&self, file: FinishedFile) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_capabilities_builder() {
        let caps = StaticCapabilities::all()
            .deny_permission(Permission::Camera)
            .without_hardware(Hardware::Gps);
        assert!(!caps.has_permission(Permission::Camera));
        assert!(caps.has_permission(Permission::Location));
        assert!(!caps.has_hardware(Hardware::Gps));
        assert!(caps.has_hardware(Hardware::Wifi));
        assert!(caps.fifo_capacity(Hardware::Accelerometer).is_none());
    }

    #[test]
    fn test_preference_store_round_trip_on_disk() {
        let path = std::env::temp_dir()
            .join(format!("prefs-{}", Uuid::new_v4()))
            .join("prefs.json");
        let store = PreferenceStore::open(&path).unwrap();
        store.put_string("owner", Some("abc"));
        store.put_bool("learning", true);
        store.put_i64("start_time", 42);

        let reopened = PreferenceStore::open(&path).unwrap();
        assert_eq!(reopened.get_string("owner").as_deref(), Some("abc"));
        assert_eq!(reopened.get_bool("learning"), Some(true));
        assert_eq!(reopened.get_i64("start_time"), Some(42));

        reopened.put_string("owner", None);
        assert_eq!(reopened.get_string("owner"), None);
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_counting_radio_refuses_when_disabled() {
        let radio = CountingRadio::new(false);
        assert!(!radio.begin_scan(DetectorType::Bluetooth));
        radio.set_enabled(true);
        assert!(radio.begin_scan(DetectorType::Bluetooth));
        radio.end_scan(DetectorType::Bluetooth);
        assert_eq!(radio.scans_started(), 1);
        assert_eq!(radio.scans_ended(), 1);
    }
}
