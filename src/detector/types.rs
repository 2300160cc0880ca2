//! Detector identities and the inbound event payloads delivered by the platform.
//!
//! Events are plain data: the platform layer (sensor manager, broadcast
//! receiver, location provider) translates whatever it receives into one of
//! these variants and hands it to the owning detector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a detector. One detector of each type exists per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorType {
    MetaData,
    Hardware,
    Accelerometer,
    Gyroscope,
    Magnetometer,
    Network,
    Location,
    Bluetooth,
    AmbientSound,
    Image,
}

impl DetectorType {
    /// Every detector type, in registry order.
    pub const ALL: [DetectorType; 10] = [
        DetectorType::MetaData,
        DetectorType::Hardware,
        DetectorType::Accelerometer,
        DetectorType::Gyroscope,
        DetectorType::Magnetometer,
        DetectorType::Network,
        DetectorType::Location,
        DetectorType::Bluetooth,
        DetectorType::AmbientSound,
        DetectorType::Image,
    ];

    /// Stable lowercase name, used for file names and log fields.
    pub fn name(self) -> &'static str {
        match self {
            DetectorType::MetaData => "metadata",
            DetectorType::Hardware => "hardware",
            DetectorType::Accelerometer => "accelerometer",
            DetectorType::Gyroscope => "gyroscope",
            DetectorType::Magnetometer => "magnetometer",
            DetectorType::Network => "network",
            DetectorType::Location => "location",
            DetectorType::Bluetooth => "bluetooth",
            DetectorType::AmbientSound => "ambient_sound",
            DetectorType::Image => "image",
        }
    }

    /// Human readable label, used in meta notes.
    pub fn label(self) -> &'static str {
        match self {
            DetectorType::MetaData => "MetaData",
            DetectorType::Hardware => "Hardware",
            DetectorType::Accelerometer => "Accelerometer",
            DetectorType::Gyroscope => "Gyroscope",
            DetectorType::Magnetometer => "Magnetometer",
            DetectorType::Network => "Network",
            DetectorType::Location => "Location",
            DetectorType::Bluetooth => "Bluetooth",
            DetectorType::AmbientSound => "AmbientSound",
            DetectorType::Image => "Image",
        }
    }

    /// Parse a detector name as produced by [`DetectorType::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Runtime permission the detector needs, if any.
    pub fn required_permission(self) -> Option<Permission> {
        match self {
            DetectorType::Location => Some(Permission::Location),
            DetectorType::Bluetooth => Some(Permission::Bluetooth),
            DetectorType::AmbientSound => Some(Permission::RecordAudio),
            DetectorType::Image => Some(Permission::Camera),
            _ => None,
        }
    }

    /// Hardware the detector reads from, if any.
    pub fn hardware(self) -> Option<Hardware> {
        match self {
            DetectorType::Accelerometer => Some(Hardware::Accelerometer),
            DetectorType::Gyroscope => Some(Hardware::Gyroscope),
            DetectorType::Magnetometer => Some(Hardware::Magnetometer),
            DetectorType::Network => Some(Hardware::Wifi),
            DetectorType::Location => Some(Hardware::Gps),
            DetectorType::Bluetooth => Some(Hardware::Bluetooth),
            DetectorType::AmbientSound => Some(Hardware::Microphone),
            DetectorType::Image => Some(Hardware::Camera),
            DetectorType::MetaData | DetectorType::Hardware => None,
        }
    }
}

impl fmt::Display for DetectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runtime permissions a detector may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Location,
    Camera,
    RecordAudio,
    Bluetooth,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Location => "location",
            Permission::Camera => "camera",
            Permission::RecordAudio => "record_audio",
            Permission::Bluetooth => "bluetooth",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hardware capabilities a detector may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hardware {
    Accelerometer,
    Gyroscope,
    Magnetometer,
    Wifi,
    Gps,
    Bluetooth,
    Microphone,
    Camera,
}

/// Batching FIFO reported by a motion sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FifoCapacity {
    pub max_events: u32,
    pub reserved_events: u32,
}

/// A single motion sensor reading.
///
/// `timestamp_nanos` is hardware event time (monotonic since boot), not
/// wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub timestamp_nanos: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// One access point in a wifi scan result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPoint {
    pub bssid: String,
    pub level: i32,
}

/// Completed wifi scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiScan {
    pub observed_at: DateTime<Utc>,
    pub access_points: Vec<AccessPoint>,
}

/// Position fix from a location provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub observed_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub accuracy: f64,
    pub provider: String,
}

/// A bluetooth device seen during discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BluetoothSighting {
    pub observed_at: DateTime<Utc>,
    pub address: String,
    pub rssi: i32,
}

/// Summary of a short ambient audio capture. Raw audio never leaves the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundSample {
    pub observed_at: DateTime<Utc>,
    pub mean_amplitude: f64,
    pub peak_amplitude: f64,
}

/// Feature vector extracted from a camera frame. Pixels never leave the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFrame {
    pub observed_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub features: Vec<f64>,
}

/// Unified inbound event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorEvent {
    Motion(MotionSample),
    WifiScan(WifiScan),
    WifiState { enabled: bool },
    Location(LocationFix),
    Bluetooth(BluetoothSighting),
    Sound(SoundSample),
    Image(ImageFrame),
    /// The platform finished an asynchronous scan for a polled detector.
    ScanComplete,
}

impl SensorEvent {
    /// Short name for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            SensorEvent::Motion(_) => "motion",
            SensorEvent::WifiScan(_) => "wifi_scan",
            SensorEvent::WifiState { .. } => "wifi_state",
            SensorEvent::Location(_) => "location",
            SensorEvent::Bluetooth(_) => "bluetooth",
            SensorEvent::Sound(_) => "sound",
            SensorEvent::Image(_) => "image",
            SensorEvent::ScanComplete => "scan_complete",
        }
    }
}

/// An event addressed to a specific detector, as read from a capture stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub detector: DetectorType,
    #[serde(flatten)]
    pub event: SensorEvent,
}
