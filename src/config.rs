//! Configuration for the sensor trust agent.

use crate::core::scheduler::PollTiming;
use crate::detector::types::DetectorType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for session files, preferences and transparency stats
    pub data_path: PathBuf,

    /// Records buffered per detector before a flush to disk
    pub flush_threshold: usize,

    /// Per-detector flush thresholds overriding `flush_threshold`
    #[serde(default)]
    pub flush_overrides: BTreeMap<DetectorType, usize>,

    /// Minimum spacing between accepted motion sensor events
    #[serde(with = "millis_serde", rename = "motion_interval_ms")]
    pub motion_interval: Duration,

    /// Cadence for interval-polled detectors
    pub polling: PollingConfig,

    /// Minimum spacing between accepted authentication requests
    #[serde(with = "duration_serde", rename = "authentication_cooldown_secs")]
    pub authentication_cooldown: Duration,

    /// Which detectors to assemble
    pub sources: SourceConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sensor-trust-agent");

        Self {
            data_path: data_dir,
            flush_threshold: 20,
            flush_overrides: BTreeMap::new(),
            motion_interval: Duration::from_millis(20),
            polling: PollingConfig::default(),
            authentication_cooldown: Duration::from_secs(120),
            sources: SourceConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sensor-trust-agent")
            .join("config.json")
    }

    /// Directory holding per-detector session files.
    pub fn sessions_path(&self) -> PathBuf {
        self.data_path.join("sessions")
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_path.join("preferences.json")
    }

    pub fn transparency_path(&self) -> PathBuf {
        self.data_path.join("transparency.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(self.sessions_path())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    pub fn flush_threshold_for(&self, detector: DetectorType) -> usize {
        self.flush_overrides
            .get(&detector)
            .copied()
            .unwrap_or(self.flush_threshold)
    }

    /// Poll cadence for a polled detector. `None` for push-driven detectors.
    pub fn poll_timing_for(&self, detector: DetectorType) -> Option<PollTiming> {
        match detector {
            DetectorType::Location => Some(self.polling.location),
            DetectorType::Bluetooth => Some(self.polling.bluetooth),
            DetectorType::AmbientSound => Some(self.polling.ambient_sound),
            DetectorType::Image => Some(self.polling.image),
            _ => None,
        }
    }
}

/// Cadence for each interval-polled detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PollingConfig {
    pub location: PollTiming,
    pub bluetooth: PollTiming,
    pub ambient_sound: PollTiming,
    pub image: PollTiming,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            location: PollTiming::new(300_000, 30_000),
            bluetooth: PollTiming::new(60_000, 12_000),
            ambient_sound: PollTiming::new(60_000, 3_000),
            image: PollTiming::new(60_000, 2_000),
        }
    }
}

/// Configuration for which detectors to assemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub accelerometer: bool,
    pub gyroscope: bool,
    pub magnetometer: bool,
    pub network: bool,
    pub location: bool,
    pub bluetooth: bool,
    pub ambient_sound: bool,
    pub image: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            accelerometer: true,
            gyroscope: true,
            magnetometer: true,
            network: true,
            location: true,
            bluetooth: true,
            ambient_sound: true,
            image: true,
        }
    }
}

impl SourceConfig {
    /// Parse source configuration from a comma-separated string.
    pub fn from_csv(s: &str) -> Self {
        let sources: Vec<String> = s.split(',').map(|s| s.trim().to_lowercase()).collect();
        let has = |name: &str| sources.iter().any(|s| s == name || s == "all");

        Self {
            accelerometer: has("accelerometer"),
            gyroscope: has("gyroscope"),
            magnetometer: has("magnetometer"),
            network: has("network"),
            location: has("location"),
            bluetooth: has("bluetooth"),
            ambient_sound: has("ambient_sound"),
            image: has("image"),
        }
    }

    /// Whether a detector is selected. Metadata and hardware are always on.
    pub fn includes(&self, detector: DetectorType) -> bool {
        match detector {
            DetectorType::MetaData | DetectorType::Hardware => true,
            DetectorType::Accelerometer => self.accelerometer,
            DetectorType::Gyroscope => self.gyroscope,
            DetectorType::Magnetometer => self.magnetometer,
            DetectorType::Network => self.network,
            DetectorType::Location => self.location,
            DetectorType::Bluetooth => self.bluetooth,
            DetectorType::AmbientSound => self.ambient_sound,
            DetectorType::Image => self.image,
        }
    }

    /// Check if at least one sensing detector is enabled.
    pub fn any_enabled(&self) -> bool {
        DetectorType::ALL
            .into_iter()
            .filter(|t| !matches!(t, DetectorType::MetaData | DetectorType::Hardware))
            .any(|t| self.includes(t))
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as whole seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde support for Duration as whole milliseconds.
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_config_parsing() {
        let config = SourceConfig::from_csv("accelerometer, Network");
        assert!(config.accelerometer);
        assert!(config.network);
        assert!(!config.location);
        assert!(config.includes(DetectorType::MetaData));

        let config = SourceConfig::from_csv("all");
        assert!(config.image);
        assert!(config.ambient_sound);

        assert!(!SourceConfig::from_csv("barometer").any_enabled());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.flush_threshold, 20);
        assert_eq!(config.motion_interval, Duration::from_millis(20));
        assert_eq!(config.authentication_cooldown, Duration::from_secs(120));
        assert!(config.sources.any_enabled());
    }

    #[test]
    fn test_flush_override_and_poll_timing_lookup() {
        let mut config = Config::default();
        config.flush_overrides.insert(DetectorType::Network, 3);
        assert_eq!(config.flush_threshold_for(DetectorType::Network), 3);
        assert_eq!(config.flush_threshold_for(DetectorType::Gyroscope), 20);
        assert!(config.poll_timing_for(DetectorType::Accelerometer).is_none());
        assert_eq!(
            config.poll_timing_for(DetectorType::Bluetooth),
            Some(PollTiming::new(60_000, 12_000))
        );
    }

    #[test]
    fn test_config_json_round_trip() {
        let mut config = Config::default();
        config.flush_overrides.insert(DetectorType::Image, 1);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"motion_interval_ms\":20"));
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.flush_threshold_for(DetectorType::Image), 1);
        assert_eq!(back.polling.location, config.polling.location);
    }
}
