//! Configuration for the Heart Link agent.

use crate::core::{BodyProfile, ZoneConfig};
use crate::link::{LinkSettings, ReconnectPolicy, DEFAULT_NEGOTIATION_TIMEOUT, DEFAULT_SCAN_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Length of a discovery window
    #[serde(with = "duration_ms")]
    pub scan_timeout: Duration,

    /// Connect to the first device advertising the heart rate service
    pub auto_connect: bool,

    /// Limit for each negotiation phase (connect, discovery, subscribe)
    #[serde(with = "duration_ms")]
    pub negotiation_timeout: Duration,

    /// Reconnection after a lost stream
    pub reconnect: ReconnectConfig,

    /// Heart rate zone bounds
    pub zones: ZoneConfig,

    /// Profile used for calorie estimates
    pub profile: BodyProfile,

    /// Path for session summaries and link statistics
    pub data_path: PathBuf,

    /// Address of the last device that streamed successfully
    pub last_device: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("heartlink");

        Self {
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            auto_connect: true,
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            reconnect: ReconnectConfig::default(),
            zones: ZoneConfig::default(),
            profile: BodyProfile::default(),
            data_path: data_dir,
            last_device: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("heartlink")
            .join("config.json")
    }

    /// Directory that session summaries are written to.
    pub fn sessions_path(&self) -> PathBuf {
        self.data_path.join("sessions")
    }

    /// File the link statistics are persisted to.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("link_stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(self.sessions_path())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Settings for the link actor.
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            scan_timeout: self.scan_timeout,
            negotiation_timeout: self.negotiation_timeout,
            auto_connect: self.auto_connect,
            reconnect: self.reconnect.policy(),
        }
    }
}

/// Serialized form of the reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// `null` retries forever
    pub max_attempts: Option<u32>,
    #[serde(with = "duration_ms")]
    pub initial_delay: Duration,
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(ReconnectPolicy::default())
    }
}

impl From<ReconnectPolicy> for ReconnectConfig {
    fn from(policy: ReconnectPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            initial_delay: policy.initial_delay,
            max_delay: policy.max_delay,
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
        }
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

/// Serde support for Duration as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
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
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scan_timeout, Duration::from_millis(15_000));
        assert_eq!(config.negotiation_timeout, Duration::from_secs(30));
        assert!(config.auto_connect);
        assert_eq!(config.reconnect.max_attempts, Some(5));
        assert!(config.last_device.is_none());
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let config = Config::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["scan_timeout"], 15_000);
        assert_eq!(json["reconnect"]["initial_delay"], 1_000);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "scan_timeout": 5000, "auto_connect": false }"#).unwrap();
        assert_eq!(config.scan_timeout, Duration::from_millis(5000));
        assert!(!config.auto_connect);
        assert_eq!(config.zones, ZoneConfig::default());
    }

    #[test]
    fn test_link_settings() {
        let mut config = Config::default();
        config.reconnect = ReconnectPolicy::unbounded().into();
        let settings = config.link_settings();
        assert_eq!(settings.reconnect.max_attempts, None);
        assert_eq!(settings.scan_timeout, config.scan_timeout);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("heartlink-config-{}", uuid::Uuid::new_v4()))
            .join("config.json");

        let mut config = Config::default();
        config.last_device = Some("AA:BB:CC:DD:EE:FF".to_string());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
