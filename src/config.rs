// Configuration - explicit settings handed to each component's constructor

use crate::connection::ReconnectConfig;
use crate::pattern::DEFAULT_BPM;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
}

/// Top-level configuration for every lampi process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LampConfig {
    pub bus: BusConfig,
    pub storage: StorageConfig,
    pub playback: PlaybackConfig,
}

impl LampConfig {
    /// Load a RON config file; missing sections fall back to defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        ron::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Broker connection and topic settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// `host:port` of the TCP broker
    pub broker_addr: String,
    /// Topic carrying full-state snapshots (retained)
    pub state_topic: String,
    /// Topic carrying ephemeral LED colors
    pub light_topic: String,
    /// Frames buffered while the broker is slow or unreachable
    pub outbound_capacity: usize,
    /// How long the session waits for inbound frames between queue drains
    pub poll_interval_ms: u64,
    pub reconnect: ReconnectConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            broker_addr: "127.0.0.1:1883".to_string(),
            state_topic: "ui_update".to_string(),
            light_topic: "led_update".to_string(),
            outbound_capacity: 256,
            poll_interval_ms: 5,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Durable record location and daemon startup behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
    /// Publish the durable snapshot at startup when the bus has no retained state
    pub seed_bus_on_start: bool,
    /// How long the daemon waits for retained state before seeding
    pub seed_settle_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            path: base.join("lampi").join("lampi_state.json"),
            seed_bus_on_start: true,
            seed_settle_ms: 500,
        }
    }
}

/// Defaults for a fresh local pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub default_bpm: u16,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_bpm: DEFAULT_BPM,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_ron_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lampi.ron");
        std::fs::write(
            &path,
            r#"(bus: (broker_addr: "10.0.0.2:1883", reconnect: (max_elapsed_ms: 2000)))"#,
        )
        .unwrap();

        let config = LampConfig::load(&path).unwrap();

        assert_eq!(config.bus.broker_addr, "10.0.0.2:1883");
        assert_eq!(config.bus.state_topic, "ui_update");
        assert_eq!(config.bus.reconnect.max_elapsed_ms, 2000);
        assert_eq!(config.bus.reconnect.base_delay_ms, 1000);
        assert_eq!(config.playback.default_bpm, 100);
    }

    #[test]
    fn test_invalid_ron_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ron");
        std::fs::write(&path, "(bus: (broker_addr: 12").unwrap();

        let err = LampConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.ron"));
    }

    #[test]
    fn test_missing_file() {
        let err = LampConfig::load("/nonexistent/lampi.ron").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
