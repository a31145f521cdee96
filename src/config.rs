//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `bridge.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - DeviceConfig: which sensor to connect to and which characteristic to watch.
//!     - ForwardConfig: where readings go, and how the forward queue behaves.
//!     - RetryConfig: delay between reconnect attempts.
//!     - LoggingConfig: log level and whether every reading is echoed.
//!
//! every section and every field has a default, so a partial file is fine.
//!
//! ==============================================================================

use crate::queue::Backpressure;
use crate::supervisor::RetryPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// environment variable that points at an explicit config file
pub const CONFIG_ENV: &str = "SENSOR_BRIDGE_CONFIG";

/// characteristic the sensor publishes its 32-byte frames on
pub const DEFAULT_CHARACTERISTIC: Uuid = Uuid::from_u128(0x00001a19_0000_1000_8000_00805f9b34fb);

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BridgeConfig {
    pub device: DeviceConfig,
    pub forward: ForwardConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    /// bluetooth address, e.g. "AA:BB:CC:DD:EE:FF"
    pub address: String,
    pub characteristic_uuid: Uuid,
    /// how long one discovery scan may take before the attempt counts as failed
    pub scan_timeout_seconds: u64,
    /// frame period of the simulated link
    pub simulated_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ForwardConfig {
    pub url: String,
    pub content_type: String,
    pub timeout_seconds: u64,
    pub queue_capacity: usize,
    pub backpressure: Backpressure,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub strategy: RetryStrategy,
    pub delay_seconds: u64,
    /// cap for the exponential strategy, ignored by the fixed one
    pub max_delay_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            characteristic_uuid: DEFAULT_CHARACTERISTIC,
            scan_timeout_seconds: 10,
            simulated_interval_ms: 2000,
        }
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/rest/items/batch_update/state".to_string(),
            content_type: "text/plain".to_string(),
            timeout_seconds: 10,
            queue_capacity: 32,
            backpressure: Backpressure::Block,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Fixed,
            delay_seconds: 5,
            max_delay_seconds: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_sensor_data: true,
        }
    }
}

impl DeviceConfig {
    #[cfg_attr(not(feature = "bluetooth"), allow(dead_code))]
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_seconds)
    }

    #[cfg_attr(feature = "bluetooth", allow(dead_code))]
    pub fn simulated_interval(&self) -> Duration {
        Duration::from_millis(self.simulated_interval_ms)
    }
}

impl ForwardConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        let delay = Duration::from_secs(self.delay_seconds);
        match self.strategy {
            RetryStrategy::Fixed => RetryPolicy::Fixed(delay),
            RetryStrategy::Exponential => RetryPolicy::Exponential {
                initial: delay,
                max: Duration::from_secs(self.max_delay_seconds).max(delay),
            },
        }
    }
}

impl BridgeConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        Self::parse(&content)
    }

    /// Parse configuration from toml text
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let mut paths = Vec::new();
        if let Some(explicit) = std::env::var_os(CONFIG_ENV) {
            paths.push(PathBuf::from(explicit));
        }
        paths.push(PathBuf::from("config").join("bridge.toml"));
        paths.push(PathBuf::from("..").join("config").join("bridge.toml"));

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let address = if self.device.address.is_empty() {
            "(unset)"
        } else {
            self.device.address.as_str()
        };
        println!("┌─────────────────────────────────────────┐");
        println!("│          BRIDGE CONFIGURATION           │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Device: {}", address);
        println!("│ Characteristic: {}", self.device.characteristic_uuid);
        println!("│ Forward URL: {}", self.forward.url);
        println!("│ Queue: {} ({:?})", self.forward.queue_capacity, self.forward.backpressure);
        println!("│ Retry: {:?}", self.retry.policy());
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_setup() {
        let config = BridgeConfig::default();
        assert_eq!(
            config.device.characteristic_uuid.to_string(),
            "00001a19-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(config.forward.content_type, "text/plain");
        assert_eq!(config.retry.policy(), RetryPolicy::Fixed(Duration::from_secs(5)));
        assert_eq!(config.forward.backpressure, Backpressure::Block);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = BridgeConfig::parse("").unwrap();
        assert_eq!(config.forward.url, ForwardConfig::default().url);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parses_full_file() {
        let config = BridgeConfig::parse(
            r#"
            [device]
            address = "AA:BB:CC:DD:EE:FF"
            characteristic_uuid = "00001a19-0000-1000-8000-00805f9b34fb"
            scan_timeout_seconds = 20

            [forward]
            url = "http://openhab.local:8080/rest/items/batch_update/state"
            timeout_seconds = 3
            queue_capacity = 8
            backpressure = "drop_oldest"

            [retry]
            strategy = "exponential"
            delay_seconds = 2
            max_delay_seconds = 30

            [logging]
            level = "debug"
            show_sensor_data = false
            "#,
        )
        .unwrap();

        assert_eq!(config.device.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(config.device.scan_timeout(), Duration::from_secs(20));
        assert_eq!(config.forward.queue_capacity, 8);
        assert_eq!(config.forward.backpressure, Backpressure::DropOldest);
        assert_eq!(config.forward.content_type, "text/plain");
        assert_eq!(
            config.retry.policy(),
            RetryPolicy::Exponential {
                initial: Duration::from_secs(2),
                max: Duration::from_secs(30),
            }
        );
        assert!(!config.logging.show_sensor_data);
    }

    #[test]
    fn rejects_unknown_strategy() {
        assert!(BridgeConfig::parse("[retry]\nstrategy = \"random\"\n").is_err());
    }
}
