//! # Configuration Management Module
//!
//! Settings for the serial gateway link, the MQTT broker, logging and
//! periodic statistics. Every value has a default except the broker host,
//! which must come from the config file or the `--mqtt` flag.
//!
//! ## Configuration File Format
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//!
//! [mqtt]
//! host = "mqtt.local"
//! port = 1883
//! keep_alive_secs = 60
//!
//! [logging]
//! level = "info"
//! file = "nrf24mqtt.log"
//! ```
//!
//! Precedence: CLI args > config file > defaults. A missing config file is
//! not an error for `start`; the defaults are used and the CLI fills in the
//! rest.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Sleep between polls when no complete line is waiting (ms).
    pub poll_interval_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            poll_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or address. Required.
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Client id is `<prefix>_<pid>`.
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// Home Assistant birth topic; an `online` payload is logged as a restart.
    #[serde(default = "default_status_topic")]
    pub status_topic: String,
    /// Startup gives up if the broker has not acknowledged the connection by then.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_client_id_prefix() -> String {
    "serialmonitor".to_string()
}

fn default_status_topic() -> String {
    "homeassistant/status".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_mqtt_port(),
            keep_alive_secs: default_keep_alive_secs(),
            client_id_prefix: default_client_id_prefix(),
            status_topic: default_status_topic(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl MqttConfig {
    pub fn client_id(&self) -> String {
        format!("{}_{}", self.client_id_prefix, std::process::id())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Seconds between statistics log lines (0 disables).
    #[serde(default)]
    pub interval_secs: u64,
}

/// Command line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    pub mqtt_host: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Load the file if it exists, otherwise start from defaults.
    /// A file that exists but does not parse is still an error.
    pub async fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let content = toml::to_string_pretty(&Config::default())
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(port) = overrides.port {
            self.serial.port = port;
        }
        if let Some(baud) = overrides.baud_rate {
            self.serial.baud_rate = baud;
        }
        if let Some(host) = overrides.mqtt_host {
            self.mqtt.host = host;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.mqtt.host.trim().is_empty() {
            bail!("MQTT broker host is required (use --mqtt or set [mqtt].host)");
        }
        if self.serial.port.trim().is_empty() {
            bail!("Serial port path is empty");
        }
        if self.serial.baud_rate == 0 {
            bail!("Serial baud rate must be greater than zero");
        }
        if self.serial.poll_interval_ms == 0 {
            bail!("serial.poll_interval_ms must be greater than zero");
        }
        if self.mqtt.keep_alive_secs == 0 {
            bail!("mqtt.keep_alive_secs must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_gateway_firmware() {
        let config = Config::default();
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.poll_interval_ms, 100);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.keep_alive_secs, 60);
        assert_eq!(config.mqtt.status_topic, "homeassistant/status");
        assert!(config.mqtt.host.is_empty());
    }

    #[test]
    fn missing_host_fails_validation() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("--mqtt"));
    }

    #[test]
    fn overrides_win_over_file_values() {
        let mut config: Config = toml::from_str(
            r#"
            [serial]
            port = "/dev/ttyACM0"
            baud_rate = 57600

            [mqtt]
            host = "file-broker"
            "#,
        )
        .unwrap();
        assert_eq!(config.serial.poll_interval_ms, 100);
        assert_eq!(config.mqtt.port, 1883);

        config.apply(Overrides {
            port: None,
            baud_rate: Some(115200),
            mqtt_host: Some("cli-broker".into()),
        });
        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.mqtt.host, "cli-broker");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn client_id_carries_pid() {
        let id = MqttConfig::default().client_id();
        assert_eq!(id, format!("serialmonitor_{}", std::process::id()));
    }

    #[test]
    fn zero_baud_rate_rejected() {
        let mut config = Config::default();
        config.mqtt.host = "broker".into();
        config.serial.baud_rate = 0;
        assert!(config.validate().is_err());
    }
}
