//! Layered configuration: built-in defaults, then an optional config
//! file, then command-line overrides.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::cli::Cli;
use crate::error::{Error, Result};
use crate::logging::LogLevel;

fn default_log_level() -> LogLevel {
    LogLevel::Info
}
fn default_log_output() -> u8 {
    0b0000_0001
}
fn default_log_frotate_number() -> u32 {
    5
}
fn default_log_frotate_size() -> u64 {
    5 * 1024 * 1024
}
fn default_log_fsync_every() -> u64 {
    0
}
fn default_log_fsync_level() -> u8 {
    0
}
fn default_log_prefix() -> String {
    "m2md".to_string()
}
fn default_mqtt_ip() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_mqtt_topic() -> String {
    "m2md".to_string()
}
fn default_mqtt_id() -> String {
    "m2md".to_string()
}
fn default_modbus_max_re_time() -> u32 {
    60
}

/// Log-section options, mirroring the original daemon's `log_*` fields.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_log_output")]
    pub output: u8,
    #[serde(default = "default_log_frotate_number")]
    pub frotate_number: u32,
    #[serde(default = "default_log_frotate_size")]
    pub frotate_size: u64,
    #[serde(default = "default_log_fsync_every")]
    pub fsync_every: u64,
    #[serde(default = "default_log_fsync_level")]
    pub fsync_level: u8,
    #[serde(default = "default_log_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub timestamps: bool,
    #[serde(default)]
    pub function_info: bool,
    #[serde(default)]
    pub colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
            output: default_log_output(),
            frotate_number: default_log_frotate_number(),
            frotate_size: default_log_frotate_size(),
            fsync_every: default_log_fsync_every(),
            fsync_level: default_log_fsync_level(),
            prefix: default_log_prefix(),
            path: None,
            timestamps: true,
            function_info: false,
            colors: false,
        }
    }
}

/// MQTT broker coordinates and topic prefix.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_ip")]
    pub ip: Ipv4Addr,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
    #[serde(default = "default_mqtt_id")]
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        MqttConfig {
            ip: default_mqtt_ip(),
            port: default_mqtt_port(),
            topic: default_mqtt_topic(),
            client_id: default_mqtt_id(),
        }
    }
}

/// Modbus section: only the reconnect cap is needed by the core.
#[derive(Debug, Clone, Deserialize)]
pub struct ModbusConfig {
    #[serde(default = "default_modbus_max_re_time")]
    pub max_re_time: u32,
    #[serde(default)]
    pub poll_list: Option<PathBuf>,
    #[serde(default)]
    pub map_list: Option<PathBuf>,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        ModbusConfig {
            max_re_time: default_modbus_max_re_time(),
            poll_list: None,
            map_list: None,
        }
    }
}

/// The fully merged configuration the rest of the daemon consumes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub modbus: ModbusConfig,
}

impl Config {
    /// Built-in defaults, with an optional config file layered on top,
    /// with CLI flags layered on top of that. A user-specified config
    /// path that does not exist is fatal; the absence of the default
    /// path is not.
    pub fn load(cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(path) = &cli.config {
            config = Self::load_file(path)?;
        } else {
            let default_path = Path::new("/etc/m2md/m2md.toml");
            if default_path.exists() {
                config = Self::load_file(default_path)?;
            }
        }

        cli.apply_overrides(&mut config)?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::FatalStartup(format!("cannot read config file {}: {e}", path.display()))
        })?;
        toml::from_str(&text)
            .map_err(|e| Error::FatalStartup(format!("cannot parse config file: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = Config::default();
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.modbus.max_re_time, 60);
        assert_eq!(config.log.output, 0b0000_0001);
    }

    #[test]
    fn parses_minimal_toml() {
        let text = r#"
            [mqtt]
            ip = "10.0.0.5"
            port = 1884
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.mqtt.ip, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(config.mqtt.port, 1884);
        // Untouched sections still take their defaults.
        assert_eq!(config.modbus.max_re_time, 60);
    }
}
