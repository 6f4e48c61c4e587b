//! Command-line interface.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::logging::LogLevel;

#[derive(Parser, Debug)]
#[command(name = "m2md", version, about = "Modbus/TCP to MQTT bridge daemon")]
pub struct Cli {
    /// Override config file path.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Log level: fatal, alert, crit, error, warn, notice, info, dbg.
    #[arg(short = 'l', long)]
    pub log_level: Option<LogLevel>,

    /// Bitmask of log sinks, 0-127.
    #[arg(short = 'o', long, value_parser = clap::value_parser!(u8).range(0..=127))]
    pub log_output: Option<u8>,

    /// MQTT broker address.
    #[arg(short = 'i', long)]
    pub mqtt_ip: Option<Ipv4Addr>,

    /// MQTT broker port.
    #[arg(short = 'p', long)]
    pub mqtt_port: Option<u16>,

    /// Base MQTT topic prefix.
    #[arg(short = 't', long)]
    pub mqtt_topic: Option<String>,

    /// MQTT client id.
    #[arg(long)]
    pub mqtt_id: Option<String>,

    #[arg(long)]
    pub log_frotate_number: Option<u32>,
    #[arg(long)]
    pub log_frotate_size: Option<u64>,
    #[arg(long)]
    pub log_fsync_every: Option<u64>,
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=7))]
    pub log_fsync_level: Option<u8>,
    #[arg(long)]
    pub log_ts: Option<bool>,
    #[arg(long)]
    pub log_finfo: Option<bool>,
    #[arg(long)]
    pub log_colors: Option<bool>,
    #[arg(long)]
    pub log_prefix: Option<String>,
    #[arg(long)]
    pub log_path: Option<PathBuf>,

    /// Reconnect back-off cap, seconds.
    #[arg(long)]
    pub modbus_max_re_time: Option<u32>,

    /// Poll-list file path.
    #[arg(long)]
    pub modbus_poll_list: Option<PathBuf>,

    /// Legacy register-to-topic map file path.
    #[arg(long)]
    pub modbus_map_list: Option<PathBuf>,
}

impl Cli {
    /// Layer any flags the operator actually passed on top of `config`.
    /// `None` fields leave the underlying config value untouched.
    pub fn apply_overrides(&self, config: &mut Config) -> Result<()> {
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        if let Some(output) = self.log_output {
            config.log.output = output;
        }
        if let Some(n) = self.log_frotate_number {
            config.log.frotate_number = n;
        }
        if let Some(n) = self.log_frotate_size {
            config.log.frotate_size = n;
        }
        if let Some(n) = self.log_fsync_every {
            config.log.fsync_every = n;
        }
        if let Some(n) = self.log_fsync_level {
            config.log.fsync_level = n;
        }
        if let Some(ts) = self.log_ts {
            config.log.timestamps = ts;
        }
        if let Some(finfo) = self.log_finfo {
            config.log.function_info = finfo;
        }
        if let Some(colors) = self.log_colors {
            config.log.colors = colors;
        }
        if let Some(prefix) = &self.log_prefix {
            config.log.prefix = prefix.clone();
        }
        if let Some(path) = &self.log_path {
            config.log.path = Some(path.clone());
        }
        if let Some(ip) = self.mqtt_ip {
            if ip == Ipv4Addr::UNSPECIFIED {
                return Err(Error::InvalidInput(
                    "mqtt-ip must not be the unspecified address".to_string(),
                ));
            }
            config.mqtt.ip = ip;
        }
        if let Some(port) = self.mqtt_port {
            if port == 0 {
                return Err(Error::InvalidInput("mqtt-port must not be 0".to_string()));
            }
            config.mqtt.port = port;
        }
        if let Some(topic) = &self.mqtt_topic {
            if topic.len() > 1024 {
                return Err(Error::InvalidInput("mqtt-topic too long".to_string()));
            }
            config.mqtt.topic = topic.clone();
        }
        if let Some(id) = &self.mqtt_id {
            if id.len() > 128 {
                return Err(Error::InvalidInput("mqtt-id too long".to_string()));
            }
            config.mqtt.client_id = id.clone();
        }
        if let Some(n) = self.modbus_max_re_time {
            if n == 0 {
                return Err(Error::InvalidInput(
                    "modbus-max-re-time must be at least 1".to_string(),
                ));
            }
            config.modbus.max_re_time = n;
        }
        if let Some(path) = &self.modbus_poll_list {
            config.modbus.poll_list = Some(path.clone());
        }
        if let Some(path) = &self.modbus_map_list {
            config.modbus.map_list = Some(path.clone());
        }
        Ok(())
    }
}
