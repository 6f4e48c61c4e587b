//! Structured logging setup. Initialised once at startup from the
//! log section of [`crate::config::Config`], before any other
//! component runs.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;
use crate::error::{Error, Result};

/// Severity levels, named after the original daemon's syslog-flavoured
/// scale. Several of these collapse onto the same [`tracing::Level`]
/// since `tracing` does not distinguish them as finely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Fatal,
    Alert,
    Crit,
    Error,
    Warn,
    Notice,
    Info,
    Dbg,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Fatal | LogLevel::Alert | LogLevel::Crit | LogLevel::Error => Level::ERROR,
            LogLevel::Warn | LogLevel::Notice => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Dbg => Level::DEBUG,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Fatal => "fatal",
            LogLevel::Alert => "alert",
            LogLevel::Crit => "crit",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Notice => "notice",
            LogLevel::Info => "info",
            LogLevel::Dbg => "dbg",
        };
        write!(f, "{s}")
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fatal" => Ok(LogLevel::Fatal),
            "alert" => Ok(LogLevel::Alert),
            "crit" => Ok(LogLevel::Crit),
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "notice" => Ok(LogLevel::Notice),
            "info" => Ok(LogLevel::Info),
            "dbg" => Ok(LogLevel::Dbg),
            other => Err(format!(
                "unknown log level '{other}', expected one of fatal:alert:crit:error:warn:notice:info:dbg"
            )),
        }
    }
}

/// `--log-output` bit flags. Only stderr and the rotating file sink
/// are actioned by this port; bits 2-6 are accepted (so a config
/// written for the original binary still parses) but currently no-ops.
const OUTPUT_STDERR: u8 = 0b0000_0001;
const OUTPUT_FILE: u8 = 0b0000_0010;

/// Held for the lifetime of the process; dropping it stops the
/// non-blocking file writer from flushing further lines.
#[must_use]
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialise the global tracing subscriber. Must be called exactly
/// once, before any other component logs.
pub fn init(config: &LogConfig) -> Result<LoggingGuard> {
    let level = config.level.to_tracing_level();
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let to_stderr = config.output & OUTPUT_STDERR != 0;
    let to_file = config.output & OUTPUT_FILE != 0;

    let registry = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.function_info)
        .with_ansi(config.colors)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    if to_file {
        let dir = config
            .path
            .as_deref()
            .and_then(|p| p.parent())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let appender = tracing_appender::rolling::never(dir, &config.prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if to_stderr {
            registry
                .with_writer(non_blocking.and(std::io::stderr))
                .try_init()
                .map_err(|e| Error::FatalStartup(format!("logging init failed: {e}")))?;
        } else {
            registry
                .with_writer(non_blocking)
                .try_init()
                .map_err(|e| Error::FatalStartup(format!("logging init failed: {e}")))?;
        }
        Ok(LoggingGuard {
            _file_guard: Some(guard),
        })
    } else {
        registry
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| Error::FatalStartup(format!("logging init failed: {e}")))?;
        Ok(LoggingGuard { _file_guard: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_round_trips_through_display_and_from_str() {
        for level in [
            LogLevel::Fatal,
            LogLevel::Alert,
            LogLevel::Crit,
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Notice,
            LogLevel::Info,
            LogLevel::Dbg,
        ] {
            let parsed: LogLevel = level.to_string().parse().unwrap();
            assert_eq!(parsed, level);
        }
    }

    #[test]
    fn unknown_level_is_rejected() {
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn output_bitmask_selects_sinks() {
        assert_ne!(OUTPUT_STDERR & OUTPUT_FILE, OUTPUT_STDERR);
        assert_eq!(0b0000_0011u8 & OUTPUT_STDERR, OUTPUT_STDERR);
        assert_eq!(0b0000_0011u8 & OUTPUT_FILE, OUTPUT_FILE);
    }
}
