//! Typed error kinds shared across the bridge.

use std::fmt;

/// Named error kinds the core distinguishes, instead of ad-hoc strings.
#[derive(Debug)]
pub enum Error {
    /// A poll-list line, CLI argument, or host string failed validation.
    InvalidInput(String),
    /// The device registry has no free slot.
    NoSpace,
    /// An allocation failed (list insertion, queue creation).
    OutOfMemory,
    /// A delete targeted a poll or device that does not exist.
    NotFound,
    /// A non-blocking send hit a full queue.
    WouldBlock,
    /// The queue was stopped; the reader should terminate.
    Cancelled,
    /// A Modbus read or MQTT publish failed at the transport layer.
    TransportError(String),
    /// Startup cannot proceed (logger, MQTT context, config).
    FatalStartup(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::NoSpace => write!(f, "no space left in registry"),
            Error::OutOfMemory => write!(f, "allocation failed"),
            Error::NotFound => write!(f, "not found"),
            Error::WouldBlock => write!(f, "would block"),
            Error::Cancelled => write!(f, "cancelled"),
            Error::TransportError(msg) => write!(f, "transport error: {msg}"),
            Error::FatalStartup(msg) => write!(f, "fatal startup error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
