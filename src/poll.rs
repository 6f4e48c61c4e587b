//! Poll records and the per-device poll list.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Modbus function codes this bridge actions. Anything else is rejected
/// by the poll-list loader before it ever reaches a [`Poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    ReadHoldingRegisters,
    ReadInputRegisters,
}

impl FunctionCode {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            3 => Some(FunctionCode::ReadHoldingRegisters),
            4 => Some(FunctionCode::ReadInputRegisters),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            FunctionCode::ReadHoldingRegisters => 3,
            FunctionCode::ReadInputRegisters => 4,
        }
    }
}

/// 16-bit or 32-bit (big-endian register pair) register width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Single,
    Double,
}

/// The (function_code, register_address, unit_id) triple that makes a
/// poll unique within one device's poll list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollIdentity {
    pub function: FunctionCode,
    pub register: u16,
    pub unit_id: u8,
}

/// Sample period, expressed as the sum of a whole-second and a
/// sub-second millisecond component, matching the poll-list file's two
/// separate fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub secs: u32,
    pub millis: u16,
}

impl Period {
    pub fn new(secs: u32, millis: u16) -> Result<Self> {
        if millis > 999 {
            return Err(Error::InvalidInput(format!(
                "poll period milliseconds {millis} out of range [0,999]"
            )));
        }
        Ok(Period { secs, millis })
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.secs as u64) + Duration::from_millis(self.millis as u64)
    }

    /// Strictly shorter than `other`, used by the poll list's merge rule.
    pub fn is_shorter_than(self, other: Period) -> bool {
        self.as_duration() < other.as_duration()
    }
}

/// One configured register sample: where to read it, how to interpret
/// and scale the raw value, and where to publish it.
#[derive(Debug, Clone)]
pub struct Poll {
    pub identity: PollIdentity,
    pub signed: bool,
    pub width: Width,
    pub scale: f32,
    pub period: Period,
    pub next_read: Instant,
    pub topic: String,
}

impl Poll {
    pub fn new(
        identity: PollIdentity,
        signed: bool,
        width: Width,
        scale: f32,
        period: Period,
        topic: String,
    ) -> Result<Self> {
        if topic.is_empty() || topic.len() > 1024 {
            return Err(Error::InvalidInput(format!(
                "topic length {} outside (0,1024]",
                topic.len()
            )));
        }
        Ok(Poll {
            identity,
            signed,
            width,
            scale,
            period,
            next_read: Instant::now(),
            topic,
        })
    }

    /// A flat copy of the fields the worker needs to service a read;
    /// `period`/`next_read` are scheduling-only and are not included.
    pub fn snapshot(&self) -> PollSnapshot {
        PollSnapshot {
            identity: self.identity,
            signed: self.signed,
            width: self.width,
            scale: self.scale,
            topic: self.topic.clone(),
        }
    }
}

/// What a [`crate::queue::Command::Poll`] carries into the worker.
#[derive(Debug, Clone)]
pub struct PollSnapshot {
    pub identity: PollIdentity,
    pub signed: bool,
    pub width: Width,
    pub scale: f32,
    pub topic: String,
}

/// Per-device collection of [`Poll`] records. Identity triples are
/// unique; adding a duplicate identity merges periods instead of
/// inserting a second entry.
#[derive(Debug, Default)]
pub struct PollList {
    polls: Vec<Poll>,
}

impl PollList {
    pub fn new() -> Self {
        PollList { polls: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.polls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polls.is_empty()
    }

    /// Insert `poll`, or merge it into an existing record with the same
    /// identity, keeping the shorter period and forcing an immediate
    /// re-sample when the period shrinks.
    pub fn add(&mut self, poll: Poll) -> Result<()> {
        if let Some(existing) = self
            .polls
            .iter_mut()
            .find(|p| p.identity == poll.identity)
        {
            if poll.period.is_shorter_than(existing.period) {
                existing.period = poll.period;
                existing.next_read = Instant::now();
            }
            return Ok(());
        }
        self.polls
            .try_reserve(1)
            .map_err(|_| Error::OutOfMemory)?;
        self.polls.push(poll);
        Ok(())
    }

    pub fn delete(&mut self, identity: PollIdentity) -> Result<()> {
        let pos = self
            .polls
            .iter()
            .position(|p| p.identity == identity)
            .ok_or(Error::NotFound)?;
        self.polls.remove(pos);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Poll> {
        self.polls.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Poll> {
        self.polls.iter_mut()
    }
}
