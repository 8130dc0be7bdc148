//! Response status taxonomy
//!
//! Two codes are load-bearing for every consumer: [`Status::Ok`] and
//! [`Status::NoSuchKey`]. Everything else is a failure that callers surface
//! verbatim without further interpretation.

use serde::{Deserialize, Serialize};
use std::fmt;

const STATUS_BASE: u16 = 0x100;

/// Outcome code of a single key-value operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum Status {
    Ok,
    InvalidCommand,
    KeyEmpty,
    KeyTooBig,
    ValueEmpty,
    ValueTooBig,
    NoSuchCommand,
    /// The key is absent or its TTL has elapsed. A normal outcome, not an error.
    NoSuchKey,
    InvalidSgl,
    InvalidRegion,
    NoMem,
    ServerError,
    PermissionDenied,
    TransportError,
    Timeout,
    /// A code outside the known table, preserved as received.
    Other(u16),
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 0,
            Status::InvalidCommand => STATUS_BASE,
            Status::KeyEmpty => STATUS_BASE + 1,
            Status::KeyTooBig => STATUS_BASE + 2,
            Status::ValueEmpty => STATUS_BASE + 3,
            Status::ValueTooBig => STATUS_BASE + 4,
            Status::NoSuchCommand => STATUS_BASE + 5,
            Status::NoSuchKey => STATUS_BASE + 6,
            Status::InvalidSgl => STATUS_BASE + 7,
            Status::InvalidRegion => STATUS_BASE + 8,
            Status::NoMem => STATUS_BASE + 9,
            Status::ServerError => STATUS_BASE + 10,
            Status::PermissionDenied => STATUS_BASE + 11,
            Status::TransportError => STATUS_BASE + 12,
            Status::Timeout => STATUS_BASE + 13,
            Status::Other(code) => *code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Status::Ok,
            c if c == STATUS_BASE => Status::InvalidCommand,
            c if c == STATUS_BASE + 1 => Status::KeyEmpty,
            c if c == STATUS_BASE + 2 => Status::KeyTooBig,
            c if c == STATUS_BASE + 3 => Status::ValueEmpty,
            c if c == STATUS_BASE + 4 => Status::ValueTooBig,
            c if c == STATUS_BASE + 5 => Status::NoSuchCommand,
            c if c == STATUS_BASE + 6 => Status::NoSuchKey,
            c if c == STATUS_BASE + 7 => Status::InvalidSgl,
            c if c == STATUS_BASE + 8 => Status::InvalidRegion,
            c if c == STATUS_BASE + 9 => Status::NoMem,
            c if c == STATUS_BASE + 10 => Status::ServerError,
            c if c == STATUS_BASE + 11 => Status::PermissionDenied,
            c if c == STATUS_BASE + 12 => Status::TransportError,
            c if c == STATUS_BASE + 13 => Status::Timeout,
            other => Status::Other(other),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Status::NoSuchKey)
    }

    /// Neither OK nor NO_SUCH_KEY.
    pub fn is_failure(&self) -> bool {
        !self.is_ok() && !self.is_not_found()
    }

    pub fn description(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::InvalidCommand => "Invalid command",
            Status::KeyEmpty => "Key is empty",
            Status::KeyTooBig => "Key is too big",
            Status::ValueEmpty => "Value is empty",
            Status::ValueTooBig => "Value is too big",
            Status::NoSuchCommand => "No such command",
            Status::NoSuchKey => "No such key",
            Status::InvalidSgl => "Invalid SGL",
            Status::InvalidRegion => "Invalid registered memory",
            Status::NoMem => "No memory",
            Status::ServerError => "Server internal error",
            Status::PermissionDenied => "Permission denied",
            Status::TransportError => "Transport error",
            Status::Timeout => "Timeout",
            Status::Other(_) => "Unknown status",
        }
    }
}

impl From<u16> for Status {
    fn from(code: u16) -> Self {
        Status::from_code(code)
    }
}

impl From<Status> for u16 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status({}): {}", self.code(), self.description())
    }
}
