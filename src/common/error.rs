//! Error types for fabrickv
//!
//! NO_SUCH_KEY is not an error: it travels as `Ok(Status::NoSuchKey)`.
//! Everything here is either a resource failure, a protocol plumbing failure,
//! or a server/harness level failure.

use crate::protocol::Status;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Memory Registration Errors ===
    #[error("Memory registration failed: {0}")]
    Registration(String),

    #[error("Invalid or stale registration handle: {0}")]
    InvalidRegion(String),

    #[error("Region {0} is referenced by an in-flight operation")]
    RegionBusy(String),

    #[error("Invalid SGL: {0}")]
    InvalidSgl(String),

    // === Connection Errors ===
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Handshake rejected by server: {0}")]
    HandshakeRejected(Status),

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Session is closed")]
    Closed,

    // === Protocol Errors ===
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Operation failed with {0}")]
    Status(Status),

    // === Server Errors ===
    #[error("ACL error: {0}")]
    Acl(String),

    #[error("Memfile error: {0}")]
    MemFile(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // === Harness Errors ===
    #[error("Harness error: {0}")]
    Harness(String),

    #[error("Interrupted by signal")]
    Interrupted,

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Status a command-line client reports for a failure that never
    /// produced a server response.
    pub fn status(&self) -> Status {
        match self {
            Error::Registration(_) | Error::InvalidRegion(_) | Error::RegionBusy(_) => {
                Status::InvalidRegion
            }
            Error::InvalidSgl(_) => Status::InvalidSgl,
            Error::HandshakeRejected(status) | Error::Status(status) => *status,
            Error::Timeout(_) => Status::Timeout,
            Error::Io(_)
            | Error::ConnectionFailed(_)
            | Error::TransportUnavailable(_)
            | Error::Closed
            | Error::Protocol(_)
            | Error::FrameTooLarge { .. }
            | Error::ChecksumMismatch { .. } => Status::TransportError,
            _ => Status::ServerError,
        }
    }

    /// Convert to HTTP status code for the admin API
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Acl(_) | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Protocol(format!("codec: {}", e))
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_failures_map_to_statuses() {
        assert_eq!(
            Error::InvalidSgl("out of bounds".into()).status(),
            Status::InvalidSgl
        );
        assert_eq!(
            Error::InvalidRegion("0x1".into()).status(),
            Status::InvalidRegion
        );
        assert_eq!(Error::Timeout("get".into()).status(), Status::Timeout);
        assert_eq!(
            Error::ConnectionFailed("refused".into()).status(),
            Status::TransportError
        );
        assert_eq!(
            Error::HandshakeRejected(Status::PermissionDenied).status(),
            Status::PermissionDenied
        );
    }

    #[test]
    fn test_http_mapping() {
        use axum::http::StatusCode;
        assert_eq!(
            Error::Acl("bad rule".into()).to_http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::NotFound("rule".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
    }
}
