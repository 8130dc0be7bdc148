//! Structured request/response model
//!
//! Values travel inline in the envelope once the client has read them out of
//! (or will write them into) a registered region.

use super::Status;
use serde::{Deserialize, Serialize};

/// Version carried in the connection handshake
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// First frame on every connection
    Hello { version: u32, session_id: String },
    Get { key: String },
    Set {
        key: String,
        value: Vec<u8>,
        /// Seconds until expiry; `None` clears any TTL
        ttl: Option<u64>,
    },
    Delete { key: String },
    Test { key: String },
    Expire { key: String, seconds: u64 },
    Keys { pattern: String },
    NrKeys { pattern: String },
}

impl Request {
    /// Command name used for logging and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "hello",
            Request::Get { .. } => "get",
            Request::Set { .. } => "set",
            Request::Delete { .. } => "delete",
            Request::Test { .. } => "test",
            Request::Expire { .. } => "expire",
            Request::Keys { .. } => "keys",
            Request::NrKeys { .. } => "nrkeys",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseBody {
    Empty,
    Value(Vec<u8>),
    Keys(Vec<String>),
    Count(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub body: ResponseBody,
}

impl Response {
    pub fn status(status: Status) -> Self {
        Self {
            status,
            body: ResponseBody::Empty,
        }
    }

    pub fn ok() -> Self {
        Self::status(Status::Ok)
    }

    pub fn value(value: Vec<u8>) -> Self {
        Self {
            status: Status::Ok,
            body: ResponseBody::Value(value),
        }
    }

    pub fn keys(keys: Vec<String>) -> Self {
        Self {
            status: Status::Ok,
            body: ResponseBody::Keys(keys),
        }
    }

    pub fn count(count: u64) -> Self {
        Self {
            status: Status::Ok,
            body: ResponseBody::Count(count),
        }
    }
}

/// Request envelope; the id is echoed by the matching response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    pub response: Response,
}
