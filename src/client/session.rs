//! KV client session
//!
//! One logical connection to a store. Every operation blocks until the
//! server answers or the transport times out. Values always move through
//! registered memory: `set` reads the bytes an [`Sgl`] describes, `get`
//! writes into them.
//!
//! Outcomes:
//! - `Ok(Status::Ok)`: success
//! - `Ok(Status::NoSuchKey)`: absent or expired, a normal result
//! - `Ok(other)`: server-side failure, surfaced verbatim
//! - `Err(_)`: local resource or transport failure

use super::profile::TransportSelection;
use super::transport::{StreamTransport, Transport};
use crate::common::{ClientConfig, Error, Result};
use crate::memory::{MemoryRegion, MemoryRegistry, RegisterableBuffer, Sgl};
use crate::protocol::{Request, Response, ResponseBody, Status};

/// Parameters for [`Session::connect`]
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub remote_addr: String,
    pub remote_port: u16,
    /// Local address to bind; system-chosen when `None`
    pub local_addr: Option<String>,
    /// Local port to bind; 0 means any
    pub local_port: u16,
    /// Number of connections requests are spread over
    pub workers: usize,
    pub config: ClientConfig,
    pub selection: TransportSelection,
}

impl ConnectOptions {
    pub fn new(remote_addr: impl Into<String>, remote_port: u16) -> Self {
        Self {
            remote_addr: remote_addr.into(),
            remote_port,
            local_addr: None,
            local_port: 0,
            workers: 1,
            config: ClientConfig::default(),
            selection: TransportSelection::default(),
        }
    }

    pub fn local(mut self, addr: Option<String>, port: u16) -> Self {
        self.local_addr = addr;
        self.local_port = port;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn selection(mut self, selection: TransportSelection) -> Self {
        self.selection = selection;
        self
    }
}

pub struct Session {
    transport: Box<dyn Transport>,
    registry: MemoryRegistry,
    session_id: String,
    closed: bool,
}

impl Session {
    /// Connect to a store. A failure here is final for these parameters.
    pub fn connect(options: &ConnectOptions) -> Result<Self> {
        let registry = MemoryRegistry::new(&options.config);
        Self::connect_with_registry(options, registry)
    }

    /// Connect sharing an existing registry with other sessions
    pub fn connect_with_registry(options: &ConnectOptions, registry: MemoryRegistry) -> Result<Self> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let transport = StreamTransport::connect(options, &session_id)?;
        tracing::debug!("Session {} connected over {}", session_id, transport.describe());
        Ok(Self::from_parts(Box::new(transport), registry, session_id))
    }

    /// Wrap an already established transport
    pub fn with_transport(transport: Box<dyn Transport>, registry: MemoryRegistry) -> Self {
        Self::from_parts(transport, registry, uuid::Uuid::new_v4().to_string())
    }

    fn from_parts(transport: Box<dyn Transport>, registry: MemoryRegistry, session_id: String) -> Self {
        Self {
            transport,
            registry,
            session_id,
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn registry(&self) -> &MemoryRegistry {
        &self.registry
    }

    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    /// Register a buffer for use in SGLs
    pub fn reg_memory<B: RegisterableBuffer>(&self, buf: B) -> Result<MemoryRegion<B>> {
        self.registry.register(buf)
    }

    /// Release a registration. Deregistering twice is an error.
    pub fn dereg_memory<B: RegisterableBuffer>(&self, region: &mut MemoryRegion<B>) -> Result<()> {
        self.registry.deregister(region)
    }

    fn call(&mut self, request: Request) -> Result<Response> {
        if self.closed {
            return Err(Error::Closed);
        }
        let name = request.name();
        let response = self.transport.round_trip(request)?;
        tracing::debug!("{} -> {}", name, response.status);
        Ok(response)
    }

    /// Store the bytes `sgl` describes under `key`. `ttl` in seconds;
    /// `None` means the key never expires from this call.
    pub fn set(&mut self, key: &str, sgl: &Sgl, ttl: Option<u64>) -> Result<Status> {
        let source = self.registry.resolve(sgl)?;
        let request = Request::Set {
            key: key.to_string(),
            value: source.to_vec(),
            ttl,
        };
        let response = self.call(request)?;
        drop(source);
        Ok(response.status)
    }

    /// Fetch `key` into the bytes `sgl` describes.
    ///
    /// `expected_len` must equal the SGL length. The destination is written
    /// only when the result is OK.
    pub fn get(&mut self, key: &str, sgl: &Sgl, expected_len: usize) -> Result<Status> {
        self.get_value_len(key, sgl, expected_len)
            .map(|(status, _)| status)
    }

    /// Like [`get`](Self::get), also returning the stored value's length.
    ///
    /// A value longer than the SGL yields VALUE_TOO_BIG and nothing is
    /// copied; a shorter one fills the start of the destination.
    pub fn get_value_len(&mut self, key: &str, sgl: &Sgl, expected_len: usize) -> Result<(Status, usize)> {
        if expected_len != sgl.len() {
            return Err(Error::InvalidSgl(format!(
                "expected length {} does not match SGL length {}",
                expected_len,
                sgl.len()
            )));
        }
        let destination = self.registry.resolve(sgl)?;

        let response = self.call(Request::Get {
            key: key.to_string(),
        })?;
        match (response.status, response.body) {
            (Status::Ok, ResponseBody::Value(value)) => {
                if value.len() > destination.len() {
                    return Ok((Status::ValueTooBig, value.len()));
                }
                destination.fill(&value)?;
                Ok((Status::Ok, value.len()))
            }
            (Status::Ok, body) => Err(Error::Protocol(format!(
                "get answered with unexpected body {:?}",
                body
            ))),
            (status, _) => Ok((status, 0)),
        }
    }

    pub fn delete(&mut self, key: &str) -> Result<Status> {
        let response = self.call(Request::Delete {
            key: key.to_string(),
        })?;
        Ok(response.status)
    }

    /// Whether `key` exists and has not expired
    pub fn test(&mut self, key: &str) -> Result<bool> {
        let response = self.call(Request::Test {
            key: key.to_string(),
        })?;
        match response.status {
            Status::Ok => Ok(true),
            Status::NoSuchKey => Ok(false),
            status => Err(Error::Status(status)),
        }
    }

    /// Set or replace the TTL of an existing key. Zero expires it now.
    pub fn expire(&mut self, key: &str, seconds: u64) -> Result<Status> {
        let response = self.call(Request::Expire {
            key: key.to_string(),
            seconds,
        })?;
        Ok(response.status)
    }

    /// Keys matching a glob pattern
    pub fn keys(&mut self, pattern: &str) -> Result<Vec<String>> {
        let response = self.call(Request::Keys {
            pattern: pattern.to_string(),
        })?;
        match (response.status, response.body) {
            (Status::Ok, ResponseBody::Keys(keys)) => Ok(keys),
            (Status::Ok, body) => Err(Error::Protocol(format!(
                "keys answered with unexpected body {:?}",
                body
            ))),
            (status, _) => Err(Error::Status(status)),
        }
    }

    /// Number of keys matching a glob pattern
    pub fn nrkeys(&mut self, pattern: &str) -> Result<u64> {
        let response = self.call(Request::NrKeys {
            pattern: pattern.to_string(),
        })?;
        match (response.status, response.body) {
            (Status::Ok, ResponseBody::Count(count)) => Ok(count),
            (Status::Ok, body) => Err(Error::Protocol(format!(
                "nrkeys answered with unexpected body {:?}",
                body
            ))),
            (status, _) => Err(Error::Status(status)),
        }
    }

    /// Terminate the channel
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        tracing::debug!("Session {} closed", self.session_id);
        self.transport.close()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.transport.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::LoopbackTransport;
    use crate::common::StoreLimits;
    use crate::server::KeyStore;
    use std::sync::Arc;

    fn session() -> Session {
        let store = Arc::new(KeyStore::new(StoreLimits::default()));
        Session::with_transport(
            Box::new(LoopbackTransport::new(store)),
            MemoryRegistry::default(),
        )
    }

    #[test]
    fn test_expected_len_must_match() {
        let mut session = session();
        let region = session.reg_memory(vec![0u8; 8]).unwrap();
        let sgl = region.sgl().unwrap();
        assert!(matches!(
            session.get("k", &sgl, 4),
            Err(Error::InvalidSgl(_))
        ));
    }

    #[test]
    fn test_short_value_fills_prefix() {
        let mut session = session();
        let source = session.reg_memory(b"456".to_vec()).unwrap();
        session.set("123", &source.sgl().unwrap(), None).unwrap();

        let dest = session.reg_memory(vec![b'.'; 8]).unwrap();
        let sgl = dest.sgl().unwrap();
        assert_eq!(
            session.get_value_len("123", &sgl, 8).unwrap(),
            (Status::Ok, 3)
        );
        assert_eq!(dest.to_vec(), b"456.....");
    }

    #[test]
    fn test_long_value_copies_nothing() {
        let mut session = session();
        let source = session.reg_memory(b"0123456789".to_vec()).unwrap();
        session.set("k", &source.sgl().unwrap(), None).unwrap();

        let dest = session.reg_memory(vec![0u8; 4]).unwrap();
        let sgl = dest.sgl().unwrap();
        assert_eq!(session.get("k", &sgl, 4).unwrap(), Status::ValueTooBig);
        assert_eq!(dest.to_vec(), vec![0u8; 4]);
    }

    #[test]
    fn test_closed_session_refuses_operations() {
        let store = Arc::new(KeyStore::new(StoreLimits::default()));
        let mut transport = LoopbackTransport::new(store);
        transport.close().unwrap();
        let mut session = Session::with_transport(Box::new(transport), MemoryRegistry::default());
        assert!(matches!(session.delete("k"), Err(Error::Closed)));
    }
}
