//! Transport seam
//!
//! A [`Transport`] moves one request to the store and brings back its
//! response. The session never sees sockets. A verbs engine for native
//! fabric devices plugs in here; the crate ships a framed stream transport
//! (TCP or local socket) and an in-process loopback.

use super::profile::TransportProfile;
use super::session::ConnectOptions;
use crate::common::{Error, Result};
use crate::protocol::{
    read_frame, write_frame, Request, RequestFrame, Response, ResponseFrame, Status,
    PROTOCOL_VERSION,
};
use crate::server::{dispatch, KeyStore};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Runtime;

pub trait Transport: Send {
    /// Send one request and block until its response arrives
    fn round_trip(&mut self, request: Request) -> Result<Response>;

    /// Tear down the channel. Later round trips fail with [`Error::Closed`].
    fn close(&mut self) -> Result<()>;

    fn describe(&self) -> String;
}

trait Duplex: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Duplex for T {}

/// Framed request/response over one or more stream connections.
///
/// Each worker owns one connection; requests are spread across them in
/// turn. A private current-thread runtime drives the I/O so callers stay on
/// plain blocking calls.
pub struct StreamTransport {
    runtime: Runtime,
    channels: Vec<Box<dyn Duplex>>,
    next_channel: usize,
    next_id: u64,
    op_timeout: Duration,
    max_frame_size: usize,
    peer: String,
    profile: TransportProfile,
}

impl StreamTransport {
    pub fn connect(options: &ConnectOptions, session_id: &str) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let profile = options.selection.profile;
        let peer = match profile {
            TransportProfile::Shm => options
                .selection
                .shm_socket_path(options.remote_port)
                .display()
                .to_string(),
            _ => format!("{}:{}", options.remote_addr, options.remote_port),
        };
        if profile == TransportProfile::Rdma {
            tracing::debug!("rdma profile: carrying frames over tcp to {}", peer);
        }

        let workers = options.workers.max(1);
        let mut channels = Vec::with_capacity(workers);
        for worker in 0..workers {
            let channel = runtime.block_on(async {
                let connect = open_channel(options, worker);
                let mut channel = tokio::time::timeout(options.config.connect_timeout(), connect)
                    .await
                    .map_err(|_| Error::Timeout(format!("connect to {}", peer)))??;
                handshake(&mut channel, session_id, options.config.max_frame_size).await?;
                Ok::<_, Error>(channel)
            })?;
            channels.push(channel);
        }

        tracing::debug!(
            "Connected to {} via {} with {} worker(s)",
            peer,
            options.selection,
            workers
        );

        Ok(Self {
            runtime,
            channels,
            next_channel: 0,
            next_id: 1,
            op_timeout: options.config.op_timeout(),
            max_frame_size: options.config.max_frame_size,
            peer,
            profile,
        })
    }
}

async fn open_channel(options: &ConnectOptions, worker: usize) -> Result<Box<dyn Duplex>> {
    let selection = &options.selection;
    if selection.profile == TransportProfile::Shm {
        let path = selection.shm_socket_path(options.remote_port);
        let stream = tokio::net::UnixStream::connect(&path).await.map_err(|e| {
            Error::ConnectionFailed(format!("{}: {}", path.display(), e))
        })?;
        return Ok(Box::new(stream));
    }

    let remote = tokio::net::lookup_host((options.remote_addr.as_str(), options.remote_port))
        .await
        .map_err(|e| Error::ConnectionFailed(format!("{}: {}", options.remote_addr, e)))?
        .next()
        .ok_or_else(|| {
            Error::ConnectionFailed(format!("{} did not resolve", options.remote_addr))
        })?;

    // only the first worker takes the requested local port
    let local_port = if worker == 0 { options.local_port } else { 0 };
    let stream = if options.local_addr.is_some() || local_port != 0 {
        let local_ip: IpAddr = match options.local_addr.as_deref() {
            Some(addr) => addr
                .parse()
                .map_err(|_| Error::InvalidConfig(format!("invalid local address '{}'", addr)))?,
            None if remote.is_ipv4() => IpAddr::from([0u8; 4]),
            None => IpAddr::from([0u16; 8]),
        };
        let socket = if remote.is_ipv4() {
            tokio::net::TcpSocket::new_v4()?
        } else {
            tokio::net::TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(SocketAddr::new(local_ip, local_port))?;
        socket.connect(remote).await
    } else {
        tokio::net::TcpStream::connect(remote).await
    }
    .map_err(|e| Error::ConnectionFailed(format!("{}: {}", remote, e)))?;

    stream.set_nodelay(selection.tcp_nodelay())?;
    Ok(Box::new(stream))
}

async fn handshake(channel: &mut Box<dyn Duplex>, session_id: &str, max_frame_size: usize) -> Result<()> {
    let hello = RequestFrame {
        id: 0,
        request: Request::Hello {
            version: PROTOCOL_VERSION,
            session_id: session_id.to_string(),
        },
    };
    write_frame(channel, &hello, max_frame_size).await?;

    let reply: ResponseFrame = read_frame(channel, max_frame_size)
        .await?
        .ok_or_else(|| Error::ConnectionFailed("closed during handshake".into()))?;
    match reply.response.status {
        Status::Ok => Ok(()),
        status => Err(Error::HandshakeRejected(status)),
    }
}

impl Transport for StreamTransport {
    fn round_trip(&mut self, request: Request) -> Result<Response> {
        if self.channels.is_empty() {
            return Err(Error::Closed);
        }

        let index = self.next_channel % self.channels.len();
        self.next_channel = self.next_channel.wrapping_add(1);
        let id = self.next_id;
        self.next_id += 1;

        let name = request.name();
        let frame = RequestFrame { id, request };
        let max_frame_size = self.max_frame_size;
        let op_timeout = self.op_timeout;
        let channel = &mut self.channels[index];

        let exchange = async move {
            write_frame(channel, &frame, max_frame_size).await?;
            read_frame::<_, ResponseFrame>(channel, max_frame_size)
                .await?
                .ok_or_else(|| Error::ConnectionFailed("connection closed by server".into()))
        };
        let result = self.runtime.block_on(async move {
            tokio::time::timeout(op_timeout, exchange)
                .await
                .map_err(|_| Error::Timeout(format!("{} after {:?}", name, op_timeout)))?
        });

        let outcome = match result {
            Ok(reply) if reply.id == id => return Ok(reply.response),
            Ok(reply) => Error::Protocol(format!(
                "response id {} does not match request {}",
                reply.id, id
            )),
            Err(e) => e,
        };

        // framing on this channel is no longer trustworthy
        let _guard = self.runtime.enter();
        self.channels.remove(index);
        tracing::warn!(
            "Dropped channel {} to {} after {}: {} ({} left)",
            index,
            self.peer,
            name,
            outcome,
            self.channels.len()
        );
        Err(outcome)
    }

    fn close(&mut self) -> Result<()> {
        let channels = std::mem::take(&mut self.channels);
        self.runtime.block_on(async {
            for mut channel in channels {
                let _ = channel.shutdown().await;
            }
        });
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} {}", self.profile, self.peer)
    }
}

/// In-process transport straight into a [`KeyStore`]
pub struct LoopbackTransport {
    store: Arc<KeyStore>,
    closed: bool,
}

impl LoopbackTransport {
    pub fn new(store: Arc<KeyStore>) -> Self {
        Self {
            store,
            closed: false,
        }
    }
}

impl Transport for LoopbackTransport {
    fn round_trip(&mut self, request: Request) -> Result<Response> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(dispatch(&self.store, request))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        "loopback".to_string()
    }
}
