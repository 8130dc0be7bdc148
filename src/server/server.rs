//! Protocol listener
//!
//! Accepts stream connections (TCP, or a local socket under the `shm`
//! profile), checks the peer against the ACL during the `Hello` handshake,
//! then answers framed requests until the peer hangs up.

use super::acl::Acl;
use super::admin::AdminState;
use super::handler::dispatch;
use super::memfile;
use super::store::{spawn_expiry_sweeper, KeyStore};
use crate::client::{TransportProfile, TransportSelection};
use crate::common::{MetricsRegistry, Result, ServerConfig};
use crate::protocol::{
    read_frame, write_frame, Request, RequestFrame, Response, ResponseBody, ResponseFrame,
    Status, PROTOCOL_VERSION,
};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};

/// Where the listener is reachable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl std::fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => write!(f, "{}", addr),
            ListenAddr::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener, PathBuf),
}

struct ConnContext {
    store: Arc<KeyStore>,
    acl: Arc<Acl>,
    metrics: Arc<MetricsRegistry>,
    max_frame_size: usize,
}

pub struct KvServer {
    listener: Listener,
    ctx: Arc<ConnContext>,
    sweep_interval: Duration,
}

impl KvServer {
    /// Bind the listener. Store capacity comes from the memfile when one is
    /// configured, otherwise from `config.limits`.
    pub async fn bind(config: &ServerConfig, selection: &TransportSelection) -> Result<Self> {
        let limits = match &config.memfile {
            Some(path) => memfile::open(path)?.limits,
            None => {
                config.limits.validate()?;
                config.limits
            }
        };
        let store = Arc::new(KeyStore::new(limits));
        Self::bind_with_store(config, selection, store).await
    }

    /// Bind serving an existing store
    pub async fn bind_with_store(
        config: &ServerConfig,
        selection: &TransportSelection,
        store: Arc<KeyStore>,
    ) -> Result<Self> {
        let acl = Arc::new(Acl::from_rules(config.acl.as_slice())?);

        let listener = match selection.profile {
            TransportProfile::Shm => {
                let path = selection.shm_socket_path(config.port);
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                // a socket left by a killed server blocks bind
                match std::fs::remove_file(&path) {
                    Ok(()) => tracing::warn!("Removed stale socket {}", path.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                Listener::Unix(UnixListener::bind(&path)?, path)
            }
            TransportProfile::Tcp | TransportProfile::Rdma => Listener::Tcp(
                TcpListener::bind((config.bind_addr.as_str(), config.port)).await?,
            ),
        };

        Ok(Self {
            listener,
            ctx: Arc::new(ConnContext {
                store,
                acl,
                metrics: Arc::new(MetricsRegistry::new()),
                max_frame_size: config.max_frame_size,
            }),
            sweep_interval: Duration::from_millis(config.expiry_sweep_interval_ms.max(1)),
        })
    }

    pub fn local_addr(&self) -> Result<ListenAddr> {
        Ok(match &self.listener {
            Listener::Tcp(listener) => ListenAddr::Tcp(listener.local_addr()?),
            Listener::Unix(_, path) => ListenAddr::Unix(path.clone()),
        })
    }

    pub fn store(&self) -> Arc<KeyStore> {
        self.ctx.store.clone()
    }

    /// State for the admin API, sharing this server's store, ACL and metrics
    pub fn admin_state(&self) -> AdminState {
        AdminState {
            store: self.ctx.store.clone(),
            acl: self.ctx.acl.clone(),
            metrics: self.ctx.metrics.clone(),
        }
    }

    /// Accept connections until `shutdown` resolves
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let addr = self.local_addr()?;
        tracing::info!("Serving on {}", addr);

        let sweeper = spawn_expiry_sweeper(self.ctx.store.clone(), self.sweep_interval);
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => break,
                accepted = accept(&self.listener) => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let ctx = self.ctx.clone();
                    tokio::spawn(async move {
                        ctx.metrics.active_connections.inc();
                        if let Err(e) = handle_connection(stream, peer, &ctx).await {
                            tracing::warn!("Connection from {} ended with error: {}", peer, e);
                        }
                        ctx.metrics.active_connections.dec();
                    });
                }
                Err(e) => {
                    tracing::error!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }

        sweeper.abort();
        if let Listener::Unix(_, path) = &self.listener {
            let _ = std::fs::remove_file(path);
        }
        tracing::info!("Server on {} stopped", addr);
        Ok(())
    }
}

type BoxedStream = Box<dyn AsyncStream>;

trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

async fn accept(listener: &Listener) -> std::io::Result<(BoxedStream, IpAddr)> {
    match listener {
        Listener::Tcp(listener) => {
            let (stream, peer) = listener.accept().await?;
            stream.set_nodelay(true)?;
            let stream: BoxedStream = Box::new(stream);
            Ok((stream, peer.ip()))
        }
        // local socket peers are treated as loopback
        Listener::Unix(listener, _) => {
            let (stream, _) = listener.accept().await?;
            let stream: BoxedStream = Box::new(stream);
            Ok((stream, IpAddr::V4(Ipv4Addr::LOCALHOST)))
        }
    }
}

async fn handle_connection(stream: BoxedStream, peer: IpAddr, ctx: &ConnContext) -> Result<()> {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let max = ctx.max_frame_size;

    let Some(hello) = read_frame::<_, RequestFrame>(&mut reader, max).await? else {
        return Ok(());
    };
    let (status, session_id) = match hello.request {
        Request::Hello {
            version,
            session_id,
        } if version == PROTOCOL_VERSION => {
            if ctx.acl.verify(peer) {
                (Status::Ok, session_id)
            } else {
                (Status::PermissionDenied, session_id)
            }
        }
        _ => (Status::InvalidCommand, String::new()),
    };
    let reply = ResponseFrame {
        id: hello.id,
        response: Response::status(status),
    };
    write_frame(&mut writer, &reply, max).await?;
    if !status.is_ok() {
        ctx.metrics.handshakes_rejected.inc();
        tracing::warn!("Rejected connection from {}: {}", peer, status);
        return Ok(());
    }
    tracing::debug!("Session {} from {} established", session_id, peer);

    while let Some(frame) = read_frame::<_, RequestFrame>(&mut reader, max).await? {
        let start = Instant::now();
        let name = frame.request.name();
        if let Request::Set { value, .. } = &frame.request {
            ctx.metrics.bytes_in.add(value.len() as u64);
        }

        let response = dispatch(&ctx.store, frame.request);
        if let ResponseBody::Value(value) = &response.body {
            ctx.metrics.bytes_out.add(value.len() as u64);
        }
        ctx.metrics.record(name, start.elapsed(), response.status);
        tracing::debug!("{} {} -> {}", session_id, name, response.status);

        write_frame(
            &mut writer,
            &ResponseFrame {
                id: frame.id,
                response,
            },
            max,
        )
        .await?;
    }

    tracing::debug!("Session {} closed", session_id);
    Ok(())
}
