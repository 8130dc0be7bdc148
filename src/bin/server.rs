//! Reference store server binary

use anyhow::Context;
use clap::Parser;
use fabrickv::client::TransportSelection;
use fabrickv::common::{format_bytes, shutdown_signal, Config};
use fabrickv::server::{admin, KvServer};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fabrickv-server")]
#[command(about = "fabrickv reference server with TTL store, ACL and admin API")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(short = 'a', long = "addr")]
    addr: Option<String>,

    /// Protocol port
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,

    /// Admin API address
    #[arg(short = 'A', long = "admin-addr")]
    admin_addr: Option<String>,

    /// Admin API port
    #[arg(short = 'P', long = "admin-port")]
    admin_port: Option<u16>,

    /// Backing store file created by fabrickv-memfile
    #[arg(short = 'f', long = "memfile")]
    memfile: Option<PathBuf>,

    /// ACL rule: `any`, an address, or addr/prefix (repeatable)
    #[arg(long = "acl")]
    acl: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::load();
    let log_level = args.log_level.clone().unwrap_or(config.log_level.clone());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let server_config = &mut config.server;
    if let Some(addr) = args.addr {
        server_config.bind_addr = addr;
    }
    if let Some(port) = args.port {
        server_config.port = port;
    }
    if let Some(addr) = args.admin_addr {
        server_config.admin_addr = addr;
    }
    if let Some(port) = args.admin_port {
        server_config.admin_port = port;
    }
    if args.memfile.is_some() {
        server_config.memfile = args.memfile;
    }
    if !args.acl.is_empty() {
        server_config.acl = args.acl;
    }

    let selection = TransportSelection::from_env().context("transport selection")?;
    tracing::info!("Starting fabrickv server {}", fabrickv::BUILD_INFO);
    tracing::info!("Transport: {}", selection);

    let server = KvServer::bind(server_config, &selection)
        .await
        .context("binding protocol listener")?;
    let limits = *server.store().limits();
    tracing::info!(
        "Capacity: {} keys, key length {}, values {}",
        limits.max_keys,
        limits.max_key_length,
        format_bytes(limits.value_capacity())
    );
    tracing::info!("ACL: {:?}", server.admin_state().acl.rules());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let admin_addr = format!("{}:{}", server_config.admin_addr, server_config.admin_port);
    let admin_state = server.admin_state();
    let mut admin_rx = shutdown_rx.clone();
    let admin = tokio::spawn(async move {
        admin::serve(&admin_addr, admin_state, async move {
            let _ = admin_rx.wait_for(|stop| *stop).await;
        })
        .await
    });

    let mut serve_rx = shutdown_rx;
    let serve = tokio::spawn(server.serve(async move {
        let _ = serve_rx.wait_for(|stop| *stop).await;
    }));

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    serve.await.context("protocol listener task")??;
    match admin.await.context("admin task")? {
        Ok(()) => {}
        Err(e) => tracing::error!("Admin API failed: {}", e),
    }

    tracing::info!("fabrickv server stopped");
    Ok(())
}
