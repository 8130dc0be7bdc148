//! Command-line client: reads commands from stdin, one per line

use anyhow::Context;
use clap::Parser;
use fabrickv::client::{Command, ConnectOptions, Session, TransportSelection};
use fabrickv::common::Config;
use std::io::{BufRead, Write};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fabrickv-client")]
#[command(about = "fabrickv client: get/set/delete/test/expire/keys/nrkeys from stdin")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short = 'a', long = "addr", default_value = "127.0.0.1")]
    addr: String,

    /// Server port
    #[arg(short = 'p', long = "port", default_value = "18512")]
    port: u16,

    /// Local address to bind
    #[arg(long = "laddr")]
    laddr: Option<String>,

    /// Local port to bind
    #[arg(long = "lport", default_value = "0")]
    lport: u16,

    /// Size of the destination region registered for `get`
    #[arg(long, default_value = "4096")]
    value_size: usize,

    /// Number of connections
    #[arg(long, default_value = "1")]
    workers: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout carries results only
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load();
    let selection = TransportSelection::from_env().context("transport selection")?;
    let options = ConnectOptions::new(args.addr.clone(), args.port)
        .local(args.laddr.clone(), args.lport)
        .workers(args.workers)
        .config(config.client)
        .selection(selection);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let mut session = match Session::connect(&options) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("Connecting to {}:{} failed: {}", args.addr, args.port, e);
            writeln!(out, "{}", e.status())?;
            std::process::exit(1);
        }
    };
    tracing::info!("Connected: {}", session.describe());

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let result = line
            .parse::<Command>()
            .and_then(|command| command.execute(&mut session, args.value_size));
        match result {
            Ok(output) => {
                for rendered in output.render() {
                    writeln!(out, "{}", rendered)?;
                }
            }
            Err(e) => {
                tracing::warn!("'{}' failed: {}", line.trim(), e);
                writeln!(out, "{}", e.status())?;
            }
        }
        out.flush()?;
    }

    session.close().context("closing session")?;
    Ok(())
}
