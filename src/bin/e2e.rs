//! End-to-end conformance harness binary

use clap::Parser;
use fabrickv::client::TransportSelection;
use fabrickv::common::{parse_duration, Config};
use fabrickv::e2e::{Harness, ProfileReport};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fabrickv-e2e")]
#[command(about = "Black-box conformance run against fabrickv-server and fabrickv-client")]
#[command(version)]
struct Args {
    /// Directory holding fabrickv-server, fabrickv-client and fabrickv-memfile
    #[arg(long)]
    bin_dir: Option<PathBuf>,

    /// Profiles to run, optionally with a mode (e.g. `rdma,tcp:buffered,shm:/tmp`)
    #[arg(long, value_delimiter = ',', default_value = "rdma,tcp,shm")]
    profiles: Vec<String>,

    /// Directory for backing store files
    #[arg(long)]
    memfile_dir: Option<PathBuf>,

    /// Wait after starting the server (e.g. `10s`)
    #[arg(long, value_parser = parse_secs)]
    settle: Option<u64>,

    /// TTL used by the expiry steps
    #[arg(long, value_parser = parse_secs)]
    ttl: Option<u64>,

    /// Wait before the hit-before-expiry check
    #[arg(long, value_parser = parse_secs)]
    pre_expiry: Option<u64>,

    /// Wait before the miss-after-expiry check
    #[arg(long, value_parser = parse_secs)]
    post_expiry: Option<u64>,

    /// Wait before the survival and post-expire checks
    #[arg(long, value_parser = parse_secs)]
    long_wait: Option<u64>,

    /// Upper bound for one client run
    #[arg(long, value_parser = parse_secs)]
    step_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn parse_secs(s: &str) -> Result<u64, String> {
    parse_duration(s)
        .map(|d| d.as_secs())
        .map_err(|e| e.to_string())
}

fn parse_profile(spec: &str) -> fabrickv::Result<TransportSelection> {
    match spec.split_once(':') {
        Some((profile, mode)) => TransportSelection::from_values(Some(profile), Some(mode)),
        None => TransportSelection::from_values(Some(spec), None),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut harness_config = Config::load().harness;
    if let Some(dir) = args.bin_dir {
        harness_config.bin_dir = dir;
    }
    if let Some(dir) = args.memfile_dir {
        harness_config.memfile_dir = dir;
    }
    let overrides = [
        (args.settle, &mut harness_config.settle_secs),
        (args.ttl, &mut harness_config.ttl_secs),
        (args.pre_expiry, &mut harness_config.pre_expiry_check_secs),
        (args.post_expiry, &mut harness_config.post_expiry_check_secs),
        (args.long_wait, &mut harness_config.long_wait_secs),
        (args.step_timeout, &mut harness_config.step_timeout_secs),
    ];
    for (value, field) in overrides {
        if let Some(value) = value {
            *field = value;
        }
    }

    let profiles = args
        .profiles
        .iter()
        .map(|spec| parse_profile(spec.trim()))
        .collect::<fabrickv::Result<Vec<_>>>()?;

    let harness = Harness::new(harness_config);
    let reports = match harness.run(&profiles).await {
        Ok(reports) => reports,
        Err(e) => {
            eprintln!("---- E2E TEST ABORTED: {} ----", e);
            std::process::exit(1);
        }
    };

    let mut failed = false;
    for (selection, report) in &reports {
        match report {
            ProfileReport::Passed => println!("{:<24} PASSED", selection.to_string()),
            ProfileReport::Skipped { reason } => {
                println!("{:<24} SKIPPED ({})", selection.to_string(), reason)
            }
            ProfileReport::Failed { step, .. } => {
                failed = true;
                println!("{:<24} FAILED at '{}'", selection.to_string(), step);
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
