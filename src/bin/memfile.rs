//! Backing store file tool

use clap::{Parser, ValueEnum};
use fabrickv::common::StoreLimits;
use fabrickv::server::memfile;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Operation {
    /// Create a new file with the given capacity
    Create,
    /// Print the header of an existing file as JSON
    Info,
}

#[derive(Parser, Debug)]
#[command(name = "fabrickv-memfile")]
#[command(about = "Create or inspect a fabrickv backing store file")]
#[command(version)]
struct Args {
    /// Operation
    #[arg(short = 'o', long = "op", value_enum)]
    op: Operation,

    /// File path
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// Maximum number of keys
    #[arg(long, default_value = "1024")]
    max_keys: usize,

    /// Maximum key length in bytes
    #[arg(long, default_value = "128")]
    max_key_length: usize,

    /// Value block size in bytes
    #[arg(long, default_value = "4096")]
    value_block_size: u64,

    /// Number of value blocks
    #[arg(long, default_value = "4096")]
    value_blocks: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match args.op {
        Operation::Create => {
            let limits = StoreLimits {
                max_keys: args.max_keys,
                max_key_length: args.max_key_length,
                value_block_size: args.value_block_size,
                value_blocks: args.value_blocks,
            };
            memfile::create(&args.file, limits)?;
            println!("Created {}", args.file.display());
        }
        Operation::Info => {
            let info = memfile::info(&args.file)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }

    Ok(())
}
