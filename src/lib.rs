//! # fabrickv
//!
//! Client side of a remote key-value store built for zero-copy transports:
//! - Memory registration with generation-checked handles
//! - Scatter-gather descriptors (SGL) naming exactly the bytes an operation moves
//! - A blocking KV session: get / set (with TTL) / delete / test / expire / keys / nrkeys
//! - A reference server with lazy + swept TTL expiry, ACLs and an admin HTTP API
//! - A black-box end-to-end harness driving the server and client binaries
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  Session                     │
//! │   MemoryRegistry ── Sgl      │
//! │   Box<dyn Transport>         │
//! └──────────┬───────────────────┘
//!            │ FKV1 frames (tcp | rdma address | local socket)
//! ┌──────────▼───────────────────┐     ┌──────────────────────┐
//! │  KvServer                    │────▶│ admin API (port + 1) │
//! │   Acl ── KeyStore (TTL)      │     │ /api/* /metrics      │
//! └──────────────────────────────┘     └──────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! fabrickv-memfile -o create -f /run/memfile --max-keys 1024 --max-key-length 128 \
//!   --value-block-size 4096 --value-blocks 4096
//! fabrickv-server -a 127.0.0.1 -p 24300 -A localhost -P 24301 -f /run/memfile --acl any
//! echo "set 123 456 EX 5" | fabrickv-client -a 127.0.0.1 -p 24300
//!
//! # full conformance run over every profile
//! fabrickv-e2e --bin-dir ./target/debug --profiles rdma,tcp,shm
//! ```
//!
//! The transport profile is chosen with `FABRICKV_TRANSPORT` (`rdma`, `tcp`,
//! `shm`) and `FABRICKV_TRANSPORT_MODE`.

pub mod client;
pub mod common;
pub mod e2e;
pub mod memory;
pub mod protocol;
pub mod server;

// Re-export commonly used types
pub use client::{ConnectOptions, Session};
pub use common::{Config, Error, Result};
pub use memory::{MemoryRegion, MemoryRegistry, Sgl};
pub use protocol::Status;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
