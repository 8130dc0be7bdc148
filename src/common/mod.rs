//! Common utilities and types shared across fabrickv

pub mod config;
pub mod error;
pub mod metrics;
pub mod utils;

pub use config::{ClientConfig, Config, HarnessConfig, ServerConfig, StoreLimits};
pub use error::{Error, Result};
pub use metrics::MetricsRegistry;
pub use utils::{format_bytes, glob_match, parse_duration, shutdown_signal, validate_key};
