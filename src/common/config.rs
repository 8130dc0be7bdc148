//! Configuration for fabrickv components
//!
//! Loaded from an optional `fabrickv.toml` in the working directory, then
//! overridden by `FABRICKV__<SECTION>__<FIELD>` environment variables.
//! Command-line flags take priority over both.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub harness: HarnessConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            server: ServerConfig::default(),
            harness: HarnessConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from `fabrickv.toml` and the environment.
    ///
    /// Falls back to defaults when the sources cannot be parsed.
    pub fn load() -> Self {
        let built = config::Config::builder()
            .add_source(config::File::with_name("fabrickv").required(false))
            .add_source(config::Environment::with_prefix("FABRICKV").separator("__"))
            .build();

        match built.and_then(|c| c.try_deserialize::<Config>()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Invalid configuration, using defaults: {}", e);
                Config::default()
            }
        }
    }
}

/// Client session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Connection establishment timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Per-operation round-trip timeout
    #[serde(default = "default_op_timeout")]
    pub op_timeout_ms: u64,

    /// Maximum number of concurrently registered regions
    #[serde(default = "default_max_regions")]
    pub max_regions: usize,

    /// Maximum total bytes registered at once
    #[serde(default = "default_max_registered_bytes")]
    pub max_registered_bytes: u64,

    /// Largest accepted protocol frame
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_connect_timeout() -> u64 {
    5_000
}
fn default_op_timeout() -> u64 {
    10_000
}
fn default_max_regions() -> usize {
    4096
}
fn default_max_registered_bytes() -> u64 {
    16 * 1024 * 1024 * 1024
}
fn default_max_frame_size() -> usize {
    64 * 1024 * 1024
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            op_timeout_ms: default_op_timeout(),
            max_regions: default_max_regions(),
            max_registered_bytes: default_max_registered_bytes(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

/// Capacity limits of one store instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreLimits {
    pub max_keys: usize,
    pub max_key_length: usize,
    pub value_block_size: u64,
    pub value_blocks: u64,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_keys: 1024,
            max_key_length: 128,
            value_block_size: 4096,
            value_blocks: 4096,
        }
    }
}

impl StoreLimits {
    /// Total value capacity in bytes
    pub fn value_capacity(&self) -> u64 {
        self.value_block_size.saturating_mul(self.value_blocks)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.max_keys == 0 {
            return Err(crate::Error::InvalidConfig("max_keys must be > 0".into()));
        }
        if self.max_key_length == 0 {
            return Err(crate::Error::InvalidConfig(
                "max_key_length must be > 0".into(),
            ));
        }
        if self.value_block_size == 0 || self.value_blocks == 0 {
            return Err(crate::Error::InvalidConfig(
                "value block size and count must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the protocol listener binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Address the admin HTTP API binds to
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,

    #[serde(default = "default_admin_port")]
    pub admin_port: u16,

    /// Backing store file holding the capacity header
    #[serde(default)]
    pub memfile: Option<PathBuf>,

    /// Initial ACL rules
    #[serde(default)]
    pub acl: Vec<String>,

    /// Interval between background expiry sweeps
    #[serde(default = "default_sweep_interval")]
    pub expiry_sweep_interval_ms: u64,

    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Limits used when no memfile is given
    #[serde(default)]
    pub limits: StoreLimits,
}

fn default_bind_addr() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    18512
}
fn default_admin_addr() -> String {
    "localhost".to_string()
}
fn default_admin_port() -> u16 {
    18513
}
fn default_sweep_interval() -> u64 {
    1_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            admin_addr: default_admin_addr(),
            admin_port: default_admin_port(),
            memfile: None,
            acl: Vec::new(),
            expiry_sweep_interval_ms: default_sweep_interval(),
            max_frame_size: default_max_frame_size(),
            limits: StoreLimits::default(),
        }
    }
}

/// End-to-end harness configuration
///
/// Timing constants leave whole seconds of margin around every TTL window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Directory holding the server/client/memfile binaries
    #[serde(default = "default_bin_dir")]
    pub bin_dir: PathBuf,

    /// Directory where backing store files are created
    #[serde(default = "default_memfile_dir")]
    pub memfile_dir: PathBuf,

    /// Inclusive port range the server port is drawn from
    #[serde(default = "default_port_range")]
    pub port_range: (u16, u16),

    /// Fixed wait after starting the server
    #[serde(default = "default_settle")]
    pub settle_secs: u64,

    /// TTL used for the set-with-ttl and expire steps
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Wait before the hit-before-elapse check
    #[serde(default = "default_pre_expiry")]
    pub pre_expiry_check_secs: u64,

    /// Additional wait before the miss-after-elapse check
    #[serde(default = "default_post_expiry")]
    pub post_expiry_check_secs: u64,

    /// Wait before the no-TTL survival check and the post-expire check
    #[serde(default = "default_long_wait")]
    pub long_wait_secs: u64,

    /// Upper bound for one client process
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    /// Root of the sysfs tree scanned for fabric devices
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
}

fn default_bin_dir() -> PathBuf {
    PathBuf::from("./target/debug")
}
fn default_memfile_dir() -> PathBuf {
    let run = PathBuf::from("/run");
    if nix::unistd::access(&run, nix::unistd::AccessFlags::W_OK).is_ok() {
        run
    } else {
        std::env::temp_dir()
    }
}
fn default_port_range() -> (u16, u16) {
    (24300, 24500)
}
fn default_settle() -> u64 {
    10
}
fn default_ttl() -> u64 {
    5
}
fn default_pre_expiry() -> u64 {
    3
}
fn default_post_expiry() -> u64 {
    5
}
fn default_long_wait() -> u64 {
    7
}
fn default_step_timeout() -> u64 {
    30
}
fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys")
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            bin_dir: default_bin_dir(),
            memfile_dir: default_memfile_dir(),
            port_range: default_port_range(),
            settle_secs: default_settle(),
            ttl_secs: default_ttl(),
            pre_expiry_check_secs: default_pre_expiry(),
            post_expiry_check_secs: default_post_expiry(),
            long_wait_secs: default_long_wait(),
            step_timeout_secs: default_step_timeout(),
            sysfs_root: default_sysfs_root(),
        }
    }
}
