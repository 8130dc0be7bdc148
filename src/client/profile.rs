//! Transport profile selection
//!
//! `FABRICKV_TRANSPORT` picks the profile (`rdma`, `tcp`, `shm`; default
//! `tcp`) and `FABRICKV_TRANSPORT_MODE` its sub-mode:
//! - `tcp`: `nodelay` (default) or `buffered`
//! - `shm`: directory holding the local sockets
//! - `rdma`: fabric device name filter used by endpoint discovery

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const TRANSPORT_ENV: &str = "FABRICKV_TRANSPORT";
pub const TRANSPORT_MODE_ENV: &str = "FABRICKV_TRANSPORT_MODE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProfile {
    /// Native fabric device
    Rdma,
    Tcp,
    /// Same-host local stream socket
    Shm,
}

impl TransportProfile {
    pub const ALL: [TransportProfile; 3] = [
        TransportProfile::Rdma,
        TransportProfile::Tcp,
        TransportProfile::Shm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProfile::Rdma => "rdma",
            TransportProfile::Tcp => "tcp",
            TransportProfile::Shm => "shm",
        }
    }
}

impl fmt::Display for TransportProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rdma" => Ok(TransportProfile::Rdma),
            "tcp" => Ok(TransportProfile::Tcp),
            "shm" => Ok(TransportProfile::Shm),
            other => Err(Error::InvalidConfig(format!(
                "unknown transport profile '{}'",
                other
            ))),
        }
    }
}

/// Active profile plus its sub-mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSelection {
    pub profile: TransportProfile,
    pub mode: Option<String>,
}

impl Default for TransportSelection {
    fn default() -> Self {
        Self::new(TransportProfile::Tcp)
    }
}

impl TransportSelection {
    pub fn new(profile: TransportProfile) -> Self {
        Self {
            profile,
            mode: None,
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// Read the selection from the process environment
    pub fn from_env() -> Result<Self> {
        let profile = std::env::var(TRANSPORT_ENV).ok();
        let mode = std::env::var(TRANSPORT_MODE_ENV).ok();
        Self::from_values(profile.as_deref(), mode.as_deref())
    }

    pub fn from_values(profile: Option<&str>, mode: Option<&str>) -> Result<Self> {
        let profile = match profile.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => p.parse()?,
            None => TransportProfile::Tcp,
        };
        let mode = mode
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);

        if profile == TransportProfile::Tcp {
            if let Some(mode) = mode.as_deref() {
                if mode != "nodelay" && mode != "buffered" {
                    return Err(Error::InvalidConfig(format!(
                        "unknown tcp mode '{}' (expected nodelay or buffered)",
                        mode
                    )));
                }
            }
        }

        Ok(Self { profile, mode })
    }

    /// Whether TCP streams disable Nagle's algorithm
    pub fn tcp_nodelay(&self) -> bool {
        self.mode.as_deref() != Some("buffered")
    }

    /// Directory holding local sockets for the `shm` profile
    pub fn shm_dir(&self) -> PathBuf {
        match (self.profile, self.mode.as_deref()) {
            (TransportProfile::Shm, Some(dir)) => PathBuf::from(dir),
            _ => std::env::temp_dir(),
        }
    }

    /// Socket path a server on `port` listens on under the `shm` profile
    pub fn shm_socket_path(&self, port: u16) -> PathBuf {
        self.shm_dir().join(format!("fabrickv-{}.sock", port))
    }

    /// Device name filter for fabric discovery
    pub fn device_filter(&self) -> Option<&str> {
        match self.profile {
            TransportProfile::Rdma => self.mode.as_deref(),
            _ => None,
        }
    }

    /// Environment to hand to child processes so they select the same profile
    pub fn env_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![(TRANSPORT_ENV, self.profile.to_string())];
        if let Some(mode) = &self.mode {
            pairs.push((TRANSPORT_MODE_ENV, mode.clone()));
        }
        pairs
    }
}

impl fmt::Display for TransportSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mode {
            Some(mode) => write!(f, "{}:{}", self.profile, mode),
            None => write!(f, "{}", self.profile),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_tcp() {
        let selection = TransportSelection::from_values(None, None).unwrap();
        assert_eq!(selection.profile, TransportProfile::Tcp);
        assert!(selection.tcp_nodelay());
    }

    #[test]
    fn test_profiles_parse() {
        assert_eq!("RDMA".parse::<TransportProfile>().unwrap(), TransportProfile::Rdma);
        assert_eq!(" shm ".parse::<TransportProfile>().unwrap(), TransportProfile::Shm);
        assert!("ucx".parse::<TransportProfile>().is_err());
    }

    #[test]
    fn test_tcp_modes() {
        let buffered = TransportSelection::from_values(Some("tcp"), Some("buffered")).unwrap();
        assert!(!buffered.tcp_nodelay());
        assert!(TransportSelection::from_values(Some("tcp"), Some("fast")).is_err());
    }

    #[test]
    fn test_shm_socket_path() {
        let selection = TransportSelection::new(TransportProfile::Shm).with_mode("/tmp/fkv");
        assert_eq!(
            selection.shm_socket_path(24321),
            PathBuf::from("/tmp/fkv/fabrickv-24321.sock")
        );
    }

    #[test]
    fn test_env_pairs() {
        let selection = TransportSelection::new(TransportProfile::Rdma).with_mode("mlx5_0");
        assert_eq!(selection.device_filter(), Some("mlx5_0"));
        assert_eq!(
            selection.env_pairs(),
            vec![
                (TRANSPORT_ENV, "rdma".to_string()),
                (TRANSPORT_MODE_ENV, "mlx5_0".to_string())
            ]
        );
    }
}
