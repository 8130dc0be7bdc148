//! End-to-end conformance run
//!
//! For every profile: resolve an endpoint, provision a fresh memfile, start
//! the server binary, give it a fixed settle time, then drive the scripted
//! steps through one client process each. The first mismatch aborts the
//! profile. All processes and the memfile are released on every exit path,
//! including SIGINT/SIGTERM.

use super::discovery::{discover, Endpoint};
use super::guard::RunGuard;
use super::outcome::parse_outcome;
use super::script::{conformance_script, Step};
use crate::client::TransportSelection;
use crate::common::{shutdown_signal, Error, HarnessConfig, Result};
use rand::Rng;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

pub const SERVER_BIN: &str = "fabrickv-server";
pub const CLIENT_BIN: &str = "fabrickv-client";
pub const MEMFILE_BIN: &str = "fabrickv-memfile";

/// Result of one profile's run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileReport {
    Passed,
    Skipped { reason: String },
    Failed { step: String, output: String },
}

impl ProfileReport {
    pub fn is_failure(&self) -> bool {
        matches!(self, ProfileReport::Failed { .. })
    }
}

pub struct Harness {
    config: HarnessConfig,
    key: String,
    value: String,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            key: "123".to_string(),
            value: "456".to_string(),
        }
    }

    /// Use a different key/value pair. The value must be all digits to be
    /// recognized in client output.
    pub fn with_pair(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.key = key.into();
        self.value = value.into();
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run every profile in order. A profile that errors out is reported as
    /// failed and the run moves on; only an interrupt ends it early.
    pub async fn run(
        &self,
        profiles: &[TransportSelection],
    ) -> Result<Vec<(TransportSelection, ProfileReport)>> {
        println!("---- E2E TEST ----");
        let mut reports = Vec::with_capacity(profiles.len());
        for selection in profiles {
            let report = match self.run_profile(selection).await {
                Ok(report) => report,
                Err(Error::Interrupted) => return Err(Error::Interrupted),
                Err(e) => {
                    tracing::error!("Profile {} aborted: {}", selection, e);
                    ProfileReport::Failed {
                        step: "harness".to_string(),
                        output: e.to_string(),
                    }
                }
            };
            match &report {
                ProfileReport::Passed => println!("---- E2E TEST [{}]: [OK] ----", selection),
                ProfileReport::Skipped { reason } => {
                    println!("---- E2E TEST [{}]: {}, SKIP ----", selection, reason)
                }
                ProfileReport::Failed { step, .. } => {
                    println!("---- E2E TEST [{}]: {} [FAILED] ----", selection, step)
                }
            }
            reports.push((selection.clone(), report));
        }
        Ok(reports)
    }

    /// Run one profile with its own guard. Cleanup completes before this
    /// returns, whatever the outcome.
    pub async fn run_profile(&self, selection: &TransportSelection) -> Result<ProfileReport> {
        let (address, device) = match discover(selection, &self.config.sysfs_root) {
            Endpoint::Available { address, device } => (address, device),
            Endpoint::Unavailable { reason } => {
                return Ok(ProfileReport::Skipped { reason });
            }
        };
        if let Some(device) = device {
            println!("---- E2E TEST: prepare {} <{}> [OK] ----", device, address);
        }

        let mut guard = RunGuard::new();
        let result = tokio::select! {
            result = self.drive(selection, address, &mut guard) => Some(result),
            _ = shutdown_signal() => None,
        };
        guard.release().await;

        match result {
            Some(result) => result,
            None => Err(Error::Interrupted),
        }
    }

    async fn drive(
        &self,
        selection: &TransportSelection,
        address: IpAddr,
        guard: &mut RunGuard,
    ) -> Result<ProfileReport> {
        let (low, high) = self.config.port_range;
        if low > high || high == u16::MAX {
            return Err(Error::InvalidConfig(format!(
                "bad port range {}-{}",
                low, high
            )));
        }
        let port: u16 = rand::thread_rng().gen_range(low..=high);
        let address = address.to_string();
        let port_arg = port.to_string();
        let admin_port_arg = (port + 1).to_string();

        let memfile = self.memfile_path();
        guard.track_memfile(memfile.clone());
        self.create_memfile(&memfile).await?;
        println!("---- E2E TEST: create memfile [OK] ----");

        let server = Command::new(self.bin(SERVER_BIN))
            .args(["-a", address.as_str(), "-A", "localhost"])
            .args(["-p", port_arg.as_str(), "-P", admin_port_arg.as_str()])
            .arg("-f")
            .arg(&memfile)
            .args(["--acl", "any"])
            .envs(selection.env_pairs())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Harness(format!("spawn {}: {}", SERVER_BIN, e)))?;
        guard.track_server(server);
        tracing::info!("Started server on {}:{} ({})", address, port, selection);

        // no readiness check: the fixed settle time is the contract
        tokio::time::sleep(Duration::from_secs(self.config.settle_secs)).await;
        if let Some(status) = guard.server_exited() {
            return Err(Error::Harness(format!("server exited early: {}", status)));
        }

        for step in conformance_script(&self.key, &self.value, &self.config) {
            if !step.delay.is_zero() {
                tokio::time::sleep(step.delay).await;
            }
            let output = self
                .run_client(selection, &address, port, &step, guard)
                .await?;
            let outcome = parse_outcome(&output);
            if !step.check(&outcome) {
                println!("{}", output);
                println!("---- E2E TEST: {} [FAILED] ----", step.name);
                return Ok(ProfileReport::Failed {
                    step: step.name.to_string(),
                    output,
                });
            }
            println!("---- E2E TEST: {} [OK] ----", step.name);
        }

        Ok(ProfileReport::Passed)
    }

    fn bin(&self, name: &str) -> PathBuf {
        self.config.bin_dir.join(name)
    }

    fn memfile_path(&self) -> PathBuf {
        let name = format!(
            "memfile_{}_{}",
            chrono::Utc::now().timestamp(),
            rand::thread_rng().gen_range(0..=99_999)
        );
        self.config.memfile_dir.join(name)
    }

    async fn create_memfile(&self, path: &Path) -> Result<()> {
        let status = Command::new(self.bin(MEMFILE_BIN))
            .args(["-o", "create", "-f"])
            .arg(path)
            .args(["--max-keys", "1024", "--max-key-length", "128"])
            .args(["--value-block-size", "4096", "--value-blocks", "4096"])
            .stdout(Stdio::null())
            .status()
            .await
            .map_err(|e| Error::Harness(format!("spawn {}: {}", MEMFILE_BIN, e)))?;
        if !status.success() {
            return Err(Error::Harness(format!(
                "creating memfile {} failed: {}",
                path.display(),
                status
            )));
        }
        Ok(())
    }

    /// Start one client, send `step.command`, return stdout and stderr joined
    async fn run_client(
        &self,
        selection: &TransportSelection,
        address: &str,
        port: u16,
        step: &Step,
        guard: &mut RunGuard,
    ) -> Result<String> {
        let port_arg = port.to_string();
        let mut child = Command::new(self.bin(CLIENT_BIN))
            .args(["-a", address, "-p", port_arg.as_str()])
            .envs(selection.env_pairs())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Harness(format!("spawn {}: {}", CLIENT_BIN, e)))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        guard.track_client(child);

        let io = async {
            if let Some(mut stdin) = stdin {
                stdin.write_all(step.command.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.shutdown().await?;
            }
            let mut out = Vec::new();
            let mut err = Vec::new();
            let read_out = async {
                match stdout {
                    Some(mut s) => s.read_to_end(&mut out).await.map(|_| ()),
                    None => Ok(()),
                }
            };
            let read_err = async {
                match stderr {
                    Some(mut s) => s.read_to_end(&mut err).await.map(|_| ()),
                    None => Ok(()),
                }
            };
            tokio::try_join!(read_out, read_err)?;
            Ok::<_, std::io::Error>((out, err))
        };

        let timeout = Duration::from_secs(self.config.step_timeout_secs);
        let (out, err) = match tokio::time::timeout(timeout, io).await {
            Ok(result) => result?,
            Err(_) => {
                guard.stop_client().await;
                return Err(Error::Harness(format!(
                    "client timed out on '{}'",
                    step.command
                )));
            }
        };
        if let Some(status) = guard.wait_client().await? {
            tracing::debug!("Client for '{}' exited with {}", step.command, status);
        }

        let mut output = String::from_utf8_lossy(&out).into_owned();
        output.push_str(&String::from_utf8_lossy(&err));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TransportProfile;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_fabric_device_skips() {
        let sysfs = TempDir::new().unwrap();
        let config = HarnessConfig {
            sysfs_root: sysfs.path().to_path_buf(),
            ..HarnessConfig::default()
        };
        let harness = Harness::new(config);
        let report = harness
            .run_profile(&TransportSelection::new(TransportProfile::Rdma))
            .await
            .unwrap();
        assert!(matches!(report, ProfileReport::Skipped { .. }));
        assert!(!report.is_failure());
    }

    #[tokio::test]
    async fn test_missing_binaries_clean_up_memfile() {
        let bins = TempDir::new().unwrap();
        let memfiles = TempDir::new().unwrap();
        let config = HarnessConfig {
            bin_dir: bins.path().to_path_buf(),
            memfile_dir: memfiles.path().to_path_buf(),
            ..HarnessConfig::default()
        };
        let harness = Harness::new(config);
        let result = harness
            .run_profile(&TransportSelection::new(TransportProfile::Tcp))
            .await;
        assert!(matches!(result, Err(Error::Harness(_))));
        assert_eq!(std::fs::read_dir(memfiles.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_profile_error_does_not_stop_the_run() {
        let bins = TempDir::new().unwrap();
        let memfiles = TempDir::new().unwrap();
        let sockets = TempDir::new().unwrap();
        let config = HarnessConfig {
            bin_dir: bins.path().to_path_buf(),
            memfile_dir: memfiles.path().to_path_buf(),
            ..HarnessConfig::default()
        };
        let profiles = [
            TransportSelection::new(TransportProfile::Tcp),
            TransportSelection::new(TransportProfile::Shm)
                .with_mode(sockets.path().to_string_lossy().into_owned()),
        ];

        let reports = Harness::new(config).run(&profiles).await.unwrap();
        assert_eq!(reports.len(), 2);
        for (_, report) in &reports {
            match report {
                ProfileReport::Failed { step, output } => {
                    assert_eq!(step, "harness");
                    assert!(output.contains(MEMFILE_BIN), "{}", output);
                }
                other => panic!("expected failure, got {:?}", other),
            }
        }
        assert_eq!(std::fs::read_dir(memfiles.path()).unwrap().count(), 0);
    }
}
