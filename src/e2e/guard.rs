//! Scoped cleanup for one harness run
//!
//! Owns every resource a run creates: the server process, the current
//! client process and the backing store file. [`RunGuard::release`] tears
//! them all down exactly once; `Drop` covers the paths that never reach it.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;

/// How long a child gets to exit after SIGTERM before it is killed
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct RunGuard {
    server: Option<Child>,
    client: Option<Child>,
    memfile: Option<PathBuf>,
    released: bool,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the backing store file. Set before the file is created so a
    /// half-finished provisioning still gets cleaned up.
    pub fn track_memfile(&mut self, path: PathBuf) {
        self.memfile = Some(path);
    }

    pub fn memfile(&self) -> Option<&Path> {
        self.memfile.as_deref()
    }

    pub fn track_server(&mut self, child: Child) {
        self.server = Some(child);
    }

    pub fn track_client(&mut self, child: Child) {
        self.client = Some(child);
    }

    /// Wait for the tracked client to exit and stop tracking it
    pub async fn wait_client(&mut self) -> std::io::Result<Option<ExitStatus>> {
        let status = match self.client.as_mut() {
            Some(child) => Some(child.wait().await?),
            None => None,
        };
        self.client = None;
        Ok(status)
    }

    /// Terminate the tracked client, if any
    pub async fn stop_client(&mut self) {
        if let Some(child) = self.client.take() {
            terminate("client", child).await;
        }
    }

    /// Exit status of the server if it has already exited
    pub fn server_exited(&mut self) -> Option<ExitStatus> {
        self.server.as_mut().and_then(|child| child.try_wait().ok().flatten())
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Terminate all children and remove the memfile. Later calls are no-ops.
    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(child) = self.client.take() {
            terminate("client", child).await;
        }
        if let Some(child) = self.server.take() {
            terminate("server", child).await;
        }
        if let Some(path) = self.memfile.take() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!("Removed memfile {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove memfile {}: {}", path.display(), e),
            }
        }
    }
}

async fn terminate(what: &str, mut child: Child) {
    if let Ok(Some(status)) = child.try_wait() {
        tracing::debug!("{} already exited with {}", what, status);
        return;
    }

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::debug!("SIGTERM to {} ({}) failed: {}", what, pid, e);
        }
    }

    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!("{} exited with {}", what, status),
        Ok(Err(e)) => tracing::warn!("Waiting for {} failed: {}", what, e),
        Err(_) => {
            tracing::warn!("{} ignored SIGTERM, killing", what);
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill {}: {}", what, e);
            }
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        for child in [self.client.as_mut(), self.server.as_mut()].into_iter().flatten() {
            let _ = child.start_kill();
        }
        if let Some(path) = self.memfile.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}
