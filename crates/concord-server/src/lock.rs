//! Host-level process lock.
//!
//! The hub's in-memory session registry is authoritative for presence, so
//! two hubs on one host would fragment the presence view. On startup the
//! hub writes its PID to a well-known lock file; a second hub refuses to
//! start while that PID is alive. A stale file (process gone) is cleared
//! automatically on the next attempt.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    /// Another hub instance holds the lock.
    #[error("Another hub is already running on this host (pid {pid}, lock file {path}). Stop it or remove the lock file if it is stale.")]
    Held { pid: u32, path: String },

    #[error("Lock file IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Guard that releases the lock file when dropped.
pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    /// Acquire the lock, clearing a stale file if its process is gone.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(existing_pid) = read_pid(path) {
            if existing_pid != std::process::id() && process_alive(existing_pid) {
                return Err(LockError::Held {
                    pid: existing_pid,
                    path: path.display().to_string(),
                });
            }
            tracing::warn!(
                pid = existing_pid,
                path = %path.display(),
                "clearing stale process lock"
            );
            let _ = fs::remove_file(path);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, std::process::id().to_string())?;
        tracing::debug!(path = %path.display(), pid = std::process::id(), "process lock acquired");

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Path of the lock file (for diagnostics).
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        // Only remove the file if it still belongs to us.
        if read_pid(&self.path) == Some(std::process::id()) {
            let _ = fs::remove_file(&self.path);
            tracing::debug!(path = %self.path.display(), "process lock released");
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse::<u32>().ok()
}

/// Probe whether a process with the given PID exists.
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // Signal 0 performs the permission/existence check without delivering
    // anything. EPERM still means the process exists.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // No portable probe available; treat the lock as stale so the operator
    // is never locked out of a restart.
    false
}
