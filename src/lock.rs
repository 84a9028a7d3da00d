//! Drain-session exclusivity lock.
//!
//! A small JSON lock file containing the holder token, pid, and acquisition
//! time. Acquisition is atomic create-if-absent; a held lock is reclaimable
//! only once stale (holder dead past the handoff grace, or older than the
//! configured staleness bound). Failure to acquire is the expected
//! "another session is draining" outcome, not an error.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLock {
    pub holder_id: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    /// A live lock is held by another session.
    Held { holder_id: String },
}

pub struct LockManager {
    path: PathBuf,
    stale_after: Duration,
    handoff_grace: Duration,
}

impl LockManager {
    pub fn new<P: AsRef<Path>>(path: P, stale_after: Duration, handoff_grace: Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            stale_after,
            handoff_grace,
        }
    }

    /// Atomically create the lock for `holder_id`, reclaiming a stale one.
    pub fn try_acquire(&self, holder_id: &str) -> Result<AcquireOutcome> {
        match self.create_exclusive(holder_id) {
            Ok(()) => return Ok(AcquireOutcome::Acquired),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e).context("Failed to create lock file"),
        }

        // Lock file exists. Reclaim only if stale, then retry the atomic
        // create exactly once; losing that race means someone else holds it.
        match self.read()? {
            Some(lock) if self.is_stale(&lock) => {
                warn!(
                    holder = %lock.holder_id,
                    pid = lock.pid,
                    acquired_at = %lock.acquired_at,
                    "reclaiming stale session lock"
                );
                self.remove()?;
                match self.create_exclusive(holder_id) {
                    Ok(()) => Ok(AcquireOutcome::Acquired),
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                        let current = self.read()?;
                        Ok(AcquireOutcome::Held {
                            holder_id: current.map(|l| l.holder_id).unwrap_or_default(),
                        })
                    }
                    Err(e) => Err(e).context("Failed to create lock file"),
                }
            }
            Some(lock) => Ok(AcquireOutcome::Held {
                holder_id: lock.holder_id,
            }),
            // Unreadable or vanished lock file: treat as held; the staleness
            // path will clear it on a later attempt if it stays bad.
            None => Ok(AcquireOutcome::Held {
                holder_id: String::new(),
            }),
        }
    }

    /// Remove the lock if held by `holder_id`. Safe to call repeatedly and
    /// from both normal completion and crash-recovery paths: an absent lock
    /// is a no-op.
    pub fn release(&self, holder_id: &str) -> Result<()> {
        match self.read()? {
            Some(lock) if lock.holder_id == holder_id => self.remove(),
            Some(lock) => {
                warn!(
                    held_by = %lock.holder_id,
                    caller = %holder_id,
                    "refusing to release lock held by another session"
                );
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Restamp the lock's pid to the current process.
    ///
    /// Used by a spawned session taking over a lock its dispatcher acquired;
    /// only succeeds when the holder token matches.
    pub fn adopt(&self, holder_id: &str) -> Result<()> {
        let lock = self
            .read()?
            .with_context(|| format!("No lock to adopt at {}", self.path.display()))?;
        if lock.holder_id != holder_id {
            anyhow::bail!(
                "Lock is held by '{}', cannot adopt as '{}'",
                lock.holder_id,
                holder_id
            );
        }
        let adopted = SessionLock {
            pid: std::process::id(),
            ..lock
        };
        self.write(&adopted)?;
        info!(holder = %holder_id, pid = adopted.pid, "adopted session lock");
        Ok(())
    }

    /// Operator escape hatch: drop the lock regardless of holder.
    pub fn force_release(&self) -> Result<bool> {
        if self.path.exists() {
            self.remove()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Read the current lock, if any. An unreadable file yields `None`.
    pub fn read(&self) -> Result<Option<SessionLock>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("Failed to read lock file"),
        };
        Ok(serde_json::from_str(&content).ok())
    }

    /// A lock is stale when it exceeds the staleness bound, or when its
    /// holder process is dead and the handoff grace period has elapsed.
    /// The grace covers the window where a dispatcher has exited but its
    /// spawned session has not yet adopted the lock.
    pub fn is_stale(&self, lock: &SessionLock) -> bool {
        let age = Utc::now().signed_duration_since(lock.acquired_at);
        let age = age.to_std().unwrap_or(Duration::ZERO);

        if age > self.stale_after {
            return true;
        }
        !is_process_alive(lock.pid) && age > self.handoff_grace
    }

    fn create_exclusive(&self, holder_id: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock = SessionLock {
            holder_id: holder_id.to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        let content = serde_json::to_string_pretty(&lock)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        file.write_all(content.as_bytes())
    }

    fn write(&self, lock: &SessionLock) -> Result<()> {
        let content = serde_json::to_string_pretty(lock).context("Failed to serialize lock")?;
        fs::write(&self.path, content).context("Failed to write lock file")
    }

    fn remove(&self) -> Result<()> {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e).context("Failed to remove lock file");
            }
        }
        Ok(())
    }
}

/// Check if a process with the given PID is alive via `kill -0`: no signal
/// is delivered, it only tests existence and permission to signal.
pub fn is_process_alive(pid: u32) -> bool {
    Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> LockManager {
        LockManager::new(
            temp.path().join("session.lock"),
            Duration::from_secs(30 * 60),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_acquire_then_held() {
        let temp = TempDir::new().unwrap();
        let lock = manager(&temp);

        assert_eq!(lock.try_acquire("s1").unwrap(), AcquireOutcome::Acquired);
        assert_eq!(
            lock.try_acquire("s2").unwrap(),
            AcquireOutcome::Held {
                holder_id: "s1".to_string()
            }
        );
    }

    #[test]
    fn test_release_is_idempotent_and_holder_scoped() {
        let temp = TempDir::new().unwrap();
        let lock = manager(&temp);

        lock.try_acquire("s1").unwrap();

        // A different holder cannot release it.
        lock.release("s2").unwrap();
        assert!(lock.read().unwrap().is_some());

        lock.release("s1").unwrap();
        assert!(lock.read().unwrap().is_none());

        // Releasing again (crash-recovery path) is a no-op.
        lock.release("s1").unwrap();
    }

    #[test]
    fn test_stale_by_age_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        let lock = LockManager::new(
            temp.path().join("session.lock"),
            Duration::from_secs(0),
            Duration::from_secs(0),
        );

        lock.try_acquire("s1").unwrap();
        let mut held = lock.read().unwrap().unwrap();
        held.acquired_at = Utc::now() - chrono::Duration::seconds(1);
        lock.write(&held).unwrap();

        // Zero staleness bound: the held lock is immediately reclaimable.
        assert_eq!(lock.try_acquire("s2").unwrap(), AcquireOutcome::Acquired);
        assert_eq!(lock.read().unwrap().unwrap().holder_id, "s2");
    }

    #[test]
    fn test_dead_pid_within_grace_is_not_stale() {
        let temp = TempDir::new().unwrap();
        let lock = manager(&temp);

        lock.try_acquire("s1").unwrap();
        let mut held = lock.read().unwrap().unwrap();
        held.pid = 999_999_999; // certainly dead
        lock.write(&held).unwrap();

        // Dead pid but fresh: still inside the handoff grace window.
        assert!(!lock.is_stale(&lock.read().unwrap().unwrap()));
        assert!(matches!(
            lock.try_acquire("s2").unwrap(),
            AcquireOutcome::Held { .. }
        ));
    }

    #[test]
    fn test_dead_pid_past_grace_is_stale() {
        let temp = TempDir::new().unwrap();
        let lock = LockManager::new(
            temp.path().join("session.lock"),
            Duration::from_secs(30 * 60),
            Duration::from_secs(0),
        );

        lock.try_acquire("s1").unwrap();
        let mut held = lock.read().unwrap().unwrap();
        held.pid = 999_999_999;
        held.acquired_at = Utc::now() - chrono::Duration::seconds(5);
        lock.write(&held).unwrap();

        assert!(lock.is_stale(&lock.read().unwrap().unwrap()));
        assert_eq!(lock.try_acquire("s2").unwrap(), AcquireOutcome::Acquired);
    }

    #[test]
    fn test_adopt_restamps_pid_for_matching_holder() {
        let temp = TempDir::new().unwrap();
        let lock = manager(&temp);

        lock.try_acquire("s1").unwrap();
        let mut held = lock.read().unwrap().unwrap();
        held.pid = 1; // pretend the dispatcher pid differs
        lock.write(&held).unwrap();

        lock.adopt("s1").unwrap();
        assert_eq!(lock.read().unwrap().unwrap().pid, std::process::id());

        assert!(lock.adopt("other").is_err());
    }

    #[test]
    fn test_force_release() {
        let temp = TempDir::new().unwrap();
        let lock = manager(&temp);

        assert!(!lock.force_release().unwrap());
        lock.try_acquire("s1").unwrap();
        assert!(lock.force_release().unwrap());
        assert!(lock.read().unwrap().is_none());
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(999_999_999));
    }
}
