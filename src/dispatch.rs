//! Queue dispatcher: counts eligible work and starts at most one session.
//!
//! The dispatcher never mutates entries. If it also claimed work, a
//! concurrently-starting session would see an empty queue and exit, silently
//! dropping the batch; counting stays read-only and claiming belongs to the
//! session executor alone.

use anyhow::Result;
use tracing::{debug, info};
use uuid::Uuid;

use crate::lock::{AcquireOutcome, LockManager};
use crate::store::QueueStore;

#[derive(Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing eligible; no lock was touched.
    NoWork,
    /// A session was launched fire-and-forget under the given holder token.
    Started { holder_id: String, eligible: usize },
    /// Another session holds the drain lock. Expected, not an error.
    AlreadyRunning { holder_id: String },
}

/// Seam for launching a session once the lock is held.
///
/// The production launcher spawns a detached `relay session` process which
/// adopts the lock by holder token; tests and `--foreground` run the
/// executor in-process instead.
pub trait SessionLauncher {
    fn launch(&self, holder_id: &str) -> Result<()>;
}

pub struct Dispatcher<'a> {
    queue: &'a QueueStore,
    lock: &'a LockManager,
}

impl<'a> Dispatcher<'a> {
    pub fn new(queue: &'a QueueStore, lock: &'a LockManager) -> Self {
        Self { queue, lock }
    }

    /// Read-only count of entries eligible for claiming.
    pub fn count_eligible(&self) -> Result<usize> {
        Ok(self.queue.count_queued()?)
    }

    /// If eligible work exists and no live session holds the lock, acquire
    /// it and launch a session without waiting for it.
    pub fn maybe_start_session(&self, launcher: &dyn SessionLauncher) -> Result<DispatchOutcome> {
        let eligible = self.count_eligible()?;
        if eligible == 0 {
            debug!("no eligible entries, skipping dispatch");
            return Ok(DispatchOutcome::NoWork);
        }

        let holder_id = Uuid::new_v4().to_string();
        match self.lock.try_acquire(&holder_id)? {
            AcquireOutcome::Held { holder_id } => {
                debug!(holder = %holder_id, "queue already draining");
                Ok(DispatchOutcome::AlreadyRunning { holder_id })
            }
            AcquireOutcome::Acquired => {
                info!(holder = %holder_id, eligible, "starting drain session");
                if let Err(e) = launcher.launch(&holder_id) {
                    // Failed launch must not leave the queue wedged.
                    self.lock.release(&holder_id)?;
                    return Err(e);
                }
                Ok(DispatchOutcome::Started {
                    holder_id,
                    eligible,
                })
            }
        }
    }
}

/// Launches a detached `relay session` subprocess that adopts the lock.
pub struct SpawnLauncher {
    base_dir: std::path::PathBuf,
}

impl SpawnLauncher {
    pub fn new(base_dir: std::path::PathBuf) -> Self {
        Self { base_dir }
    }
}

impl SessionLauncher for SpawnLauncher {
    fn launch(&self, holder_id: &str) -> Result<()> {
        use anyhow::Context;
        let exe = std::env::current_exe().context("Failed to resolve current executable")?;
        std::process::Command::new(exe)
            .arg("session")
            .arg("--holder")
            .arg(holder_id)
            .current_dir(&self.base_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .context("Failed to spawn session process")?;
        Ok(())
    }
}
