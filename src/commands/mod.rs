pub mod admin;
pub mod dispatch;
pub mod engine;
pub mod init;
pub mod queue;
pub mod report;
pub mod session;
pub mod status;
pub mod sync;

use anyhow::Result;

use crate::fs::{Config, WorkDir};
use crate::lock::LockManager;

/// Open the data directory in the current working directory, failing with
/// guidance if it was never initialized.
fn open_work_dir() -> Result<(WorkDir, Config)> {
    let work_dir = WorkDir::new(".");
    work_dir.load()?;
    let config = work_dir.load_config()?;
    Ok((work_dir, config))
}

fn lock_manager(work_dir: &WorkDir, config: &Config) -> LockManager {
    LockManager::new(
        work_dir.lock_path(),
        config.lock_stale_after(),
        config.handoff_grace(),
    )
}
