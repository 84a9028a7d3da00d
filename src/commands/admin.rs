use anyhow::Result;
use colored::Colorize;
use std::time::Duration;

use super::{lock_manager, open_work_dir};
use crate::store::QueueStore;

/// Return in-progress entries older than the configured bound to queued,
/// and clear the session lock if its holder is gone.
pub fn reset_stuck() -> Result<()> {
    let (work_dir, config) = open_work_dir()?;
    let queue = QueueStore::new(work_dir.queue_path());

    let reset = queue.reset_stuck(config.stuck_after())?;
    if reset.is_empty() {
        println!("No stuck entries.");
    } else {
        println!("{} {} entries:", "Reset".green().bold(), reset.len());
        for id in reset {
            println!("  {id}");
        }
    }

    let lock = lock_manager(&work_dir, &config);
    if let Some(held) = lock.read()? {
        if lock.is_stale(&held) {
            lock.force_release()?;
            println!(
                "{} stale lock held by {}",
                "Released".yellow().bold(),
                held.holder_id
            );
        }
    }
    Ok(())
}

/// Move old terminal entries into the archive store.
pub fn archive(older_than_mins: u64) -> Result<()> {
    let (work_dir, _) = open_work_dir()?;
    let queue = QueueStore::new(work_dir.queue_path());

    let archive_path = work_dir.archive_dir().join("queue_archive.json");
    let count = queue.archive_terminal(Duration::from_secs(older_than_mins * 60), &archive_path)?;
    println!(
        "{} {count} entries to {}",
        "Archived".green().bold(),
        archive_path.display()
    );
    Ok(())
}

/// Operator escape hatch: remove the session lock regardless of holder.
pub fn force_release_lock() -> Result<()> {
    let (work_dir, config) = open_work_dir()?;
    let lock = lock_manager(&work_dir, &config);

    if lock.force_release()? {
        println!("{} session lock", "Released".yellow().bold());
        println!("Make sure no session is actually running before dispatching again.");
    } else {
        println!("No lock held.");
    }
    Ok(())
}
