use anyhow::Result;
use colored::Colorize;

use super::{lock_manager, open_work_dir};
use crate::lock::is_process_alive;
use crate::models::{SyncStatus, TaskStatus};
use crate::store::{QueueStore, SyncStore};
use crate::telemetry::TelemetryLog;

/// Show the queue, sync, lock, and telemetry dashboard.
pub fn execute() -> Result<()> {
    let (work_dir, config) = open_work_dir()?;

    println!("{}", "Relay Status".bold().blue());
    println!("{}", "=".repeat(50));

    let queue = QueueStore::new(work_dir.queue_path());
    let entries = queue.read_all()?;
    let count = |status: TaskStatus| entries.values().filter(|e| e.status == status).count();

    println!("\n{}", "Queue".bold());
    println!("  Queued:      {}", count(TaskStatus::Queued));
    println!("  In progress: {}", count(TaskStatus::InProgress));
    println!("  Done:        {}", count(TaskStatus::Done));
    let errors = count(TaskStatus::Error);
    if errors > 0 {
        println!("  Errors:      {}", errors.to_string().red());
    } else {
        println!("  Errors:      0");
    }

    let sync = SyncStore::new(work_dir.sync_path());
    let sync_entries = sync.read_all()?;
    let pending = sync_entries.values().filter(|e| e.status.is_pending()).count();
    let sync_errors = sync_entries
        .values()
        .filter(|e| e.status == SyncStatus::Error)
        .count();
    println!("\n{}", "Document Sync".bold());
    println!("  Entries: {}", sync_entries.len());
    println!("  Pending: {pending}");
    if sync_errors > 0 {
        println!("  Errors:  {}", sync_errors.to_string().red());
    }

    println!("\n{}", "Session Lock".bold());
    match lock_manager(&work_dir, &config).read()? {
        Some(lock) => {
            let liveness = if is_process_alive(lock.pid) {
                "alive".green()
            } else {
                "dead".red()
            };
            println!("  Holder:   {}", lock.holder_id);
            println!("  Pid:      {} ({liveness})", lock.pid);
            println!("  Acquired: {}", lock.acquired_at);
        }
        None => println!("  {}", "free".green()),
    }

    let telemetry = TelemetryLog::new(work_dir.telemetry_path());
    println!("\n{}", "Telemetry".bold());
    println!("  Records: {}", telemetry.load()?.len());

    println!();
    Ok(())
}
