use anyhow::{bail, Context, Result};
use colored::Colorize;

use super::{lock_manager, open_work_dir};
use crate::executor::{CommandCapability, SessionExecutor, SessionReport};
use crate::fs::{Config, WorkDir};
use crate::store::QueueStore;
use crate::telemetry::TelemetryLog;

/// Run a drain session under an already-acquired lock.
///
/// Invoked by the dispatcher as a detached subprocess; the holder token was
/// stamped into the lock at acquisition and adoption restamps the pid to
/// this process.
pub fn execute(holder: String, batch: Option<String>) -> Result<()> {
    let (work_dir, config) = open_work_dir()?;

    let lock = lock_manager(&work_dir, &config);
    lock.adopt(&holder)?;

    let report = drain(&work_dir, &config, &lock, &holder, batch.as_deref())?;
    print_report(&report);
    Ok(())
}

/// Claim and process the queue with the configured capability, then release.
pub fn drain(
    work_dir: &WorkDir,
    config: &Config,
    lock: &crate::lock::LockManager,
    holder: &str,
    batch: Option<&str>,
) -> Result<SessionReport> {
    if config.capability_command.is_empty() {
        // The lock is already held; drop it before bailing so the queue does
        // not sit wedged until the staleness bound.
        lock.release(holder)?;
        bail!("capability_command is not set in config.toml");
    }

    let capability = CommandCapability::new(
        &config.capability_command,
        config.capability_args.clone(),
        config.item_timeout(),
    )
    .context("Failed to resolve capability command")?;

    let queue = QueueStore::new(work_dir.queue_path());
    let telemetry = TelemetryLog::new(work_dir.telemetry_path());
    telemetry.rotate_if_needed(
        config.telemetry_rotate_bytes,
        config.telemetry_keep_archives,
        &work_dir.archive_dir(),
    )?;

    let mut executor = SessionExecutor::new(&queue, &telemetry, lock, holder, capability);
    executor.run(batch)
}

fn print_report(report: &SessionReport) {
    println!("{}", "Session finished".bold());
    println!("  Claimed: {}", report.claimed);
    println!("  Done:    {}", report.done.to_string().green());
    if report.failed > 0 {
        println!("  Failed:  {}", report.failed.to_string().red());
    } else {
        println!("  Failed:  0");
    }
}
