use anyhow::Result;
use colored::Colorize;

use super::{lock_manager, open_work_dir, session};
use crate::dispatch::{DispatchOutcome, Dispatcher, SessionLauncher, SpawnLauncher};
use crate::fs::{Config, WorkDir};
use crate::store::QueueStore;

/// Check for eligible work and start at most one session.
///
/// `foreground` drains in this process instead of spawning; `watch` polls
/// until interrupted.
pub fn execute(watch: bool, foreground: bool) -> Result<()> {
    let (work_dir, config) = open_work_dir()?;

    if watch {
        let interval = std::time::Duration::from_secs(config.dispatch_poll_secs.max(1));
        println!(
            "{} every {}s (ctrl-c to stop)",
            "Watching queue".bold(),
            interval.as_secs()
        );
        loop {
            dispatch_once(&work_dir, &config, foreground)?;
            std::thread::sleep(interval);
        }
    }

    dispatch_once(&work_dir, &config, foreground)
}

fn dispatch_once(work_dir: &WorkDir, config: &Config, foreground: bool) -> Result<()> {
    let queue = QueueStore::new(work_dir.queue_path());
    let lock = lock_manager(work_dir, config);
    let dispatcher = Dispatcher::new(&queue, &lock);

    let outcome = if foreground {
        let launcher = InlineLauncher {
            work_dir,
            config,
            lock: &lock,
        };
        dispatcher.maybe_start_session(&launcher)?
    } else {
        let launcher = SpawnLauncher::new(std::env::current_dir()?);
        dispatcher.maybe_start_session(&launcher)?
    };

    match outcome {
        DispatchOutcome::NoWork => println!("Nothing queued."),
        DispatchOutcome::Started {
            holder_id,
            eligible,
        } => println!(
            "{} session {holder_id} for {eligible} entries",
            "Started".green().bold()
        ),
        DispatchOutcome::AlreadyRunning { holder_id } => println!(
            "{} session {holder_id} is already draining",
            "Busy:".yellow().bold()
        ),
    }
    Ok(())
}

/// Drains in the dispatcher's own process. The lock needs no pid handoff,
/// so adoption is skipped.
struct InlineLauncher<'a> {
    work_dir: &'a WorkDir,
    config: &'a Config,
    lock: &'a crate::lock::LockManager,
}

impl SessionLauncher for InlineLauncher<'_> {
    fn launch(&self, holder_id: &str) -> Result<()> {
        let report = session::drain(self.work_dir, self.config, self.lock, holder_id, None)?;
        println!(
            "Drained {} entries ({} done, {} failed)",
            report.claimed, report.done, report.failed
        );
        Ok(())
    }
}
