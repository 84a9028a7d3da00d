//! Integration tests for the full queue lifecycle: enqueue, dispatch,
//! drain, crash recovery.

use anyhow::Result;
use chrono::Utc;
use relay::dispatch::{DispatchOutcome, Dispatcher, SessionLauncher};
use relay::executor::{Capability, ExecutionOutput, SessionExecutor};
use relay::fs::WorkDir;
use relay::lock::{AcquireOutcome, LockManager, SessionLock};
use relay::models::{QueueEntry, TaskStatus};
use relay::store::{DocumentStore, QueueStore, StoreError};
use relay::telemetry::TelemetryLog;
use std::time::Duration;
use tempfile::TempDir;

struct EchoCapability;

impl Capability for EchoCapability {
    fn prepare(&mut self) -> Result<u64> {
        Ok(0)
    }

    fn execute(&mut self, description: &str) -> ExecutionOutput {
        ExecutionOutput {
            outcome: Ok(format!("echo: {description}")),
            tokens_in: 50,
            tokens_out: 20,
            elapsed_ms: 10_000,
        }
    }
}

struct Env {
    work_dir: WorkDir,
    queue: QueueStore,
    telemetry: TelemetryLog,
    lock: LockManager,
    _temp: TempDir,
}

fn env() -> Env {
    let temp = TempDir::new().unwrap();
    let work_dir = WorkDir::new(temp.path());
    work_dir.initialize().unwrap();
    let queue = QueueStore::new(work_dir.queue_path());
    let telemetry = TelemetryLog::new(work_dir.telemetry_path());
    let lock = LockManager::new(
        work_dir.lock_path(),
        Duration::from_secs(30 * 60),
        Duration::from_secs(60),
    );
    Env {
        work_dir,
        queue,
        telemetry,
        lock,
        _temp: temp,
    }
}

/// In-process launcher that drains the queue under the dispatcher's lock.
struct InlineExecutor<'a> {
    env: &'a Env,
}

impl SessionLauncher for InlineExecutor<'_> {
    fn launch(&self, holder_id: &str) -> Result<()> {
        let mut executor = SessionExecutor::new(
            &self.env.queue,
            &self.env.telemetry,
            &self.env.lock,
            holder_id,
            EchoCapability,
        );
        executor.run(None)?;
        Ok(())
    }
}

#[test]
fn test_enqueue_dispatch_drain_records_everything() {
    let env = env();
    env.queue.append(QueueEntry::new("t1", "first task")).unwrap();
    env.queue.append(QueueEntry::new("t2", "second task")).unwrap();

    let dispatcher = Dispatcher::new(&env.queue, &env.lock);
    let outcome = dispatcher
        .maybe_start_session(&InlineExecutor { env: &env })
        .unwrap();
    assert!(matches!(
        outcome,
        DispatchOutcome::Started { eligible: 2, .. }
    ));

    let entries = env.queue.read_all().unwrap();
    assert!(entries.values().all(|e| e.status == TaskStatus::Done));
    assert_eq!(
        entries.get("t1").unwrap().result.as_deref(),
        Some("echo: first task")
    );

    // Lock released, telemetry written, nothing left to dispatch.
    assert!(env.lock.read().unwrap().is_none());
    assert_eq!(env.telemetry.load().unwrap().len(), 2);
    let outcome = dispatcher
        .maybe_start_session(&InlineExecutor { env: &env })
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::NoWork);
}

#[test]
fn test_duplicate_enqueue_is_rejected_while_live() {
    let env = env();
    env.queue.append(QueueEntry::new("t1", "same work")).unwrap();

    let err = env
        .queue
        .append(QueueEntry::new("t2", "same work"))
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateDescription { .. }));

    // After the first one finishes, the same description is accepted again.
    let dispatcher = Dispatcher::new(&env.queue, &env.lock);
    dispatcher
        .maybe_start_session(&InlineExecutor { env: &env })
        .unwrap();
    env.queue.append(QueueEntry::new("t2", "same work")).unwrap();
}

#[test]
fn test_crashed_session_is_recoverable() {
    let env = env();
    env.queue.append(QueueEntry::new("t1", "doomed task")).unwrap();

    // Simulate a session that claimed work and died: entry stuck in
    // progress, lock held by a dead pid past the handoff grace.
    env.queue.claim_queued(None).unwrap();
    let lock_with_short_grace = LockManager::new(
        env.work_dir.lock_path(),
        Duration::from_secs(30 * 60),
        Duration::from_secs(0),
    );
    assert_eq!(
        lock_with_short_grace.try_acquire("dead-session").unwrap(),
        AcquireOutcome::Acquired
    );
    let stale = SessionLock {
        holder_id: "dead-session".to_string(),
        pid: 999_999_999,
        acquired_at: Utc::now() - chrono::Duration::seconds(10),
    };
    std::fs::write(
        env.work_dir.lock_path(),
        serde_json::to_string(&stale).unwrap(),
    )
    .unwrap();

    // Backdate the claim so the sweep sees it as stuck.
    let raw: DocumentStore<QueueEntry> = DocumentStore::new(env.work_dir.queue_path());
    raw.mutate(|map| {
        map.get_mut("t1").unwrap().started_at = Some(Utc::now() - chrono::Duration::hours(2));
        Ok(())
    })
    .unwrap();

    // Recovery: reset the stuck entry, then dispatch reclaims the stale lock.
    let reset = env.queue.reset_stuck(Duration::from_secs(30 * 60)).unwrap();
    assert_eq!(reset, vec!["t1".to_string()]);

    let dispatcher = Dispatcher::new(&env.queue, &lock_with_short_grace);
    let outcome = dispatcher
        .maybe_start_session(&InlineExecutor { env: &env })
        .unwrap();
    assert!(matches!(outcome, DispatchOutcome::Started { .. }));
    assert_eq!(
        env.queue.get("t1").unwrap().unwrap().status,
        TaskStatus::Done
    );
}

#[test]
fn test_batch_entries_share_setup_cost() {
    struct CostlyCapability;

    impl Capability for CostlyCapability {
        fn prepare(&mut self) -> Result<u64> {
            Ok(25_000)
        }

        fn execute(&mut self, description: &str) -> ExecutionOutput {
            ExecutionOutput {
                outcome: Ok(description.to_string()),
                tokens_in: 10,
                tokens_out: 10,
                elapsed_ms: 8_000,
            }
        }
    }

    let env = env();
    for id in ["m1", "m2", "m3"] {
        env.queue
            .append(QueueEntry::new(id, format!("migrate {id}")).with_batch("migration"))
            .unwrap();
    }

    env.lock.try_acquire("s1").unwrap();
    let mut executor = SessionExecutor::new(
        &env.queue,
        &env.telemetry,
        &env.lock,
        "s1",
        CostlyCapability,
    );
    let report = executor.run(Some("migration")).unwrap();
    assert_eq!(report.done, 3);

    let records = env.telemetry.load().unwrap();
    let total: u64 = records.iter().map(|r| r.tokens_in).sum();
    // One setup charge for the whole batch, not one per entry.
    assert_eq!(total, 25_000 + 3 * 10);
}

#[test]
fn test_interleaved_sessions_never_double_finalize() {
    let env = env();
    env.queue.append(QueueEntry::new("t1", "contested task")).unwrap();

    env.queue.claim_queued(None).unwrap();
    env.queue.complete("t1", "winner".to_string()).unwrap();

    // A slower session finishing the same entry loses cleanly.
    let err = env.queue.fail("t1", "loser".to_string()).unwrap_err();
    assert!(matches!(err, StoreError::StaleTransition { .. }));
    assert_eq!(
        env.queue.get("t1").unwrap().unwrap().result.as_deref(),
        Some("winner")
    );
}
