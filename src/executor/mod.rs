//! Session executor: one logical drain run under a held lock.
//!
//! State machine per invocation: Started -> Claiming -> Processing ->
//! Finalizing -> Released. Claiming is the first action and the only place
//! queued entries become in-flight; per-item failures never abort the rest
//! of the batch.

mod capability;

pub use capability::{Capability, CommandCapability, ExecutionOutput};

use anyhow::Result;
use chrono::Utc;
use std::collections::HashSet;
use tracing::{error, info};

use crate::lock::LockManager;
use crate::models::{TaskStatus, TelemetryRecord};
use crate::store::{QueueStore, StoreError};
use crate::telemetry::{task_signature, TelemetryLog};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub claimed: usize,
    pub done: usize,
    pub failed: usize,
}

pub struct SessionExecutor<'a, C: Capability> {
    queue: &'a QueueStore,
    telemetry: &'a TelemetryLog,
    lock: &'a LockManager,
    holder_id: String,
    capability: C,
}

impl<'a, C: Capability> SessionExecutor<'a, C> {
    pub fn new(
        queue: &'a QueueStore,
        telemetry: &'a TelemetryLog,
        lock: &'a LockManager,
        holder_id: impl Into<String>,
        capability: C,
    ) -> Self {
        Self {
            queue,
            telemetry,
            lock,
            holder_id: holder_id.into(),
            capability,
        }
    }

    /// Drain the queue: claim, process sequentially, finalize, release.
    ///
    /// The lock is released on every exit path; release is idempotent, so
    /// an outer crash-recovery release is also safe.
    pub fn run(&mut self, batch_id: Option<&str>) -> Result<SessionReport> {
        let result = self.drain(batch_id);
        self.lock.release(&self.holder_id)?;
        result
    }

    fn drain(&mut self, batch_id: Option<&str>) -> Result<SessionReport> {
        // Claiming: atomic, and the only queued -> in_progress site.
        let claimed = self.queue.claim_queued(batch_id)?;
        let mut report = SessionReport {
            claimed: claimed.len(),
            ..Default::default()
        };
        if claimed.is_empty() {
            info!(holder = %self.holder_id, "session found nothing to claim");
            return Ok(report);
        }
        info!(holder = %self.holder_id, count = claimed.len(), "session claimed entries");

        // Shared-context cost is charged once per batch, to the first entry
        // processed in it. The unbatched pool counts as one batch.
        let mut prepared_batches: HashSet<Option<String>> = HashSet::new();

        for entry in claimed {
            let batch_key = entry.batch_id.clone();
            let setup_tokens = if prepared_batches.insert(batch_key) {
                match self.capability.prepare() {
                    Ok(cost) => cost,
                    Err(e) => {
                        // Context load failed: this item fails, the session
                        // moves on. The next item of the batch retries.
                        prepared_batches.remove(&entry.batch_id);
                        self.finalize(
                            &entry.id,
                            &entry.description,
                            ExecutionOutput {
                                outcome: Err(format!("context load failed: {e:#}")),
                                tokens_in: 0,
                                tokens_out: 0,
                                elapsed_ms: 0,
                            },
                            0,
                        );
                        report.failed += 1;
                        continue;
                    }
                }
            } else {
                0
            };

            let output = self.capability.execute(&entry.description);
            match output.outcome {
                Ok(_) => report.done += 1,
                Err(_) => report.failed += 1,
            }
            self.finalize(&entry.id, &entry.description, output, setup_tokens);
        }

        info!(
            holder = %self.holder_id,
            done = report.done,
            failed = report.failed,
            "session finished"
        );
        Ok(report)
    }

    /// Write the terminal status and the telemetry record for one entry.
    ///
    /// A `StaleTransition` here means another actor already moved the entry;
    /// per the concurrency contract it is logged and dropped, not retried.
    fn finalize(
        &self,
        id: &str,
        description: &str,
        output: ExecutionOutput,
        setup_tokens: u64,
    ) {
        let (status, error) = match &output.outcome {
            Ok(_) => (TaskStatus::Done, None),
            Err(detail) => (TaskStatus::Error, Some(detail.clone())),
        };

        let write = match &output.outcome {
            Ok(result) => self.queue.complete(id, result.clone()),
            Err(detail) => self.queue.fail(id, detail.clone()),
        };
        match write {
            Ok(()) => {}
            Err(StoreError::StaleTransition {
                id,
                expected,
                actual,
            }) => {
                error!(%id, %expected, %actual, "dropping stale finalization");
                return;
            }
            Err(e) => {
                error!(%id, error = %e, "failed to finalize entry");
                return;
            }
        }

        let record = TelemetryRecord {
            task_id: id.to_string(),
            signature: task_signature(description),
            tokens_in: output.tokens_in + setup_tokens,
            tokens_out: output.tokens_out,
            setup_tokens,
            elapsed_ms: output.elapsed_ms,
            status,
            error,
            completed_at: Utc::now(),
        };
        if let Err(e) = self.telemetry.append(&record) {
            error!(%id, error = %e, "failed to append telemetry record");
        }
    }
}
