//! Anomaly detection over execution telemetry.
//!
//! A pure function over the records list: no side effects, identical output
//! for identical input. Thresholds follow the operational rules the system
//! was tuned with; they flag patterns for operator review, they do not block
//! anything.

use chrono::Duration as ChronoDuration;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::models::{TaskStatus, TelemetryRecord};

/// Input/output ratio above which a task is dragging excess context.
const CONTEXT_BLOAT_RATIO: f64 = 15.0;
/// Total tokens above which a single task counts as expensive.
const EXPENSIVE_TOTAL_TOKENS: u64 = 10_000;
/// Window within which a repeated signature counts as duplicate work.
const DUPLICATE_WINDOW_MINS: i64 = 60;
/// Fast-but-heavy thresholds for the inefficiency rule.
const INEFFICIENT_MAX_ELAPSED_MS: u64 = 5_000;
const INEFFICIENT_MIN_TOKENS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    ContextBloat,
    ExpensiveTask,
    DuplicateWork,
    FalseCompletion,
    InefficientShortTask,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalyKind::ContextBloat => write!(f, "context_bloat"),
            AnomalyKind::ExpensiveTask => write!(f, "expensive_task"),
            AnomalyKind::DuplicateWork => write!(f, "duplicate_work"),
            AnomalyKind::FalseCompletion => write!(f, "false_completion"),
            AnomalyKind::InefficientShortTask => write!(f, "inefficient_short_task"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
            Severity::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub task_id: String,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub tokens_wasted: u64,
    pub details: String,
    pub suggestion: String,
}

/// Detect anomalies across the record list. Pure and deterministic.
pub fn detect_anomalies(records: &[TelemetryRecord]) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    for record in records {
        let total = record.total_tokens();
        let ratio = record.io_ratio();

        if record.tokens_out > 0 && ratio > CONTEXT_BLOAT_RATIO {
            anomalies.push(Anomaly {
                task_id: record.task_id.clone(),
                kind: AnomalyKind::ContextBloat,
                severity: Severity::High,
                tokens_wasted: record.tokens_in.saturating_sub(record.tokens_out * 10),
                details: format!("Input/output ratio {ratio:.1}:1 (expected <15:1)"),
                suggestion: "Trim context loaded into the task description".to_string(),
            });
        }

        if total > EXPENSIVE_TOTAL_TOKENS {
            anomalies.push(Anomaly {
                task_id: record.task_id.clone(),
                kind: AnomalyKind::ExpensiveTask,
                severity: Severity::Medium,
                tokens_wasted: total - EXPENSIVE_TOTAL_TOKENS,
                details: format!("Task used {total} tokens (threshold: 10K)"),
                suggestion: "Break the task into smaller entries or batch shared setup"
                    .to_string(),
            });
        }

        if record.status == TaskStatus::Done
            && record.error.as_deref().is_some_and(|e| !e.is_empty())
        {
            anomalies.push(Anomaly {
                task_id: record.task_id.clone(),
                kind: AnomalyKind::FalseCompletion,
                severity: Severity::High,
                tokens_wasted: total,
                details: format!(
                    "Marked done but carries an error: {}",
                    record.error.as_deref().unwrap_or_default()
                ),
                suggestion: "Review finalization logic for this task".to_string(),
            });
        }

        if record.elapsed_ms > 0
            && record.elapsed_ms < INEFFICIENT_MAX_ELAPSED_MS
            && total > INEFFICIENT_MIN_TOKENS
        {
            anomalies.push(Anomaly {
                task_id: record.task_id.clone(),
                kind: AnomalyKind::InefficientShortTask,
                severity: Severity::Low,
                tokens_wasted: total.saturating_sub(2_000),
                details: format!(
                    "Finished in {:.1}s but used {total} tokens",
                    record.elapsed_ms as f64 / 1000.0
                ),
                suggestion: "Likely loading unnecessary context for a simple operation"
                    .to_string(),
            });
        }
    }

    anomalies.extend(detect_duplicates(records));
    anomalies
}

/// One duplicate-work anomaly per signature executed more than once within
/// the window.
fn detect_duplicates(records: &[TelemetryRecord]) -> Vec<Anomaly> {
    let mut by_signature: BTreeMap<&str, Vec<&TelemetryRecord>> = BTreeMap::new();
    for record in records {
        by_signature.entry(&record.signature).or_default().push(record);
    }

    let window = ChronoDuration::minutes(DUPLICATE_WINDOW_MINS);
    let mut anomalies = Vec::new();
    for (signature, mut group) in by_signature {
        if group.len() < 2 {
            continue;
        }
        group.sort_by_key(|r| r.completed_at);
        for i in 0..group.len() - 1 {
            if group[i + 1].completed_at - group[i].completed_at < window {
                let wasted: u64 = group[i..].iter().map(|r| r.total_tokens()).sum();
                anomalies.push(Anomaly {
                    task_id: group[i + 1].task_id.clone(),
                    kind: AnomalyKind::DuplicateWork,
                    severity: Severity::Medium,
                    tokens_wasted: wasted,
                    details: format!(
                        "Signature {signature} executed {} times within an hour",
                        group.len() - i
                    ),
                    suggestion: "Check for producer retries or duplicate assignments"
                        .to_string(),
                });
                break;
            }
        }
    }
    anomalies
}

/// Aggregate per-signature execution statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SignatureStats {
    pub executions: usize,
    pub total_tokens: u64,
    pub avg_tokens: u64,
    pub success_rate: f64,
}

pub fn signature_stats(records: &[TelemetryRecord]) -> BTreeMap<String, SignatureStats> {
    let mut stats: BTreeMap<String, (usize, u64, usize)> = BTreeMap::new();
    for record in records {
        let entry = stats.entry(record.signature.clone()).or_insert((0, 0, 0));
        entry.0 += 1;
        entry.1 += record.total_tokens();
        if record.status == TaskStatus::Done && record.error.is_none() {
            entry.2 += 1;
        }
    }
    stats
        .into_iter()
        .map(|(sig, (executions, total_tokens, successes))| {
            (
                sig,
                SignatureStats {
                    executions,
                    total_tokens,
                    avg_tokens: total_tokens / executions as u64,
                    success_rate: successes as f64 / executions as f64,
                },
            )
        })
        .collect()
}

/// A deterministic report over one immutable record list.
#[derive(Debug, Serialize)]
pub struct AnomalyReport {
    pub total_records: usize,
    pub total_tokens: u64,
    pub total_tokens_wasted: u64,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
    pub anomalies: Vec<Anomaly>,
}

impl AnomalyReport {
    pub fn build(records: &[TelemetryRecord]) -> Self {
        let anomalies = detect_anomalies(records);
        Self {
            total_records: records.len(),
            total_tokens: records.iter().map(|r| r.total_tokens()).sum(),
            total_tokens_wasted: anomalies.iter().map(|a| a.tokens_wasted).sum(),
            high_count: anomalies.iter().filter(|a| a.severity == Severity::High).count(),
            medium_count: anomalies
                .iter()
                .filter(|a| a.severity == Severity::Medium)
                .count(),
            low_count: anomalies.iter().filter(|a| a.severity == Severity::Low).count(),
            anomalies,
        }
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Telemetry Report");
        let _ = writeln!(out);
        let _ = writeln!(out, "- **Records:** {}", self.total_records);
        let _ = writeln!(out, "- **Total Tokens:** {}", self.total_tokens);
        let _ = writeln!(out, "- **Anomalies:** {}", self.anomalies.len());
        let _ = writeln!(out, "- **Tokens Wasted:** {}", self.total_tokens_wasted);
        let _ = writeln!(
            out,
            "- **Severity:** {} high / {} medium / {} low",
            self.high_count, self.medium_count, self.low_count
        );

        for severity in [Severity::High, Severity::Medium, Severity::Low] {
            let group: Vec<&Anomaly> =
                self.anomalies.iter().filter(|a| a.severity == severity).collect();
            if group.is_empty() {
                continue;
            }
            let _ = writeln!(out);
            let _ = writeln!(out, "## {severity} severity");
            for anomaly in group {
                let _ = writeln!(out);
                let _ = writeln!(out, "**{}** - {}", anomaly.task_id, anomaly.kind);
                let _ = writeln!(out, "- **Issue:** {}", anomaly.details);
                let _ = writeln!(out, "- **Tokens Wasted:** {}", anomaly.tokens_wasted);
                let _ = writeln!(out, "- **Suggestion:** {}", anomaly.suggestion);
            }
        }
        out
    }
}
