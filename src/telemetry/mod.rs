//! Execution telemetry: the append-only results log and the anomaly reporter.

mod log;
pub mod report;

pub use log::TelemetryLog;
pub use report::{
    detect_anomalies, signature_stats, Anomaly, AnomalyKind, AnomalyReport, Severity,
};

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Semantic task signature: a stable short hash of the work description,
/// used to spot the same logical task executing repeatedly.
pub fn task_signature(description: &str) -> String {
    let mut hasher = DefaultHasher::new();
    description.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
