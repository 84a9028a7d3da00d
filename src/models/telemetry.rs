use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskStatus;

/// One row per completed queue entry, appended to the results log.
///
/// `setup_tokens` is the shared-context load cost. Within a batch it is
/// charged to the first processed entry only; later entries record zero, so
/// summing `tokens_in` over a batch never multiple-counts the shared setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub task_id: String,
    /// Semantic task signature, used for duplicate-work detection.
    pub signature: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub setup_tokens: u64,
    pub elapsed_ms: u64,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl TelemetryRecord {
    pub fn total_tokens(&self) -> u64 {
        self.tokens_in + self.tokens_out
    }

    /// Input/output ratio with a floor of 1 on the denominator.
    pub fn io_ratio(&self) -> f64 {
        self.tokens_in as f64 / self.tokens_out.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tokens_in: u64, tokens_out: u64) -> TelemetryRecord {
        TelemetryRecord {
            task_id: "t1".to_string(),
            signature: "sig".to_string(),
            tokens_in,
            tokens_out,
            setup_tokens: 0,
            elapsed_ms: 1000,
            status: TaskStatus::Done,
            error: None,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_io_ratio_floors_denominator() {
        assert_eq!(record(500, 0).io_ratio(), 500.0);
        assert_eq!(record(40_000, 1_000).io_ratio(), 40.0);
    }
}
