use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::models::TelemetryRecord;

/// Append-only ndjson results log, one line per completed entry.
pub struct TelemetryLog {
    path: PathBuf,
}

impl TelemetryLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &TelemetryRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let line = serde_json::to_string(record).context("Failed to serialize record")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("Failed to append to {}", self.path.display()))
    }

    /// Load all records, skipping lines that fail to parse (a line may be
    /// mid-write when the reader arrives).
    pub fn load(&self) -> Result<Vec<TelemetryRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    /// Rotate the log into `archive_dir` once it grows past `max_bytes`,
    /// keeping only the newest `keep` archives.
    pub fn rotate_if_needed(
        &self,
        max_bytes: u64,
        keep: usize,
        archive_dir: &Path,
    ) -> Result<bool> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(false),
        };
        if size <= max_bytes {
            return Ok(false);
        }

        fs::create_dir_all(archive_dir)
            .with_context(|| format!("Failed to create {}", archive_dir.display()))?;

        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("telemetry");
        let archive_name = format!("{stem}_{}.ndjson", Utc::now().format("%Y%m%d_%H%M%S"));
        let archive_path = archive_dir.join(&archive_name);
        fs::rename(&self.path, &archive_path)
            .with_context(|| format!("Failed to rotate to {}", archive_path.display()))?;
        info!(size, archive = %archive_path.display(), "rotated telemetry log");

        // Prune older archives beyond the keep count.
        let prefix = format!("{stem}_");
        let mut archives: Vec<PathBuf> = fs::read_dir(archive_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix) && n.ends_with(".ndjson"))
                    .unwrap_or(false)
            })
            .collect();
        archives.sort();
        archives.reverse();
        for old in archives.into_iter().skip(keep) {
            if let Err(e) = fs::remove_file(&old) {
                warn!(path = %old.display(), error = %e, "failed to prune old archive");
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;
    use tempfile::TempDir;

    fn record(task_id: &str) -> TelemetryRecord {
        TelemetryRecord {
            task_id: task_id.to_string(),
            signature: "sig".to_string(),
            tokens_in: 100,
            tokens_out: 50,
            setup_tokens: 0,
            elapsed_ms: 1200,
            status: TaskStatus::Done,
            error: None,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_append_and_load() {
        let temp = TempDir::new().unwrap();
        let log = TelemetryLog::new(temp.path().join("telemetry.ndjson"));

        log.append(&record("a")).unwrap();
        log.append(&record("b")).unwrap();

        let records = log.load().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].task_id, "a");
        assert_eq!(records[1].task_id, "b");
    }

    #[test]
    fn test_load_skips_corrupt_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("telemetry.ndjson");
        let log = TelemetryLog::new(&path);

        log.append(&record("a")).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();
        log.append(&record("b")).unwrap();

        let records = log.load().unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_rotation_keeps_newest_archives() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("telemetry.ndjson");
        let archive_dir = temp.path().join("archive");
        let log = TelemetryLog::new(&path);

        log.append(&record("a")).unwrap();
        assert!(log.rotate_if_needed(0, 5, &archive_dir).unwrap());
        assert!(!path.exists());

        let archived: Vec<_> = fs::read_dir(&archive_dir).unwrap().collect();
        assert_eq!(archived.len(), 1);

        // Below the threshold: no rotation.
        log.append(&record("b")).unwrap();
        assert!(!log
            .rotate_if_needed(1024 * 1024, 5, &archive_dir)
            .unwrap());
    }
}
