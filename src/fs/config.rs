use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Operational configuration, stored as `config.toml` in the data directory.
///
/// Thresholds here are operational policy, not contracts: the staleness bound
/// and timeouts are deliberately configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// A held lock older than this is reclaimable regardless of pid liveness.
    pub lock_stale_after_mins: u64,
    /// A lock whose pid is dead is reclaimable only after this grace period,
    /// covering the dispatcher-to-session handoff window.
    pub handoff_grace_secs: u64,
    /// Per-item execution timeout for the external capability.
    pub item_timeout_secs: u64,
    /// Automation engine tick interval.
    pub engine_poll_secs: u64,
    /// Dispatcher poll interval when watching the queue.
    pub dispatch_poll_secs: u64,
    /// In-progress entries older than this are considered stuck.
    pub stuck_after_mins: u64,
    /// Telemetry log rotation threshold in bytes.
    pub telemetry_rotate_bytes: u64,
    /// Rotated telemetry archives kept per log.
    pub telemetry_keep_archives: usize,
    /// External capability invoked once per claimed entry.
    pub capability_command: String,
    pub capability_args: Vec<String>,
    /// Remote document service used by sync actions.
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Token may also come from the RELAY_API_TOKEN environment variable,
    /// which takes precedence over this value.
    pub api_token: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_stale_after_mins: 30,
            handoff_grace_secs: 60,
            item_timeout_secs: 600,
            engine_poll_secs: 2,
            dispatch_poll_secs: 5,
            stuck_after_mins: 30,
            telemetry_rotate_bytes: 512 * 1024,
            telemetry_keep_archives: 5,
            capability_command: String::new(),
            capability_args: Vec::new(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Config {
    /// Load from a TOML file, falling back to defaults when absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_after_mins * 60)
    }

    pub fn handoff_grace(&self) -> Duration {
        Duration::from_secs(self.handoff_grace_secs)
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    pub fn stuck_after(&self) -> Duration {
        Duration::from_secs(self.stuck_after_mins * 60)
    }

    /// Resolve the remote API token, preferring the environment.
    pub fn remote_token(&self) -> String {
        std::env::var("RELAY_API_TOKEN").unwrap_or_else(|_| self.remote.api_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_file_missing() {
        let temp = TempDir::new().unwrap();
        let config = Config::load(&temp.path().join("config.toml")).unwrap();

        assert_eq!(config.lock_stale_after_mins, 30);
        assert_eq!(config.item_timeout_secs, 600);
    }

    #[test]
    fn test_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = Config::default();
        config.lock_stale_after_mins = 10;
        config.capability_command = "worker".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.lock_stale_after_mins, 10);
        assert_eq!(loaded.capability_command, "worker");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "stuck_after_mins = 5\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.stuck_after_mins, 5);
        assert_eq!(config.handoff_grace_secs, 60);
    }

    #[test]
    #[serial]
    fn test_remote_token_prefers_env() {
        let mut config = Config::default();
        config.remote.api_token = "from-file".to_string();

        std::env::set_var("RELAY_API_TOKEN", "from-env");
        assert_eq!(config.remote_token(), "from-env");

        std::env::remove_var("RELAY_API_TOKEN");
        assert_eq!(config.remote_token(), "from-file");
    }
}
