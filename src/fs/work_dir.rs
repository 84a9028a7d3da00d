use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::Config;

/// The `.relay/` data directory.
///
/// Holds the two document stores, the session lock, the append-only
/// telemetry log, the automation engine's snapshot state, and the archive.
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            root: base_path.as_ref().join(".relay"),
        }
    }

    /// Create the directory structure and a default config.
    pub fn initialize(&self) -> Result<()> {
        if self.root.exists() {
            bail!(".relay directory already exists");
        }

        fs::create_dir_all(&self.root).context("Failed to create .relay directory")?;
        fs::create_dir(self.archive_dir()).context("Failed to create archive directory")?;

        Config::default().save(&self.config_path())?;
        self.create_readme()?;

        Ok(())
    }

    /// Verify the directory exists, creating missing subdirectories.
    pub fn load(&self) -> Result<()> {
        if !self.root.exists() {
            bail!(".relay directory does not exist. Run 'relay init' first.");
        }

        let archive = self.archive_dir();
        if !archive.exists() {
            fs::create_dir(&archive).context("Failed to create missing archive directory")?;
        }

        Ok(())
    }

    fn create_readme(&self) -> Result<()> {
        let readme_content = r#"# relay Data Directory

This directory is managed by relay CLI and contains:

- `queue.json` - Durable task queue
- `sync.json` - Document sync queue
- `telemetry.ndjson` - Append-only execution telemetry log
- `session.lock` - Drain-session exclusivity lock
- `engine_state.json` - Automation engine snapshot state
- `rules.json` - Automation rules
- `config.toml` - Operational configuration
- `archive/` - Archived terminal entries and rotated logs

Do not manually edit these files unless you know what you're doing.
"#;

        fs::write(self.root.join("README.md"), readme_content)
            .context("Failed to create README.md")?;
        Ok(())
    }

    pub fn queue_path(&self) -> PathBuf {
        self.root.join("queue.json")
    }

    pub fn sync_path(&self) -> PathBuf {
        self.root.join("sync.json")
    }

    pub fn telemetry_path(&self) -> PathBuf {
        self.root.join("telemetry.ndjson")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join("session.lock")
    }

    pub fn engine_state_path(&self) -> PathBuf {
        self.root.join("engine_state.json")
    }

    pub fn rules_path(&self) -> PathBuf {
        self.root.join("rules.json")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("archive")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load config.toml, falling back to defaults if it doesn't exist.
    pub fn load_config(&self) -> Result<Config> {
        Config::load(&self.config_path())
    }
}
