use anyhow::Result;
use colored::Colorize;

use crate::fs::WorkDir;

/// Create the `.relay/` data directory in the current directory.
pub fn execute() -> Result<()> {
    let work_dir = WorkDir::new(".");
    work_dir.initialize()?;

    println!("{} .relay directory", "Created".green().bold());
    println!("  Config: {}", work_dir.config_path().display());
    println!();
    println!("Next steps:");
    println!("  1. Set capability_command in config.toml to your worker");
    println!("  2. Set remote.base_url (and RELAY_API_TOKEN) for document sync");
    println!("  3. relay enqueue \"your first task\"");

    Ok(())
}
