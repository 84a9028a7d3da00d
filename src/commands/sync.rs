use anyhow::{bail, Context, Result};
use colored::Colorize;
use uuid::Uuid;

use super::open_work_dir;
use crate::models::SyncEntry;
use crate::store::SyncStore;
use crate::sync::{process_pending, HttpLibrary, SyncOutcome};

/// Queue a document for synchronization.
pub fn add(
    title: String,
    file: String,
    collection: String,
    key: Option<String>,
) -> Result<()> {
    let (work_dir, _) = open_work_dir()?;
    let store = SyncStore::new(work_dir.sync_path());

    let key = key.unwrap_or_else(|| Uuid::new_v4().to_string());
    store
        .append(SyncEntry::new(&key, title, file, collection))
        .context("Failed to add sync entry")?;

    println!("{} sync entry {key}", "Queued".green().bold());
    println!("The engine picks it up on the next tick, or run 'relay sync run'.");
    Ok(())
}

/// Process every pending sync entry now.
pub fn run() -> Result<()> {
    let (work_dir, config) = open_work_dir()?;
    if config.remote.base_url.is_empty() {
        bail!("remote.base_url is not set in config.toml");
    }
    let remote = HttpLibrary::new(config.remote.base_url.as_str(), config.remote_token())?;
    let store = SyncStore::new(work_dir.sync_path());

    let content_root = std::env::current_dir()?;
    let outcomes = process_pending(&store, &remote, &content_root)?;
    if outcomes.is_empty() {
        println!("Nothing pending.");
        return Ok(());
    }

    for (key, outcome) in outcomes {
        match outcome {
            SyncOutcome::Created { remote_id } => {
                println!("{} {key} -> {remote_id}", "Created".green().bold())
            }
            SyncOutcome::Updated { remote_id } => {
                println!("{} {key} -> {remote_id}", "Updated".green().bold())
            }
            SyncOutcome::DuplicateAvoided { remote_id } => println!(
                "{} {key} already exists as {remote_id}",
                "Adopted:".yellow().bold()
            ),
            SyncOutcome::Failed { message } => {
                println!("{} {key}: {message}", "Failed".red().bold())
            }
        }
    }
    Ok(())
}

/// Return an errored sync entry to the pending pool.
pub fn requeue(key: String) -> Result<()> {
    let (work_dir, _) = open_work_dir()?;
    let store = SyncStore::new(work_dir.sync_path());

    store
        .requeue(&key)
        .with_context(|| format!("Failed to requeue sync entry {key}"))?;
    println!("{} sync entry {key}", "Requeued".green().bold());
    Ok(())
}

/// List sync entries and their statuses.
pub fn list() -> Result<()> {
    let (work_dir, _) = open_work_dir()?;
    let store = SyncStore::new(work_dir.sync_path());

    let entries = store.read_all()?;
    if entries.is_empty() {
        println!("No sync entries.");
        return Ok(());
    }

    println!("{}", "Sync Entries".bold());
    for (key, entry) in entries {
        let status = match entry.status {
            crate::models::SyncStatus::Error => entry.status.to_string().red().to_string(),
            crate::models::SyncStatus::Processed => {
                entry.status.to_string().green().to_string()
            }
            _ => entry.status.to_string(),
        };
        let remote = entry.remote_id.as_deref().unwrap_or("-");
        println!("  {key}  [{status}]  {} -> {remote}", entry.title);
        if let Some(error) = &entry.error {
            println!("    {}", error.red());
        }
    }
    Ok(())
}
