use anyhow::{Context, Result};
use colored::Colorize;
use uuid::Uuid;

use super::open_work_dir;
use crate::models::QueueEntry;
use crate::store::{QueueStore, StoreError};

/// Append a new entry to the queue.
pub fn enqueue(description: String, batch: Option<String>, id: Option<String>) -> Result<()> {
    let (work_dir, _) = open_work_dir()?;
    let queue = QueueStore::new(work_dir.queue_path());

    let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut entry = QueueEntry::new(&id, description);
    if let Some(batch) = batch {
        entry = entry.with_batch(batch);
    }

    match queue.append(entry) {
        Ok(()) => {
            println!("{} entry {id}", "Queued".green().bold());
            println!("Run 'relay dispatch' to start a session.");
            Ok(())
        }
        Err(StoreError::DuplicateDescription { existing_id }) => {
            println!(
                "{} identical work is already live as entry {existing_id}",
                "Skipped:".yellow().bold()
            );
            Ok(())
        }
        Err(e) => Err(e).context("Failed to enqueue entry"),
    }
}

/// Cancel a live entry.
pub fn cancel(id: String) -> Result<()> {
    let (work_dir, _) = open_work_dir()?;
    let queue = QueueStore::new(work_dir.queue_path());

    let previous = queue
        .cancel(&id)
        .with_context(|| format!("Failed to cancel entry {id}"))?;
    println!(
        "{} entry {id} (was {previous})",
        "Cancelled".yellow().bold()
    );
    Ok(())
}

/// Return a failed or in-flight entry to the queue.
pub fn reset(id: String) -> Result<()> {
    let (work_dir, _) = open_work_dir()?;
    let queue = QueueStore::new(work_dir.queue_path());

    queue
        .reset(&id)
        .with_context(|| format!("Failed to reset entry {id}"))?;
    println!("{} entry {id} back to queued", "Reset".green().bold());
    Ok(())
}

/// Show one entry's full record.
pub fn show(id: String) -> Result<()> {
    let (work_dir, _) = open_work_dir()?;
    let queue = QueueStore::new(work_dir.queue_path());

    let entry = queue
        .get(&id)?
        .with_context(|| format!("No entry with id {id}"))?;

    println!("{}", format!("Entry {id}").bold());
    println!("  Status:      {}", entry.status);
    println!("  Description: {}", entry.description);
    if let Some(batch) = &entry.batch_id {
        println!("  Batch:       {batch}");
    }
    println!("  Created:     {}", entry.created_at);
    if let Some(started) = entry.started_at {
        println!("  Started:     {started}");
    }
    if let Some(completed) = entry.completed_at {
        println!("  Completed:   {completed}");
    }
    if let Some(result) = &entry.result {
        println!("  Result:      {result}");
    }
    if let Some(error) = &entry.error {
        println!("  Error:       {}", error.red());
    }
    Ok(())
}
