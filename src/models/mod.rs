//! Domain models shared across the queue, sync, and telemetry subsystems.

pub mod queue;
pub mod sync;
pub mod telemetry;

pub use queue::{QueueEntry, TaskStatus};
pub use sync::{SyncEntry, SyncStatus};
pub use telemetry::TelemetryRecord;
