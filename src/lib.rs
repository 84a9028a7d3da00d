pub mod commands;
pub mod dispatch;
pub mod engine;
pub mod executor;
pub mod fs;
pub mod lock;
pub mod models;
pub mod store;
pub mod sync;
pub mod telemetry;
