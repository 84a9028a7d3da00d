//! Filesystem layout and configuration for the `.relay/` data directory.

mod config;
mod work_dir;

pub use config::{Config, RemoteConfig};
pub use work_dir::WorkDir;
