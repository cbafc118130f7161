//! Disk-backed persistence: the TOML config file and the attendance journal.

pub mod config;
pub mod journal;

pub use config::{load_config, resolve_data_dir, save_config, AppConfig, ConfigError};
pub use journal::FileJournal;
