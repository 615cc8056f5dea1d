//! notion-sync-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod config;
pub mod native_fs;
pub mod notices;
pub mod watcher;

pub use config::{Cli, Command, SettingsArgs, expand_tilde, load_settings};
pub use native_fs::NativeFs;
pub use notices::{LogClipboard, log_notices};
pub use watcher::FileWatcher;
