//! Command line and settings file handling.
//!
//! Settings come from an optional JSON file (`--config`), then flags and
//! environment variables on top.

use clap::{Args, Parser, Subcommand};
use notion_sync_core::SyncSettings;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "notion-sync")]
#[command(about = "Publish Obsidian notes to a Notion database")]
pub struct Cli {
    /// Path to the vault directory (supports ~)
    #[arg(short, long, env = "OBSIDIAN_VAULT_PATH", global = true, default_value = ".")]
    pub vault: String,

    /// JSON settings file; flags and environment variables override it
    #[arg(short, long, env = "NOTION_SYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: SettingsArgs,

    /// Enable verbose logging
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Watch the folder and publish changes on every flush interval
    Run,
    /// Publish one note now
    Push {
        /// Note path, relative to the vault
        file: String,
    },
}

/// Settings that can be given on the command line or in the environment.
#[derive(Args, Debug, Default)]
pub struct SettingsArgs {
    /// Notion integration token
    #[arg(long, env = "NOTION_API_TOKEN", global = true, hide_env_values = true)]
    pub api_token: Option<String>,

    /// Database new pages are created in
    #[arg(long, env = "NOTION_DATABASE_ID", global = true)]
    pub database_id: Option<String>,

    /// Cover image URL for new pages
    #[arg(long, env = "NOTION_COVER_URL", global = true)]
    pub cover_url: Option<String>,

    /// Public site name; page links become https://{alias}.notion.site/...
    #[arg(long, env = "NOTION_SITE_ALIAS", global = true)]
    pub site_alias: Option<String>,

    /// Copy note tags into the page's Tags property
    #[arg(long, env = "NOTION_SYNC_TAGS", global = true)]
    pub sync_tags: Option<bool>,

    /// Write the page link into the note's frontmatter
    #[arg(long, env = "NOTION_INSERT_LINK", global = true)]
    pub insert_link: Option<bool>,

    /// Vault-relative folder whose notes are published
    #[arg(long, env = "NOTION_SYNC_FOLDER", global = true)]
    pub folder: Option<String>,

    /// Minutes between flushes (1..=1440)
    #[arg(long, env = "NOTION_FLUSH_MINUTES", global = true)]
    pub flush_minutes: Option<u64>,

    /// Seconds a note may be newer than its last sync before the scan republishes it
    #[arg(long, env = "NOTION_STALE_GRACE_SECS", global = true)]
    pub stale_grace_secs: Option<u64>,

    #[arg(long, env = "NOTION_API_BASE_URL", global = true, hide = true)]
    pub api_base_url: Option<String>,
}

impl SettingsArgs {
    /// Overlay the values that were given.
    pub fn apply(&self, settings: &mut SyncSettings) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut settings.api_token, &self.api_token);
        set(&mut settings.database_id, &self.database_id);
        set(&mut settings.cover_url, &self.cover_url);
        set(&mut settings.site_alias, &self.site_alias);
        set(&mut settings.sync_tags, &self.sync_tags);
        set(&mut settings.insert_link, &self.insert_link);
        set(&mut settings.folder, &self.folder);
        set(&mut settings.flush_interval_minutes, &self.flush_minutes);
        set(&mut settings.stale_grace_secs, &self.stale_grace_secs);
        set(&mut settings.api_base_url, &self.api_base_url);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Could not read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Settings file (if any) with command line overrides applied.
pub fn load_settings(config: Option<&Path>, overrides: &SettingsArgs) -> Result<SyncSettings, LoadError> {
    let mut settings = match config {
        Some(path) => {
            let path = expand_tilde(&path.to_string_lossy());
            let raw = std::fs::read_to_string(&path).map_err(|source| LoadError::Read {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&raw).map_err(|source| LoadError::Parse { path, source })?
        }
        None => SyncSettings::default(),
    };
    overrides.apply(&mut settings);
    Ok(settings)
}

/// Expand ~ or ~/ prefix to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}
