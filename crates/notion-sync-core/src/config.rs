//! Publishing settings shared by the engine, client and scheduler.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds for the flush interval, in minutes.
pub const MIN_FLUSH_MINUTES: u64 = 1;
pub const MAX_FLUSH_MINUTES: u64 = 1440;

const DEFAULT_API_BASE_URL: &str = "https://api.notion.com";

/// Settings consumed by the sync core.
///
/// Every field has a default so partial settings files load cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncSettings {
    /// Notion integration token
    pub api_token: String,
    /// Database new pages are created in
    pub database_id: String,
    /// Optional cover image for new pages
    pub cover_url: String,
    /// Public site name used to rewrite page links (`{alias}.notion.site`)
    pub site_alias: String,
    /// Copy note tags into the page's Tags property
    pub sync_tags: bool,
    /// Write the page link into the note's frontmatter
    pub insert_link: bool,
    /// Vault-relative folder whose notes are published automatically
    pub folder: String,
    /// Minutes between flushes of pending changes
    pub flush_interval_minutes: u64,
    /// How much newer than `lastSyncTime` a file must be to count as stale
    pub stale_grace_secs: u64,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            database_id: String::new(),
            cover_url: String::new(),
            site_alias: String::new(),
            sync_tags: false,
            insert_link: false,
            folder: String::new(),
            flush_interval_minutes: 5,
            stale_grace_secs: 60,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl SyncSettings {
    /// Check that the settings are enough to talk to Notion.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.database_id.trim().is_empty() {
            return Err(ConfigError::MissingDatabase);
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidBaseUrl(self.api_base_url.clone()));
        }
        Ok(())
    }

    /// Flush interval, clamped to one minute .. one day.
    pub fn flush_interval(&self) -> Duration {
        let minutes = self
            .flush_interval_minutes
            .clamp(MIN_FLUSH_MINUTES, MAX_FLUSH_MINUTES);
        Duration::from_secs(minutes * 60)
    }

    pub fn stale_grace(&self) -> Duration {
        Duration::from_secs(self.stale_grace_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Cover URL, if one is configured.
    pub fn cover(&self) -> Option<&str> {
        Some(self.cover_url.trim()).filter(|url| !url.is_empty())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Notion API token is not set")]
    MissingToken,

    #[error("Notion database ID is not set")]
    MissingDatabase,

    #[error("API base URL must be http(s): {0}")]
    InvalidBaseUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> SyncSettings {
        SyncSettings {
            api_token: "secret".into(),
            database_id: "db".into(),
            ..SyncSettings::default()
        }
    }

    #[test]
    fn validate_requires_token_and_database() {
        assert!(matches!(
            SyncSettings::default().validate(),
            Err(ConfigError::MissingToken)
        ));

        let no_db = SyncSettings {
            api_token: "secret".into(),
            ..SyncSettings::default()
        };
        assert!(matches!(no_db.validate(), Err(ConfigError::MissingDatabase)));

        assert!(configured().validate().is_ok());
    }

    #[test]
    fn validate_rejects_odd_base_url() {
        let settings = SyncSettings {
            api_base_url: "ftp://example".into(),
            ..configured()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn flush_interval_is_clamped() {
        let mut settings = configured();

        settings.flush_interval_minutes = 0;
        assert_eq!(settings.flush_interval(), Duration::from_secs(60));

        settings.flush_interval_minutes = 10;
        assert_eq!(settings.flush_interval(), Duration::from_secs(600));

        settings.flush_interval_minutes = 100_000;
        assert_eq!(settings.flush_interval(), Duration::from_secs(1440 * 60));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let settings: SyncSettings =
            serde_json::from_str(r#"{ "apiToken": "t", "databaseId": "d", "syncTags": true }"#)
                .unwrap();
        assert_eq!(settings.api_token, "t");
        assert!(settings.sync_tags);
        assert_eq!(settings.flush_interval_minutes, 5);
        assert_eq!(settings.api_base_url, "https://api.notion.com");
    }

    #[test]
    fn blank_cover_is_none() {
        let mut settings = configured();
        assert_eq!(settings.cover(), None);
        settings.cover_url = " https://img ".into();
        assert_eq!(settings.cover(), Some("https://img"));
    }
}
