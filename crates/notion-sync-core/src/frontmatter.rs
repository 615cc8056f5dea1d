//! YAML frontmatter parsing and sync bookkeeping for notes.
//!
//! Parses the YAML frontmatter block at the start of markdown files:
//! ```markdown
//! ---
//! title: My Note
//! tags: [rust, notion]
//! remoteID: 0f6c...
//! lastSyncTime: 2024-05-01 09:30:00
//! ---
//! Note content here...
//! ```
//!
//! Keys are kept in file order so that rewriting the sync fields leaves the
//! user's own fields exactly where they were.

use chrono::NaiveDateTime;
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use url::Url;

/// Identity of the remote page bound to this note.
pub const REMOTE_ID_KEY: &str = "remoteID";
/// Local wall-clock time of the last successful sync.
pub const LAST_SYNC_TIME_KEY: &str = "lastSyncTime";
/// Shareable page URL, only written when link insertion is enabled.
pub const REMOTE_LINK_KEY: &str = "remoteLink";
/// User-maintained tags, read for the page's Tags property.
pub const TAGS_KEY: &str = "tags";

/// Format of `lastSyncTime` values.
pub const SYNC_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Host Notion hands out for private page URLs.
const DEFAULT_PAGE_HOST: &str = "www.notion.so";
/// Domain of public Notion sites (`{alias}.notion.site`).
const PUBLIC_SITE_DOMAIN: &str = "notion.site";

#[derive(Debug, Error)]
pub enum FrontmatterError {
    #[error("Malformed frontmatter: {0}")]
    Malformed(String),

    #[error("Failed to serialize frontmatter: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, FrontmatterError>;

/// Ordered frontmatter fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frontmatter {
    fields: Mapping,
}

/// A note split into frontmatter and body.
///
/// The `body` borrows from the raw text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNote<'a> {
    /// Frontmatter fields (empty if the note has no header)
    pub frontmatter: Frontmatter,
    /// Everything after the closing delimiter line
    pub body: &'a str,
}

/// What a successful (or partial) sync writes back into the note.
#[derive(Debug, Clone)]
pub struct SyncStamp<'a> {
    pub remote_id: &'a str,
    pub remote_url: &'a str,
    /// Also store the URL under `remoteLink`
    pub insert_link: bool,
    /// Public site name; empty means keep the private URL
    pub site_alias: &'a str,
}

/// Split a note into frontmatter YAML string and body, without parsing the YAML.
///
/// Returns `(None, raw)` when the note does not open with a `---` line or the
/// block is never closed.
pub fn split_frontmatter(raw: &str) -> (Option<&str>, &str) {
    let Some(after_opening) = raw.strip_prefix("---") else {
        return (None, raw);
    };

    let content_start = if let Some(rest) = after_opening.strip_prefix('\n') {
        rest
    } else if let Some(rest) = after_opening.strip_prefix("\r\n") {
        rest
    } else {
        // "----" or "--- text" is a rule or prose, not a header
        return (None, raw);
    };

    let Some(close_pos) = find_closing_delimiter(content_start) else {
        return (None, raw);
    };

    let yaml = &content_start[..close_pos];
    let after_close = &content_start[close_pos + 3..];
    let body = after_close
        .strip_prefix("\r\n")
        .or_else(|| after_close.strip_prefix('\n'))
        .unwrap_or(after_close);

    (Some(yaml), body)
}

/// Byte offset of the closing `---` line, if any.
fn find_closing_delimiter(s: &str) -> Option<usize> {
    let mut pos = 0;
    for line in s.split_inclusive('\n') {
        let trimmed = line.trim_end_matches('\n').trim_end_matches('\r');
        if trimmed == "---" {
            return Some(pos);
        }
        pos += line.len();
    }
    None
}

/// Parse a note into frontmatter fields and body.
///
/// A note without a header parses to empty fields. A header that is present
/// but is not a YAML mapping is an error.
pub fn parse(raw: &str) -> Result<ParsedNote<'_>> {
    let (yaml, body) = split_frontmatter(raw);

    let frontmatter = match yaml {
        None => Frontmatter::default(),
        Some(yaml) if yaml.trim().is_empty() => Frontmatter::default(),
        Some(yaml) => match serde_yaml::from_str::<Value>(yaml) {
            Ok(Value::Mapping(fields)) => Frontmatter { fields },
            Ok(Value::Null) => Frontmatter::default(),
            Ok(other) => {
                return Err(FrontmatterError::Malformed(format!(
                    "expected key/value pairs, found {}",
                    describe(&other)
                )));
            }
            Err(e) => return Err(FrontmatterError::Malformed(e.to_string())),
        },
    };

    Ok(ParsedNote { frontmatter, body })
}

/// Re-emit a note from its frontmatter and body.
///
/// Empty frontmatter produces just the body. Otherwise the header is written
/// as `---\n<yaml>---\n` directly followed by the body, so parsing and
/// serializing an unchanged note keeps its body byte-for-byte.
pub fn serialize(frontmatter: &Frontmatter, body: &str) -> Result<String> {
    if frontmatter.is_empty() {
        return Ok(body.to_string());
    }

    let yaml = serde_yaml::to_string(&frontmatter.fields)?;
    Ok(format!("---\n{}---\n{}", yaml, body))
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

impl Frontmatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// String value of a field; numbers and booleans are not coerced.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Insert or overwrite a field. Existing keys keep their position.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(Value::String(key.to_string()), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// Keys in file order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().filter_map(Value::as_str)
    }

    /// The bound remote page, if one has been assigned.
    pub fn remote_id(&self) -> Option<&str> {
        self.get_str(REMOTE_ID_KEY).filter(|id| !id.trim().is_empty())
    }

    pub fn set_remote_id(&mut self, remote_id: &str) {
        self.set(REMOTE_ID_KEY, remote_id);
    }

    /// When the note was last synced. Unparsable stamps read as never.
    pub fn last_sync_time(&self) -> Option<NaiveDateTime> {
        let raw = self.get_str(LAST_SYNC_TIME_KEY)?;
        NaiveDateTime::parse_from_str(raw.trim(), SYNC_TIME_FORMAT).ok()
    }

    /// Tags as plain names.
    ///
    /// Accepts a YAML list or a single comma/space separated string; leading
    /// `#` is dropped.
    pub fn tags(&self) -> Vec<String> {
        let raw: Vec<String> = match self.get(TAGS_KEY) {
            Some(Value::Sequence(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    Value::Bool(b) => Some(b.to_string()),
                    _ => None,
                })
                .collect(),
            Some(Value::String(s)) => s
                .split(|c: char| c == ',' || c.is_whitespace())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        raw.into_iter()
            .map(|tag| tag.trim().trim_start_matches('#').to_string())
            .filter(|tag| !tag.is_empty())
            .collect()
    }

    /// Record a sync outcome: identity, optional link, and timestamp.
    ///
    /// Returns the URL as presented to the user (after site alias rewriting).
    pub fn set_sync_result(&mut self, stamp: &SyncStamp<'_>, synced_at: NaiveDateTime) -> String {
        let url = if stamp.site_alias.trim().is_empty() {
            stamp.remote_url.to_string()
        } else {
            rewrite_site_alias(stamp.remote_url, stamp.site_alias.trim())
        };

        self.set_remote_id(stamp.remote_id);
        if stamp.insert_link {
            self.set(REMOTE_LINK_KEY, url.as_str());
        }
        self.set(
            LAST_SYNC_TIME_KEY,
            synced_at.format(SYNC_TIME_FORMAT).to_string(),
        );

        url
    }
}

/// Point a private page URL at the workspace's public site.
///
/// `https://www.notion.so/Page-abc` becomes `https://{alias}.notion.site/Page-abc`.
/// URLs on any other host are returned unchanged.
pub fn rewrite_site_alias(remote_url: &str, alias: &str) -> String {
    let Ok(mut url) = Url::parse(remote_url) else {
        return remote_url.to_string();
    };
    if url.host_str() != Some(DEFAULT_PAGE_HOST) {
        return remote_url.to_string();
    }

    let host = format!("{}.{}", alias, PUBLIC_SITE_DOMAIN);
    match url.set_host(Some(&host)) {
        Ok(()) => url.to_string(),
        Err(_) => remote_url.to_string(),
    }
}
