//! SyncEngine: publishes one note to its remote page.
//!
//! A sync replaces the page rather than editing it:
//!
//! 1. Read the note and split its body into chunks
//! 2. Archive the page named by `remoteID`, if any (failure is logged, not fatal)
//! 3. Create a new page from the first chunk
//! 4. Append the remaining chunks in order, stopping at the first failure
//! 5. Re-read the note and stamp `remoteID`/`lastSyncTime` (and `remoteLink`)
//!
//! A failed create leaves the note untouched. A failed append still stamps
//! the note, since the partial page exists and must stay addressable, and
//! reports `SyncError::PartialSync`. If the stamp itself fails the new page
//! id is carried in `SyncError::Unstamped`.

use crate::blocks::markdown_to_blocks;
use crate::cache::{EchoFilter, MetadataCache};
use crate::chunk::{Chunk, Chunks, MAX_CHUNK_LEN};
use crate::client::{NetworkError, NewPage, PageClient, RemotePage};
use crate::config::SyncSettings;
use crate::events::{EventBus, SyncEvent};
use crate::frontmatter::{self, FrontmatterError, SyncStamp};
use crate::fs::{FileSystem, FsError};

use chrono::Local;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Could not access {path}: {source}")]
    Store {
        path: String,
        #[source]
        source: FsError,
    },

    #[error("Malformed frontmatter in {path}: {source}")]
    MalformedHeader {
        path: String,
        #[source]
        source: FrontmatterError,
    },

    #[error("Nothing to sync in {path}")]
    EmptyContent { path: String },

    #[error("Network error syncing {path}: {source}")]
    Network {
        path: String,
        #[source]
        source: NetworkError,
    },

    #[error("Page {remote_id} was created for {path} but the note could not be updated: {source}")]
    Unstamped {
        path: String,
        remote_id: String,
        url: String,
        #[source]
        source: Box<SyncError>,
    },

    #[error("Only {appended} of {total} chunks of {path} reached page {remote_id}: {source}")]
    PartialSync {
        path: String,
        remote_id: String,
        url: String,
        appended: usize,
        total: usize,
        #[source]
        source: NetworkError,
    },
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    fn store(path: &str, source: FsError) -> Self {
        SyncError::Store {
            path: path.to_string(),
            source,
        }
    }

    fn header(path: &str, source: FrontmatterError) -> Self {
        SyncError::MalformedHeader {
            path: path.to_string(),
            source,
        }
    }
}

#[derive(Debug, Error)]
#[error("Clipboard unavailable: {0}")]
pub struct ClipboardError(pub String);

/// Where the page link goes after a sync. Best effort.
pub trait Clipboard: Send + Sync {
    fn write_text(&self, text: &str) -> std::result::Result<(), ClipboardError>;
}

/// Clipboard for headless hosts.
pub struct NoClipboard;

impl Clipboard for NoClipboard {
    fn write_text(&self, _text: &str) -> std::result::Result<(), ClipboardError> {
        Err(ClipboardError("no clipboard on this host".to_string()))
    }
}

/// Everything the engine, tracker and scheduler share.
///
/// Created once at startup and handed around by `Arc`.
pub struct SyncContext<F: FileSystem, C: PageClient> {
    pub store: Arc<F>,
    pub client: C,
    pub settings: SyncSettings,
    pub cache: Arc<MetadataCache>,
    pub echoes: Arc<EchoFilter>,
    pub events: Arc<EventBus>,
    pub clipboard: Box<dyn Clipboard>,
}

impl<F: FileSystem, C: PageClient> SyncContext<F, C> {
    pub fn new(store: Arc<F>, client: C, settings: SyncSettings) -> Self {
        Self {
            store,
            client,
            settings,
            cache: Arc::new(MetadataCache::new()),
            echoes: Arc::new(EchoFilter::new()),
            events: Arc::new(EventBus::new()),
            clipboard: Box::new(NoClipboard),
        }
    }

    pub fn with_clipboard(mut self, clipboard: impl Clipboard + 'static) -> Self {
        self.clipboard = Box::new(clipboard);
        self
    }
}

/// A completed sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub path: String,
    pub remote_id: String,
    /// Link as shown to the user (site alias applied)
    pub url: String,
    pub chunks: usize,
}

pub struct SyncEngine<F: FileSystem, C: PageClient> {
    ctx: Arc<SyncContext<F, C>>,
    max_chunk_len: usize,
}

impl<F: FileSystem, C: PageClient> SyncEngine<F, C> {
    pub fn new(ctx: Arc<SyncContext<F, C>>) -> Self {
        Self {
            ctx,
            max_chunk_len: MAX_CHUNK_LEN,
        }
    }

    /// Override the chunk size limit.
    pub fn with_chunk_len(mut self, max_chunk_len: usize) -> Self {
        self.max_chunk_len = max_chunk_len;
        self
    }

    /// Publish the note at `path`, replacing its previous page.
    ///
    /// Emits a `SyncEvent` describing the outcome.
    pub async fn sync(&self, path: &str) -> Result<SyncReport> {
        let result = self.sync_note(path).await;

        let event = match &result {
            Ok(report) => {
                info!("Synced {} -> {}", path, report.url);
                SyncEvent::Synced {
                    path: path.to_string(),
                    remote_id: report.remote_id.clone(),
                    url: report.url.clone(),
                }
            }
            Err(SyncError::PartialSync {
                remote_id,
                appended,
                total,
                ..
            }) => {
                warn!(
                    "Partial sync of {}: {}/{} chunks, please retry",
                    path, appended, total
                );
                SyncEvent::PartialSync {
                    path: path.to_string(),
                    remote_id: remote_id.clone(),
                    appended: *appended,
                    total: *total,
                }
            }
            Err(e) => {
                warn!("Sync of {} failed: {}", path, e);
                SyncEvent::SyncFailed {
                    path: path.to_string(),
                    message: e.to_string(),
                }
            }
        };
        self.ctx.events.emit(event);

        result
    }

    async fn sync_note(&self, path: &str) -> Result<SyncReport> {
        let ctx = &self.ctx;
        let settings = &ctx.settings;

        let raw = ctx
            .store
            .read_text(path)
            .await
            .map_err(|e| SyncError::store(path, e))?;
        let parsed = frontmatter::parse(&raw).map_err(|e| SyncError::header(path, e))?;
        let previous_id = parsed.frontmatter.remote_id().map(str::to_string);

        let chunks: Vec<Chunk<'_>> = Chunks::new(parsed.body, self.max_chunk_len).collect();
        let Some((first, rest)) = chunks.split_first() else {
            return Err(SyncError::EmptyContent {
                path: path.to_string(),
            });
        };
        debug!("{} split into {} chunk(s)", path, chunks.len());

        if let Some(old_id) = &previous_id {
            // The old page may already be gone; a fresh page is created either way
            if let Err(e) = ctx.client.delete_page(old_id).await {
                warn!("Could not archive previous page {} of {}: {}", old_id, path, e);
            }
        }

        let page = ctx
            .client
            .create_page(NewPage {
                title: page_title(path),
                tags_enabled: settings.sync_tags,
                tags: if settings.sync_tags {
                    parsed.frontmatter.tags()
                } else {
                    Vec::new()
                },
                children: markdown_to_blocks(first.text),
                cover_url: settings.cover().map(str::to_string),
            })
            .await
            .map_err(|source| SyncError::Network {
                path: path.to_string(),
                source,
            })?;

        let mut appended = 1;
        let mut failure = None;
        for chunk in rest {
            match ctx
                .client
                .append_blocks(&page.id, markdown_to_blocks(chunk.text))
                .await
            {
                Ok(()) => appended += 1,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let url = match self.stamp_note(path, &page).await {
            Ok(url) => url,
            Err(e) => {
                warn!(
                    "Page {} for {} is not recorded in the note: {}",
                    page.id, path, e
                );
                return Err(SyncError::Unstamped {
                    path: path.to_string(),
                    remote_id: page.id,
                    url: page.url,
                    source: Box::new(e),
                });
            }
        };

        match failure {
            None => Ok(SyncReport {
                path: path.to_string(),
                remote_id: page.id,
                url,
                chunks: chunks.len(),
            }),
            Some(source) => Err(SyncError::PartialSync {
                path: path.to_string(),
                remote_id: page.id,
                url,
                appended,
                total: chunks.len(),
                source,
            }),
        }
    }

    /// Write the sync result into the note's frontmatter.
    ///
    /// Re-reads the note so edits made while uploading are kept.
    async fn stamp_note(&self, path: &str, page: &RemotePage) -> Result<String> {
        let ctx = &self.ctx;
        let settings = &ctx.settings;

        let raw = ctx
            .store
            .read_text(path)
            .await
            .map_err(|e| SyncError::store(path, e))?;
        let parsed = frontmatter::parse(&raw).map_err(|e| SyncError::header(path, e))?;

        let mut fm = parsed.frontmatter;
        let url = fm.set_sync_result(
            &SyncStamp {
                remote_id: &page.id,
                remote_url: &page.url,
                insert_link: settings.insert_link,
                site_alias: &settings.site_alias,
            },
            Local::now().naive_local(),
        );
        let updated = frontmatter::serialize(&fm, parsed.body)
            .map_err(|e| SyncError::header(path, e))?;

        ctx.echoes.mark(path, updated.as_bytes());
        ctx.store
            .write(path, updated.as_bytes())
            .await
            .map_err(|e| SyncError::store(path, e))?;
        ctx.cache.set_remote_id(path, &page.id);

        if let Err(e) = ctx.clipboard.write_text(&url) {
            debug!("Link for {} not copied: {}", path, e);
        }

        Ok(url)
    }
}

/// Page title for a note: its file name without extension.
pub fn page_title(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(path)
        .to_string()
}
