//! ChangeTracker: pending note changes keyed by remote identity.
//!
//! Watcher events are recorded as they arrive; the scheduler drains the
//! whole map on each tick. Bursts of events for one note collapse into the
//! latest one.
//!
//! Notes without a `remoteID` get one minted and written into their
//! frontmatter on first sight, so every later event for that note lands on
//! the same key.

use crate::cache::{EchoFilter, MetadataCache};
use crate::engine::{Result, SyncError};
use crate::frontmatter;
use crate::fs::{FileSystem, FsError};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

/// What caused a note to be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    Create,
    Modify,
    Rename,
    Delete,
}

/// A change reported by the document event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Vault-relative path of the note
    pub path: String,
    pub kind: FileEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
    /// Moved from `from` to the event's path
    Renamed { from: String },
    Deleted,
}

impl FileEvent {
    pub fn new(path: impl Into<String>, kind: FileEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn trigger(&self) -> TriggerKind {
        match self.kind {
            FileEventKind::Created => TriggerKind::Create,
            FileEventKind::Modified => TriggerKind::Modify,
            FileEventKind::Renamed { .. } => TriggerKind::Rename,
            FileEventKind::Deleted => TriggerKind::Delete,
        }
    }
}

/// One queued unit of work for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub path: String,
    pub trigger: TriggerKind,
    pub remote_id: String,
}

pub struct ChangeTracker<F: FileSystem> {
    store: Arc<F>,
    cache: Arc<MetadataCache>,
    echoes: Arc<EchoFilter>,
    pending: Mutex<HashMap<String, PendingChange>>,
    /// Serializes read-mint-write of `remoteID` across concurrent records
    identity: tokio::sync::Mutex<()>,
}

impl<F: FileSystem> ChangeTracker<F> {
    pub fn new(store: Arc<F>, cache: Arc<MetadataCache>, echoes: Arc<EchoFilter>) -> Self {
        Self {
            store,
            cache,
            echoes,
            pending: Mutex::new(HashMap::new()),
            identity: tokio::sync::Mutex::new(()),
        }
    }

    /// Queue the change described by `event`.
    ///
    /// Returns the key it was recorded under, or `None` when the event was
    /// dropped: our own write, a note that is already gone, or a delete of a
    /// note that was never synced.
    pub async fn record(&self, event: FileEvent) -> Result<Option<String>> {
        let trigger = event.trigger();
        match event.kind {
            FileEventKind::Deleted => Ok(self.record_delete(event.path)),
            FileEventKind::Renamed { from } => {
                self.cache.rename(&from, &event.path);
                self.record_present(event.path, trigger).await
            }
            FileEventKind::Created | FileEventKind::Modified => {
                if self.is_own_write(&event.path).await? {
                    debug!("Ignoring our own write to {}", event.path);
                    return Ok(None);
                }
                self.record_present(event.path, trigger).await
            }
        }
    }

    /// Whether the note still holds exactly what the sync core last wrote.
    async fn is_own_write(&self, path: &str) -> Result<bool> {
        if !self.echoes.is_marked(path) {
            return Ok(false);
        }
        match self.store.read(path).await {
            Ok(current) => Ok(self.echoes.is_echo(path, &current)),
            // Gone since; record_present drops the event
            Err(FsError::NotFound(_)) => Ok(false),
            Err(source) => Err(SyncError::Store {
                path: path.to_string(),
                source,
            }),
        }
    }

    fn record_delete(&self, path: String) -> Option<String> {
        self.echoes.clear(&path);
        let Some(binding) = self.cache.forget(&path) else {
            debug!("{} was never synced, nothing to delete", path);
            return None;
        };
        let remote_id = binding.remote_id;

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = pending.get(&remote_id) {
            if existing.trigger != TriggerKind::Delete && existing.path != path {
                // The identity already moved to another note (rename seen as create + delete)
                debug!(
                    "{} left {}, keeping pending {:?} of {}",
                    remote_id, path, existing.trigger, existing.path
                );
                return Some(remote_id);
            }
        }

        if !binding.synced {
            // Only a local identity; there is no page to delete
            pending.remove(&remote_id);
            debug!("{} was deleted before its first sync", path);
            return None;
        }

        pending.insert(
            remote_id.clone(),
            PendingChange {
                path,
                trigger: TriggerKind::Delete,
                remote_id: remote_id.clone(),
            },
        );
        Some(remote_id)
    }

    async fn record_present(&self, path: String, trigger: TriggerKind) -> Result<Option<String>> {
        let exists = self
            .store
            .exists(&path)
            .await
            .map_err(|source| SyncError::Store {
                path: path.clone(),
                source,
            })?;
        if !exists {
            // Stale event for a note removed since; a pending delete stays
            debug!("{} is gone, ignoring {:?}", path, trigger);
            return Ok(None);
        }

        let remote_id = self.resolve_identity(&path).await?;

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = pending.get(&remote_id) {
            if existing.trigger == TriggerKind::Delete {
                debug!("{} is back, replacing pending delete with {:?}", path, trigger);
            }
        }
        pending.insert(
            remote_id.clone(),
            PendingChange {
                path,
                trigger,
                remote_id: remote_id.clone(),
            },
        );
        Ok(Some(remote_id))
    }

    /// The note's `remoteID`, minted and written back if it has none.
    async fn resolve_identity(&self, path: &str) -> Result<String> {
        let _guard = self.identity.lock().await;

        let raw = self
            .store
            .read_text(path)
            .await
            .map_err(|source| SyncError::Store {
                path: path.to_string(),
                source,
            })?;
        let parsed = frontmatter::parse(&raw).map_err(|source| SyncError::MalformedHeader {
            path: path.to_string(),
            source,
        })?;

        if let Some(id) = parsed.frontmatter.remote_id() {
            self.cache.remember(path, &parsed.frontmatter);
            return Ok(id.to_string());
        }

        let id = Uuid::new_v4().to_string();
        let mut fm = parsed.frontmatter;
        fm.set_remote_id(&id);
        let updated =
            frontmatter::serialize(&fm, parsed.body).map_err(|source| SyncError::MalformedHeader {
                path: path.to_string(),
                source,
            })?;

        self.echoes.mark(path, updated.as_bytes());
        self.store
            .write(path, updated.as_bytes())
            .await
            .map_err(|source| SyncError::Store {
                path: path.to_string(),
                source,
            })?;
        self.cache.set_minted(path, &id);

        info!("Assigned remoteID {} to {}", id, path);
        Ok(id)
    }

    /// Take every pending change, leaving the tracker empty.
    pub fn drain(&self) -> Vec<PendingChange> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *pending).into_values().collect()
    }

    pub fn get(&self, remote_id: &str) -> Option<PendingChange> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(remote_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
