//! File watcher with debouncing for the published folder.
//!
//! Uses notify-debouncer-mini, which reports "something happened" per path.
//! The watcher classifies each path by looking at the disk: gone means
//! deleted, first sighting means created, anything else is a modification.

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, new_debouncer};
use notion_sync_core::{FileEvent, FileEventKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Events buffered between the watcher thread and the main loop.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

const DEBOUNCE: Duration = Duration::from_millis(200);

/// Last seen mtime per vault-relative path; filters spurious events.
type MtimeCache = Arc<Mutex<HashMap<String, SystemTime>>>;

/// Watches `{vault}/{folder}` for markdown changes.
pub struct FileWatcher {
    vault_path: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::Receiver<FileEvent>,
}

impl FileWatcher {
    /// Start watching. `folder` is vault-relative; empty watches the whole vault.
    pub fn new(vault_path: PathBuf, folder: &str) -> Result<Self> {
        // Canonicalize the path to resolve symlinks. On macOS, /var/folders/...
        // is actually /private/var/folders/..., and FSEvents needs the real path.
        let vault_path = vault_path.canonicalize().unwrap_or(vault_path);
        let watch_path = match folder.trim_matches('/') {
            "" => vault_path.clone(),
            folder => vault_path.join(folder),
        };

        let mtime_cache: MtimeCache = Arc::new(Mutex::new(HashMap::new()));
        seed_mtimes(&watch_path, &vault_path, &mtime_cache);

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let vault_path_clone = vault_path.clone();
        let mtime_cache_clone = Arc::clone(&mtime_cache);

        let mut debouncer = new_debouncer(
            DEBOUNCE,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        let Some(file_event) =
                            classify(&event.path, &vault_path_clone, &mtime_cache_clone)
                        else {
                            continue;
                        };
                        // Runs on the debouncer thread; blocking applies backpressure
                        if event_tx.blocking_send(file_event).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&watch_path, RecursiveMode::Recursive)?;

        Ok(Self {
            vault_path,
            _debouncer: debouncer,
            event_rx,
        })
    }

    /// Get the receiver for file events.
    pub fn event_rx(&mut self) -> &mut mpsc::Receiver<FileEvent> {
        &mut self.event_rx
    }

    pub fn vault_path(&self) -> &Path {
        &self.vault_path
    }
}

/// Vault-relative `/`-separated path of a markdown note, or None for
/// anything that is not a visible `.md` file inside the vault.
pub fn note_path(path: &Path, vault_path: &Path) -> Option<String> {
    let relative = path.strip_prefix(vault_path).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;

    if parts.is_empty() || parts.iter().any(|part| part.starts_with('.')) {
        return None;
    }
    let relative = parts.join("/");
    relative.ends_with(".md").then_some(relative)
}

fn classify(path: &Path, vault_path: &Path, mtime_cache: &MtimeCache) -> Option<FileEvent> {
    let relative = note_path(path, vault_path)?;
    let mut cache = mtime_cache.lock().unwrap_or_else(|e| e.into_inner());

    let mtime = match std::fs::metadata(path) {
        Ok(metadata) => metadata.modified().ok(),
        Err(_) => {
            cache.remove(&relative);
            debug!("File event: Deleted - {}", relative);
            return Some(FileEvent::new(relative, FileEventKind::Deleted));
        }
    };

    let kind = match (cache.get(&relative), mtime) {
        // Mtime unchanged - spurious event (Docker volume workaround)
        (Some(last), Some(mtime)) if *last == mtime => return None,
        (Some(_), _) => FileEventKind::Modified,
        (None, _) => FileEventKind::Created,
    };
    if let Some(mtime) = mtime {
        cache.insert(relative.clone(), mtime);
    }

    debug!("File event: {:?} - {}", kind, relative);
    Some(FileEvent::new(relative, kind))
}

/// Record existing notes so their first change reads as a modification.
fn seed_mtimes(dir: &Path, vault_path: &Path, mtime_cache: &MtimeCache) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if !entry.file_name().to_string_lossy().starts_with('.') {
                seed_mtimes(&path, vault_path, mtime_cache);
            }
            continue;
        }
        let (Some(relative), Ok(Ok(mtime))) = (
            note_path(&path, vault_path),
            entry.metadata().map(|m| m.modified()),
        ) else {
            continue;
        };
        mtime_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(relative, mtime);
    }
}
