//! Bookkeeping shared by the tracker, the engine and the folder scan.
//!
//! - `MetadataCache` remembers which remote page each note is bound to, so a
//!   delete can be resolved after the file (and its frontmatter) is gone.
//! - `EchoFilter` remembers what we last wrote to each note, so the watcher
//!   event caused by that write does not schedule another sync.

use crate::frontmatter::{Frontmatter, LAST_SYNC_TIME_KEY};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

/// A note's sync identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub remote_id: String,
    /// False for an identity minted locally that no page exists for yet
    pub synced: bool,
}

/// Last known sync identity per note path.
#[derive(Debug, Default)]
pub struct MetadataCache {
    bindings: RwLock<HashMap<String, Binding>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record what a note's frontmatter says about its remote page.
    ///
    /// A `remoteID` without any `lastSyncTime` was never published.
    pub fn remember(&self, path: &str, frontmatter: &Frontmatter) {
        match frontmatter.remote_id() {
            Some(id) => self.bind(path, id, frontmatter.get(LAST_SYNC_TIME_KEY).is_some()),
            None => {
                self.forget(path);
            }
        }
    }

    /// Bind a note to a page that exists remotely.
    pub fn set_remote_id(&self, path: &str, remote_id: &str) {
        self.bind(path, remote_id, true);
    }

    /// Bind a note to an identity it was just given, before any sync.
    pub fn set_minted(&self, path: &str, remote_id: &str) {
        self.bind(path, remote_id, false);
    }

    fn bind(&self, path: &str, remote_id: &str, synced: bool) {
        self.bindings.write().unwrap_or_else(|e| e.into_inner()).insert(
            path.to_string(),
            Binding {
                remote_id: remote_id.to_string(),
                synced,
            },
        );
    }

    pub fn remote_id(&self, path: &str) -> Option<String> {
        self.binding(path).map(|b| b.remote_id)
    }

    pub fn binding(&self, path: &str) -> Option<Binding> {
        self.bindings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    /// Drop a note, returning the identity it had.
    pub fn forget(&self, path: &str) -> Option<Binding> {
        self.bindings
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path)
    }

    /// Move a note's entry to its new path.
    pub fn rename(&self, from: &str, to: &str) {
        let mut bindings = self.bindings.write().unwrap_or_else(|e| e.into_inner());
        if let Some(binding) = bindings.remove(from) {
            bindings.insert(to.to_string(), binding);
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Notes written by the sync core itself.
///
/// Mark a path with the bytes about to be written BEFORE writing it. A
/// watcher event is our echo while the note still holds exactly those bytes,
/// however late the event is handled. The first event that sees other
/// content clears the mark.
#[derive(Debug, Default)]
pub struct EchoFilter {
    written: Mutex<HashMap<String, Vec<u8>>>,
}

impl EchoFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, path: &str, content: &[u8]) {
        self.written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), content.to_vec());
    }

    /// Whether there is a write of ours to compare against.
    pub fn is_marked(&self, path: &str) -> bool {
        self.written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(path)
    }

    /// True when `current` is what we last wrote to `path`.
    pub fn is_echo(&self, path: &str, current: &[u8]) -> bool {
        let mut written = self.written.lock().unwrap_or_else(|e| e.into_inner());
        match written.get(path) {
            Some(ours) if ours.as_slice() == current => true,
            Some(_) => {
                written.remove(path);
                false
            }
            None => false,
        }
    }

    pub fn clear(&self, path: &str) {
        self.written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontmatter;

    #[test]
    fn remember_tracks_remote_id() {
        let cache = MetadataCache::new();
        let fm = frontmatter::parse("---\nremoteID: abc\n---\n").unwrap().frontmatter;

        cache.remember("a.md", &fm);
        assert_eq!(cache.remote_id("a.md"), Some("abc".to_string()));

        cache.remember("a.md", &Frontmatter::new());
        assert_eq!(cache.remote_id("a.md"), None);
    }

    #[test]
    fn sync_time_decides_whether_a_page_exists() {
        let cache = MetadataCache::new();
        let minted = frontmatter::parse("---\nremoteID: abc\n---\n").unwrap().frontmatter;
        let synced = frontmatter::parse("---\nremoteID: def\nlastSyncTime: 2024-01-02 03:04:05\n---\n")
            .unwrap()
            .frontmatter;

        cache.remember("a.md", &minted);
        cache.remember("b.md", &synced);
        cache.set_minted("c.md", "ghi");

        assert!(!cache.binding("a.md").unwrap().synced);
        assert!(cache.binding("b.md").unwrap().synced);
        assert!(!cache.binding("c.md").unwrap().synced);

        cache.set_remote_id("c.md", "page");
        assert_eq!(
            cache.binding("c.md"),
            Some(Binding {
                remote_id: "page".to_string(),
                synced: true
            })
        );
    }

    #[test]
    fn rename_moves_identity() {
        let cache = MetadataCache::new();
        cache.set_remote_id("old.md", "abc");
        cache.rename("old.md", "new.md");

        assert_eq!(cache.remote_id("old.md"), None);
        assert_eq!(cache.remote_id("new.md"), Some("abc".to_string()));
        assert_eq!(cache.forget("new.md").map(|b| b.remote_id), Some("abc".to_string()));
        assert!(cache.is_empty());
    }

    #[test]
    fn echo_matches_our_content_only() {
        let echoes = EchoFilter::new();
        echoes.mark("a.md", b"ours");

        assert!(echoes.is_marked("a.md"));
        assert!(echoes.is_echo("a.md", b"ours"));
        // A second event for the same write is still ours
        assert!(echoes.is_echo("a.md", b"ours"));
        assert!(!echoes.is_echo("b.md", b"ours"));

        // A real edit clears the mark
        assert!(!echoes.is_echo("a.md", b"edited"));
        assert!(!echoes.is_marked("a.md"));
        assert!(!echoes.is_echo("a.md", b"ours"));
    }
}
