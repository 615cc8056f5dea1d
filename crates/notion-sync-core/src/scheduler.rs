//! FlushScheduler: turns pending changes into remote operations.
//!
//! The host calls [`FlushScheduler::flush`] on every tick of
//! [`FlushScheduler::flush_interval`] and [`FlushScheduler::scan`] as a
//! fallback for events the watcher missed. One failed change never stops
//! the others.

use crate::client::PageClient;
use crate::engine::{Result, SyncContext, SyncEngine, SyncError};
use crate::events::SyncEvent;
use crate::frontmatter::{self, Frontmatter};
use crate::fs::{self, FileSystem, FsError};
use crate::tracker::{ChangeTracker, FileEvent, PendingChange, TriggerKind};

use chrono::{Local, TimeZone};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome counts for one flush or scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub synced: usize,
    pub partial: usize,
    pub deleted: usize,
    pub failed: usize,
}

impl FlushReport {
    pub fn total(&self) -> usize {
        self.synced + self.partial + self.deleted + self.failed
    }

    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Synced => self.synced += 1,
            Outcome::Partial => self.partial += 1,
            Outcome::Deleted => self.deleted += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Synced,
    Partial,
    Deleted,
    Failed,
}

pub struct FlushScheduler<F: FileSystem, C: PageClient> {
    ctx: Arc<SyncContext<F, C>>,
    engine: SyncEngine<F, C>,
    tracker: ChangeTracker<F>,
}

impl<F: FileSystem, C: PageClient> FlushScheduler<F, C> {
    pub fn new(ctx: SyncContext<F, C>) -> Self {
        let ctx = Arc::new(ctx);
        let engine = SyncEngine::new(Arc::clone(&ctx));
        let tracker = ChangeTracker::new(
            Arc::clone(&ctx.store),
            Arc::clone(&ctx.cache),
            Arc::clone(&ctx.echoes),
        );
        Self {
            ctx,
            engine,
            tracker,
        }
    }

    pub fn context(&self) -> &SyncContext<F, C> {
        &self.ctx
    }

    pub fn engine(&self) -> &SyncEngine<F, C> {
        &self.engine
    }

    pub fn tracker(&self) -> &ChangeTracker<F> {
        &self.tracker
    }

    pub fn flush_interval(&self) -> Duration {
        self.ctx.settings.flush_interval()
    }

    /// Whether `path` lies in the published folder.
    pub fn is_published(&self, path: &str) -> bool {
        let folder = self.ctx.settings.folder.trim_matches('/');
        folder.is_empty()
            || path
                .strip_prefix(folder)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Record a watcher event. Failures are logged; the event is dropped.
    pub async fn record(&self, event: FileEvent) {
        if !self.is_published(&event.path) {
            return;
        }
        let path = event.path.clone();
        if let Err(e) = self.tracker.record(event).await {
            warn!("Could not queue {}: {}", path, e);
        }
    }

    /// Dispatch every pending change concurrently.
    pub async fn flush(&self) -> FlushReport {
        let changes = self.tracker.drain();
        let mut report = FlushReport::default();
        if changes.is_empty() {
            return report;
        }

        debug!("Flushing {} pending change(s)", changes.len());
        for outcome in join_all(changes.into_iter().map(|c| self.dispatch(c))).await {
            report.add(outcome);
        }
        info!(
            "Flush finished: {} synced, {} partial, {} deleted, {} failed",
            report.synced, report.partial, report.deleted, report.failed
        );
        report
    }

    async fn dispatch(&self, change: PendingChange) -> Outcome {
        if change.trigger != TriggerKind::Delete {
            return match self.engine.sync(&change.path).await {
                Ok(_) => Outcome::Synced,
                Err(SyncError::PartialSync { .. }) => Outcome::Partial,
                Err(_) => Outcome::Failed,
            };
        }

        match self.ctx.client.delete_page(&change.remote_id).await {
            Ok(()) => {
                info!("Deleted page {} of {}", change.remote_id, change.path);
                self.ctx.events.emit(SyncEvent::PageDeleted {
                    path: change.path,
                    remote_id: change.remote_id,
                });
                Outcome::Deleted
            }
            Err(e) => {
                warn!(
                    "Could not delete page {} of {}: {}",
                    change.remote_id, change.path, e
                );
                self.ctx.events.emit(SyncEvent::DeleteFailed {
                    path: change.path,
                    remote_id: change.remote_id,
                    message: e.to_string(),
                });
                Outcome::Failed
            }
        }
    }

    /// Sync every note in the folder that changed since its last sync, or
    /// was never synced. Bypasses the tracker.
    pub async fn scan(&self) -> std::result::Result<FlushReport, FsError> {
        let mut report = FlushReport::default();

        for path in fs::list_markdown(self.ctx.store.as_ref(), &self.ctx.settings.folder).await? {
            match self.is_stale(&path).await {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) => {
                    warn!("Skipping {}: {}", path, e);
                    report.add(Outcome::Failed);
                    continue;
                }
            }

            // Sequential: a scan may cover the whole folder
            let outcome = match self.engine.sync(&path).await {
                Ok(_) => Outcome::Synced,
                Err(SyncError::PartialSync { .. }) => Outcome::Partial,
                Err(_) => Outcome::Failed,
            };
            report.add(outcome);
        }

        if report.total() > 0 {
            info!(
                "Scan finished: {} synced, {} partial, {} failed",
                report.synced, report.partial, report.failed
            );
        }
        Ok(report)
    }

    async fn is_stale(&self, path: &str) -> Result<bool> {
        let store = &self.ctx.store;
        let raw = store.read_text(path).await.map_err(|source| SyncError::Store {
            path: path.to_string(),
            source,
        })?;
        let fm = frontmatter::parse(&raw)
            .map_err(|source| SyncError::MalformedHeader {
                path: path.to_string(),
                source,
            })?
            .frontmatter;
        self.ctx.cache.remember(path, &fm);

        let Some(synced_at) = last_synced_millis(&fm) else {
            return Ok(true);
        };
        let stat = store.stat(path).await.map_err(|source| SyncError::Store {
            path: path.to_string(),
            source,
        })?;

        let grace = self.ctx.settings.stale_grace().as_millis() as i64;
        Ok(stat.mtime_millis as i64 - synced_at > grace)
    }

    /// Load every note's `remoteID` into the metadata cache so deletes can
    /// be resolved. Returns how many notes carry one.
    pub async fn prime_cache(&self) -> std::result::Result<usize, FsError> {
        let mut bound = 0;
        for path in fs::list_markdown(self.ctx.store.as_ref(), &self.ctx.settings.folder).await? {
            let raw = self.ctx.store.read_text(&path).await?;
            match frontmatter::parse(&raw) {
                Ok(note) => {
                    self.ctx.cache.remember(&path, &note.frontmatter);
                    if note.frontmatter.remote_id().is_some() {
                        bound += 1;
                    }
                }
                Err(e) => debug!("Not caching {}: {}", path, e),
            }
        }
        Ok(bound)
    }
}

/// `lastSyncTime` as epoch millis, when the note has been synced.
fn last_synced_millis(fm: &Frontmatter) -> Option<i64> {
    fm.remote_id()?;
    let naive = fm.last_sync_time()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|at| at.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::Block;
    use crate::client::{NetworkError, NewPage, RemotePage};
    use crate::config::SyncSettings;
    use crate::fs::InMemoryFs;
    use crate::tracker::FileEventKind;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;

    /// Records calls; refuses to delete pages named "locked".
    #[derive(Default)]
    struct FakeClient {
        calls: Mutex<Vec<String>>,
    }

    impl FakeClient {
        fn calls(&self) -> Vec<String> {
            let mut calls = self.calls.lock().unwrap().clone();
            calls.sort();
            calls
        }
    }

    #[async_trait]
    impl PageClient for FakeClient {
        async fn create_page(&self, page: NewPage) -> crate::client::Result<RemotePage> {
            self.calls.lock().unwrap().push(format!("create:{}", page.title));
            Ok(RemotePage {
                id: format!("page-{}", page.title),
                url: format!("https://www.notion.so/page-{}", page.title),
            })
        }

        async fn append_blocks(&self, _page_id: &str, _children: Vec<Block>) -> crate::client::Result<()> {
            Ok(())
        }

        async fn delete_page(&self, page_id: &str) -> crate::client::Result<()> {
            self.calls.lock().unwrap().push(format!("delete:{}", page_id));
            if page_id == "locked" {
                return Err(NetworkError::Status {
                    status: 403,
                    message: "restricted".to_string(),
                });
            }
            Ok(())
        }
    }

    fn scheduler(fs: &Arc<InMemoryFs>, folder: &str) -> FlushScheduler<InMemoryFs, FakeClient> {
        let settings = SyncSettings {
            folder: folder.to_string(),
            ..SyncSettings::default()
        };
        FlushScheduler::new(SyncContext::new(Arc::clone(fs), FakeClient::default(), settings))
    }

    fn stamp(at: chrono::NaiveDateTime) -> String {
        at.format(frontmatter::SYNC_TIME_FORMAT).to_string()
    }

    fn millis(at: chrono::NaiveDateTime) -> u64 {
        Local
            .from_local_datetime(&at)
            .earliest()
            .unwrap()
            .timestamp_millis() as u64
    }

    #[tokio::test]
    async fn flush_dispatches_syncs_and_deletes() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("pub/a.md", b"---\nremoteID: old-a\n---\nA").await.unwrap();
        fs.write("pub/gone.md", b"---\nremoteID: gone\nlastSyncTime: 2024-01-02 03:04:05\n---\nG").await.unwrap();
        let scheduler = scheduler(&fs, "pub");
        scheduler.prime_cache().await.unwrap();

        fs.remove("pub/gone.md");
        scheduler.record(FileEvent::new("pub/a.md", FileEventKind::Modified)).await;
        scheduler.record(FileEvent::new("pub/gone.md", FileEventKind::Deleted)).await;

        let report = scheduler.flush().await;

        assert_eq!(report, FlushReport { synced: 1, deleted: 1, ..FlushReport::default() });
        assert_eq!(
            scheduler.context().client.calls(),
            vec!["create:a", "delete:gone", "delete:old-a"]
        );
        assert!(scheduler.tracker().is_empty());
    }

    #[tokio::test]
    async fn one_failure_does_not_block_others() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("locked.md", b"---\nremoteID: locked\nlastSyncTime: 2024-01-02 03:04:05\n---\nL").await.unwrap();
        fs.write("bad.md", b"---\n[unclosed\n---\nB").await.unwrap();
        fs.write("ok.md", b"---\nremoteID: ok\n---\nO").await.unwrap();
        let scheduler = scheduler(&fs, "");
        scheduler.prime_cache().await.unwrap();

        fs.remove("locked.md");
        scheduler.record(FileEvent::new("locked.md", FileEventKind::Deleted)).await;
        scheduler.record(FileEvent::new("ok.md", FileEventKind::Modified)).await;

        let report = scheduler.flush().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.synced, 1);
    }

    #[tokio::test]
    async fn events_outside_folder_are_ignored() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("private/a.md", b"A").await.unwrap();
        fs.write("pub/b.md", b"B").await.unwrap();
        let scheduler = scheduler(&fs, "pub");

        scheduler.record(FileEvent::new("private/a.md", FileEventKind::Created)).await;
        scheduler.record(FileEvent::new("pubs/x.md", FileEventKind::Created)).await;
        assert!(scheduler.tracker().is_empty());

        scheduler.record(FileEvent::new("pub/b.md", FileEventKind::Created)).await;
        assert_eq!(scheduler.tracker().len(), 1);
    }

    #[tokio::test]
    async fn scan_syncs_stale_and_never_synced_notes() {
        let fs = Arc::new(InMemoryFs::new());
        let synced_at = Local::now().naive_local() - ChronoDuration::hours(1);

        // Edited well after its last sync
        fs.write(
            "pub/stale.md",
            format!("---\nremoteID: s\nlastSyncTime: {}\n---\nS", stamp(synced_at)).as_bytes(),
        )
        .await
        .unwrap();
        fs.set_mtime("pub/stale.md", millis(synced_at + ChronoDuration::minutes(10)));

        // Written by the sync itself, within the grace period
        fs.write(
            "pub/fresh.md",
            format!("---\nremoteID: f\nlastSyncTime: {}\n---\nF", stamp(synced_at)).as_bytes(),
        )
        .await
        .unwrap();
        fs.set_mtime("pub/fresh.md", millis(synced_at + ChronoDuration::seconds(2)));

        fs.write("pub/new.md", b"N").await.unwrap();
        fs.write("elsewhere.md", b"E").await.unwrap();

        let scheduler = scheduler(&fs, "pub");
        let report = scheduler.scan().await.unwrap();

        assert_eq!(report.synced, 2);
        assert_eq!(
            scheduler.context().client.calls(),
            vec!["create:new", "create:stale", "delete:s"]
        );
    }

    #[tokio::test]
    async fn prime_cache_counts_bound_notes() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("a.md", b"---\nremoteID: a\n---\n").await.unwrap();
        fs.write("b.md", b"plain").await.unwrap();
        let scheduler = scheduler(&fs, "");

        assert_eq!(scheduler.prime_cache().await.unwrap(), 1);
        assert_eq!(scheduler.context().cache.remote_id("a.md").as_deref(), Some("a"));
    }

    #[test]
    fn unsynced_note_has_no_sync_time() {
        let fm = frontmatter::parse("---\nlastSyncTime: 2024-01-01 00:00:00\n---\n")
            .unwrap()
            .frontmatter;
        assert_eq!(last_synced_millis(&fm), None);
    }
}
