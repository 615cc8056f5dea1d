//! End-to-end publishing scenarios over an in-memory vault.

use async_trait::async_trait;
use chrono::Local;
use notion_sync_core::blocks::Block;
use notion_sync_core::chunk::{self, MAX_CHUNK_LEN};
use notion_sync_core::client;
use notion_sync_core::{
    FileEvent, FileEventKind, FileSystem, FlushScheduler, InMemoryFs, NewPage, PageClient,
    RemotePage, SyncContext, SyncEvent, SyncSettings, frontmatter,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Create { title: String, blocks: usize },
    Append { page: String, blocks: usize },
    Delete { page: String },
}

/// Hands out page-1, page-2, ... and remembers every call.
#[derive(Default)]
struct RecordingClient {
    calls: Mutex<Vec<Call>>,
    next_page: AtomicUsize,
}

impl RecordingClient {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageClient for RecordingClient {
    async fn create_page(&self, page: NewPage) -> client::Result<RemotePage> {
        self.calls.lock().unwrap().push(Call::Create {
            title: page.title,
            blocks: page.children.len(),
        });
        let n = self.next_page.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RemotePage {
            id: format!("page-{}", n),
            url: format!("https://www.notion.so/page-{}", n),
        })
    }

    async fn append_blocks(&self, page_id: &str, children: Vec<Block>) -> client::Result<()> {
        self.calls.lock().unwrap().push(Call::Append {
            page: page_id.to_string(),
            blocks: children.len(),
        });
        Ok(())
    }

    async fn delete_page(&self, page_id: &str) -> client::Result<()> {
        self.calls.lock().unwrap().push(Call::Delete {
            page: page_id.to_string(),
        });
        Ok(())
    }
}

fn scheduler(fs: &Arc<InMemoryFs>) -> FlushScheduler<InMemoryFs, RecordingClient> {
    FlushScheduler::new(SyncContext::new(
        Arc::clone(fs),
        RecordingClient::default(),
        SyncSettings::default(),
    ))
}

/// 9000 `a`s with a newline after every 100.
fn long_body() -> String {
    vec!["a".repeat(100); 90].join("\n")
}

#[tokio::test]
async fn test_long_note_is_created_then_appended() {
    let fs = Arc::new(InMemoryFs::new());
    let body = long_body();
    fs.write("Long.md", body.as_bytes()).await.unwrap();

    assert_eq!(chunk::split(&body, MAX_CHUNK_LEN).len(), 3);

    let scheduler = scheduler(&fs);
    let report = scheduler.engine().sync("Long.md").await.unwrap();
    assert_eq!(report.chunks, 3);

    // Each chunk is one run of lines, so one paragraph
    assert_eq!(
        scheduler.context().client.calls(),
        vec![
            Call::Create { title: "Long".into(), blocks: 1 },
            Call::Append { page: "page-1".into(), blocks: 1 },
            Call::Append { page: "page-1".into(), blocks: 1 },
        ]
    );

    let raw = fs.read_text("Long.md").await.unwrap();
    let note = frontmatter::parse(&raw).unwrap();
    assert_eq!(note.frontmatter.remote_id(), Some("page-1"));
    assert_eq!(note.body, body);

    let synced_at = note.frontmatter.last_sync_time().unwrap();
    let age = Local::now().naive_local() - synced_at;
    assert!(age.num_seconds() >= 0 && age.num_seconds() < 60, "{:?}", age);
}

#[tokio::test]
async fn test_user_fields_survive_sync() {
    let fs = Arc::new(InMemoryFs::new());
    fs.write("n.md", b"---\ntitle: x\ntags:\n- t1\n- t2\n---\nBody\n")
        .await
        .unwrap();

    let scheduler = scheduler(&fs);
    scheduler.engine().sync("n.md").await.unwrap();

    let raw = fs.read_text("n.md").await.unwrap();
    let note = frontmatter::parse(&raw).unwrap();
    let keys: Vec<&str> = note.frontmatter.keys().collect();
    assert_eq!(keys, vec!["title", "tags", "remoteID", "lastSyncTime"]);
    assert_eq!(note.frontmatter.get_str("title"), Some("x"));
    assert_eq!(note.frontmatter.tags(), vec!["t1", "t2"]);
    assert_eq!(note.body, "Body\n");
}

#[tokio::test]
async fn test_burst_of_events_flushes_once() {
    let fs = Arc::new(InMemoryFs::new());
    fs.write("draft.md", b"Draft").await.unwrap();
    let scheduler = scheduler(&fs);

    scheduler
        .record(FileEvent::new("draft.md", FileEventKind::Created))
        .await;
    // Watcher echo of the remoteID write
    scheduler
        .record(FileEvent::new("draft.md", FileEventKind::Modified))
        .await;
    scheduler
        .record(FileEvent::new("draft.md", FileEventKind::Modified))
        .await;
    scheduler
        .record(FileEvent::new("draft.md", FileEventKind::Modified))
        .await;
    assert_eq!(scheduler.tracker().len(), 1);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _subscription = scheduler
        .context()
        .events
        .subscribe(move |event| sink.lock().unwrap().push(event));

    let report = scheduler.flush().await;
    assert_eq!(report.synced, 1);

    // The minted identity is deleted (it never existed remotely), then replaced
    let calls = scheduler.context().client.calls();
    assert!(matches!(calls[0], Call::Delete { .. }));
    assert_eq!(calls[1], Call::Create { title: "draft".into(), blocks: 1 });
    assert!(matches!(
        seen.lock().unwrap().as_slice(),
        [SyncEvent::Synced { .. }]
    ));

    // Nothing left for the next tick
    assert_eq!(scheduler.flush().await.total(), 0);
}

#[tokio::test]
async fn test_deleted_note_deletes_its_page() {
    let fs = Arc::new(InMemoryFs::new());
    fs.write("n.md", b"Body").await.unwrap();
    let scheduler = scheduler(&fs);

    scheduler.engine().sync("n.md").await.unwrap();
    fs.remove("n.md");
    scheduler
        .record(FileEvent::new("n.md", FileEventKind::Deleted))
        .await;
    // A late modify for the vanished note must not resurrect it
    scheduler
        .record(FileEvent::new("n.md", FileEventKind::Modified))
        .await;

    let report = scheduler.flush().await;
    assert_eq!(report.deleted, 1);
    assert_eq!(
        scheduler.context().client.calls().last(),
        Some(&Call::Delete { page: "page-1".into() })
    );
}

#[tokio::test]
async fn test_note_deleted_before_first_flush_makes_no_calls() {
    let fs = Arc::new(InMemoryFs::new());
    fs.write("draft.md", b"Draft").await.unwrap();
    let scheduler = scheduler(&fs);

    scheduler
        .record(FileEvent::new("draft.md", FileEventKind::Created))
        .await;
    fs.remove("draft.md");
    scheduler
        .record(FileEvent::new("draft.md", FileEventKind::Deleted))
        .await;
    assert!(scheduler.tracker().is_empty());

    let report = scheduler.flush().await;
    assert_eq!(report.total(), 0);
    assert!(scheduler.context().client.calls().is_empty());
}

#[tokio::test]
async fn test_late_event_for_our_own_write_is_ignored() {
    let fs = Arc::new(InMemoryFs::new());
    fs.write("n.md", b"Body").await.unwrap();
    let scheduler = scheduler(&fs);
    scheduler.engine().sync("n.md").await.unwrap();

    // The receive loop can be held up by a long flush or scan
    tokio::time::sleep(Duration::from_millis(5_100)).await;
    scheduler
        .record(FileEvent::new("n.md", FileEventKind::Modified))
        .await;
    assert!(scheduler.tracker().is_empty());

    // A real edit after that is still picked up
    let raw = fs.read_text("n.md").await.unwrap();
    fs.write("n.md", format!("{}\nMore", raw).as_bytes())
        .await
        .unwrap();
    scheduler
        .record(FileEvent::new("n.md", FileEventKind::Modified))
        .await;
    assert_eq!(scheduler.tracker().get("page-1").unwrap().path, "n.md");
}

#[tokio::test]
async fn test_rename_keeps_identity() {
    let fs = Arc::new(InMemoryFs::new());
    fs.write("old.md", b"Body").await.unwrap();
    let scheduler = scheduler(&fs);
    scheduler.engine().sync("old.md").await.unwrap();

    let raw = fs.read_text("old.md").await.unwrap();
    fs.remove("old.md");
    fs.write("new.md", raw.as_bytes()).await.unwrap();
    scheduler
        .record(FileEvent::new(
            "new.md",
            FileEventKind::Renamed {
                from: "old.md".into(),
            },
        ))
        .await;

    let pending = scheduler.tracker().get("page-1").unwrap();
    assert_eq!(pending.path, "new.md");

    scheduler.flush().await;
    let calls = scheduler.context().client.calls();
    assert_eq!(
        &calls[calls.len() - 2..],
        &[
            Call::Delete { page: "page-1".into() },
            Call::Create { title: "new".into(), blocks: 1 },
        ]
    );
}
