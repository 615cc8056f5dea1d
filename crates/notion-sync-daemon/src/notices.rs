//! Headless stand-ins for the user-facing side effects: notices go to the
//! log and the page link is logged instead of copied.

use notion_sync_core::{Clipboard, ClipboardError, EventBus, Subscription, SyncEvent};
use std::sync::Arc;
use tracing::{info, warn};

/// "Clipboard" that logs the link so it can be picked up from the output.
pub struct LogClipboard;

impl Clipboard for LogClipboard {
    fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        info!("Page link: {}", text);
        Ok(())
    }
}

/// Log every sync event until the returned subscription is dropped.
pub fn log_notices(events: &Arc<EventBus>) -> Subscription {
    events.subscribe(|event| match event {
        SyncEvent::Synced { path, url, .. } => info!("Published {} at {}", path, url),
        SyncEvent::PartialSync {
            path,
            appended,
            total,
            ..
        } => warn!(
            "{} is only partly published ({}/{} chunks); push it again",
            path, appended, total
        ),
        SyncEvent::SyncFailed { path, message } => {
            warn!("Could not publish {}: {}", path, message)
        }
        SyncEvent::PageDeleted { path, remote_id } => {
            info!("Removed page {} of deleted note {}", remote_id, path)
        }
        SyncEvent::DeleteFailed {
            path,
            remote_id,
            message,
        } => warn!(
            "Could not remove page {} of deleted note {}: {}",
            remote_id, path, message
        ),
    })
}
