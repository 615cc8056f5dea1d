//! notion-sync-core: one-way publishing of markdown notes to Notion pages.
//!
//! This crate provides:
//! - Frontmatter parsing that keeps user fields and stamps sync bookkeeping
//! - Chunking of note bodies and conversion to Notion blocks
//! - A `PageClient` seam with an HTTP implementation for the Notion API
//! - `SyncEngine` (replace one page), `ChangeTracker` (coalesce events) and
//!   `FlushScheduler` (drain on a timer, scan as a fallback)
//! - `FileSystem` abstraction so hosts supply the document store

pub mod blocks;
pub mod cache;
pub mod chunk;
pub mod client;
pub mod config;
pub mod engine;
pub mod events;
pub mod frontmatter;
pub mod fs;
pub mod scheduler;
pub mod tracker;

pub use cache::{Binding, EchoFilter, MetadataCache};
pub use client::{NetworkError, NewPage, NotionClient, PageClient, RemotePage};
pub use config::{ConfigError, SyncSettings};
pub use engine::{Clipboard, ClipboardError, SyncContext, SyncEngine, SyncError, SyncReport};
pub use events::{EventBus, Subscription, SyncEvent};
pub use frontmatter::{Frontmatter, FrontmatterError};
pub use fs::{FileEntry, FileStat, FileSystem, FsError, InMemoryFs};
pub use scheduler::{FlushReport, FlushScheduler};
pub use tracker::{ChangeTracker, FileEvent, FileEventKind, PendingChange, TriggerKind};
