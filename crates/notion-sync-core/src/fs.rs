//! Document store abstraction over the vault's files.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in notion-sync-daemon) - Uses tokio::fs
//!
//! Paths are vault-relative, `/`-separated strings.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Not valid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// File metadata
#[derive(Debug, Clone)]
pub struct FileStat {
    /// Modification time in milliseconds since epoch
    pub mtime_millis: u64,
    /// File size in bytes
    pub size: u64,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Directory entry
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// File or directory name (not full path)
    pub name: String,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Platform-independent access to the documents being published.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write file contents (creates parent directories if needed)
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    /// List directory contents
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Get file metadata
    async fn stat(&self, path: &str) -> Result<FileStat>;

    /// Read a document as UTF-8 text.
    async fn read_text(&self, path: &str) -> Result<String> {
        let bytes = self.read(path).await?;
        String::from_utf8(bytes).map_err(|_| FsError::InvalidUtf8(path.to_string()))
    }
}

/// Recursively collect markdown documents under `folder` (vault-relative).
pub async fn list_markdown<F: FileSystem + ?Sized>(fs: &F, folder: &str) -> Result<Vec<String>> {
    let mut found = Vec::new();
    let mut pending = vec![folder.trim_matches('/').to_string()];

    while let Some(dir) = pending.pop() {
        for entry in fs.list(&dir).await? {
            if entry.name.starts_with('.') {
                continue;
            }
            let path = if dir.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", dir, entry.name)
            };
            if entry.is_dir {
                pending.push(path);
            } else if path.ends_with(".md") {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

/// In-memory filesystem for testing
pub struct InMemoryFs {
    files: RwLock<HashMap<String, Vec<u8>>>,
    dirs: RwLock<HashSet<String>>,
    /// Tracks file modification times (path -> mtime in ms)
    mtimes: RwLock<HashMap<String, u64>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        let mut dirs = HashSet::new();
        dirs.insert(String::new()); // Root directory
        Self {
            files: RwLock::new(HashMap::new()),
            dirs: RwLock::new(dirs),
            mtimes: RwLock::new(HashMap::new()),
        }
    }

    /// Set a specific mtime for testing staleness checks
    pub fn set_mtime(&self, path: &str, mtime: u64) {
        let path = Self::normalize_path(path);
        let mut mtimes = self.mtimes.write().unwrap_or_else(|e| e.into_inner());
        mtimes.insert(path, mtime);
    }

    /// Remove a file, as a user deleting a note would.
    pub fn remove(&self, path: &str) -> bool {
        let path = Self::normalize_path(path);
        self.mtimes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&path);
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&path)
            .is_some()
    }

    fn current_time_ms() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn normalize_path(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    fn add_parent_dirs(&self, path: &str) {
        let mut dirs = self.dirs.write().unwrap_or_else(|e| e.into_inner());
        let mut current = path;
        while let Some(pos) = current.rfind('/') {
            current = &current[..pos];
            dirs.insert(current.to_string());
        }
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(&path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let path = Self::normalize_path(path);
        self.add_parent_dirs(&path);

        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.clone(), content.to_vec());
        self.mtimes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path, Self::current_time_ms());
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let path = Self::normalize_path(path);
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };

        let dirs = self.dirs.read().unwrap_or_else(|e| e.into_inner());
        if !dirs.contains(&path) {
            return Err(FsError::NotFound(path));
        }

        let mut entries = Vec::new();
        let mut seen = HashSet::new();

        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        for file_path in files.keys() {
            if let Some(rest) = file_path.strip_prefix(&prefix) {
                if !rest.contains('/') && seen.insert(rest.to_string()) {
                    entries.push(FileEntry {
                        name: rest.to_string(),
                        is_dir: false,
                    });
                }
            }
        }

        for dir_path in dirs.iter() {
            if let Some(rest) = dir_path.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') && seen.insert(rest.to_string()) {
                    entries.push(FileEntry {
                        name: rest.to_string(),
                        is_dir: true,
                    });
                }
            }
        }

        Ok(entries)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let dirs = self.dirs.read().unwrap_or_else(|e| e.into_inner());
        Ok(files.contains_key(&path) || dirs.contains(&path))
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let path = Self::normalize_path(path);

        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        if let Some(content) = files.get(&path) {
            let mtimes = self.mtimes.read().unwrap_or_else(|e| e.into_inner());
            return Ok(FileStat {
                mtime_millis: mtimes.get(&path).copied().unwrap_or(0),
                size: content.len() as u64,
                is_dir: false,
            });
        }

        let dirs = self.dirs.read().unwrap_or_else(|e| e.into_inner());
        if dirs.contains(&path) {
            return Ok(FileStat {
                mtime_millis: 0,
                size: 0,
                is_dir: true,
            });
        }

        Err(FsError::NotFound(path))
    }
}

// Lets tests keep a handle on the store they hand to the engine.
#[async_trait]
impl<T: FileSystem + ?Sized> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        (**self).list(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        (**self).stat(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_fs_basic_operations() {
        let fs = InMemoryFs::new();

        fs.write("test.md", b"hello world").await.unwrap();

        let content = fs.read("test.md").await.unwrap();
        assert_eq!(content, b"hello world");
        assert_eq!(fs.read_text("test.md").await.unwrap(), "hello world");

        assert!(fs.exists("test.md").await.unwrap());
        assert!(!fs.exists("nonexistent.md").await.unwrap());

        assert!(fs.remove("test.md"));
        assert!(!fs.exists("test.md").await.unwrap());
    }

    #[tokio::test]
    async fn test_inmemory_fs_directories() {
        let fs = InMemoryFs::new();

        fs.write("a/b/c.md", b"content").await.unwrap();

        assert!(fs.exists("a").await.unwrap());
        assert!(fs.exists("a/b").await.unwrap());

        let entries = fs.list("a").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "b");
        assert!(entries[0].is_dir);

        let entries = fs.list("a/b").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "c.md");
        assert!(!entries[0].is_dir);
    }

    #[tokio::test]
    async fn test_read_text_rejects_invalid_utf8() {
        let fs = InMemoryFs::new();
        fs.write("bin.md", &[0xff, 0xfe]).await.unwrap();

        assert!(matches!(
            fs.read_text("bin.md").await,
            Err(FsError::InvalidUtf8(_))
        ));
    }

    #[tokio::test]
    async fn test_list_markdown_walks_subfolders() {
        let fs = InMemoryFs::new();
        fs.write("notes/a.md", b"a").await.unwrap();
        fs.write("notes/deep/b.md", b"b").await.unwrap();
        fs.write("notes/image.png", b"png").await.unwrap();
        fs.write("notes/.obsidian/c.md", b"hidden").await.unwrap();
        fs.write("other/d.md", b"d").await.unwrap();

        let found = list_markdown(&fs, "notes").await.unwrap();
        assert_eq!(found, vec!["notes/a.md", "notes/deep/b.md"]);

        let all = list_markdown(&fs, "").await.unwrap();
        assert_eq!(all.len(), 3);
    }
}
