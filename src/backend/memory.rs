//! In-memory backend, used for embedded resources and tests.
//!
//! Every created entry gets a fresh numeric identity. Rewriting a file keeps
//! its identity and changes its content tag; `replace` gives a path a new
//! identity, like a delete followed by a create.

use super::FileSystem;
use crate::error::FsError;
use crate::tree::hasher::bytes_content_tag;
use crate::tree::{FileRecord, Url};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

const DIRECTORY_CONTENT_TAG: &str = "dir";

#[derive(Debug, Clone)]
enum Content {
    File(Vec<u8>),
    Directory,
}

#[derive(Debug, Clone)]
struct Entry {
    id: u64,
    content: Content,
}

impl Entry {
    fn record(&self) -> FileRecord {
        match &self.content {
            Content::File(bytes) => FileRecord::file(self.id.to_string(), bytes_content_tag(bytes)),
            Content::Directory => FileRecord::directory(self.id.to_string(), DIRECTORY_CONTENT_TAG),
        }
    }
}

/// In-memory namespace
#[derive(Debug)]
pub struct MemoryFileSystem {
    entries: RwLock<BTreeMap<Url, Entry>>,
    next_id: AtomicU64,
    failing: RwLock<Vec<Url>>,
}

impl MemoryFileSystem {
    /// Empty namespace holding only the root directory.
    pub fn new() -> Self {
        let fs = Self {
            entries: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            failing: RwLock::new(Vec::new()),
        };
        let root = fs.entry(Content::Directory);
        fs.entries.write().insert(Url::root(), root);
        fs
    }

    fn entry(&self, content: Content) -> Entry {
        Entry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            content,
        }
    }

    /// Create `url` and any missing ancestors as directories.
    ///
    /// A file found on the way is replaced by a directory.
    pub fn create_dir_all(&self, url: &Url) {
        let mut entries = self.entries.write();
        for prefix in url.lineage() {
            let is_directory = matches!(
                entries.get(&prefix).map(|e| &e.content),
                Some(Content::Directory)
            );
            if !is_directory {
                Self::remove_locked(&mut entries, &prefix);
                let entry = self.entry(Content::Directory);
                entries.insert(prefix, entry);
            }
        }
    }

    /// Write a file, creating parents. Existing files keep their identity.
    pub fn write(&self, url: &Url, bytes: impl Into<Vec<u8>>) {
        if let Some(parent) = url.parent() {
            self.create_dir_all(&parent);
        }
        let mut entries = self.entries.write();
        match entries.get_mut(url) {
            Some(Entry {
                content: content @ Content::File(_),
                ..
            }) => *content = Content::File(bytes.into()),
            _ => {
                Self::remove_locked(&mut entries, url);
                let entry = self.entry(Content::File(bytes.into()));
                entries.insert(url.clone(), entry);
            }
        }
    }

    /// Give the entry at `url` a new identity, keeping its content.
    /// Descendants of a replaced directory are dropped.
    pub fn replace(&self, url: &Url) -> bool {
        let mut entries = self.entries.write();
        let Some(old) = entries.get(url).cloned() else {
            return false;
        };
        Self::remove_locked(&mut entries, url);
        let entry = self.entry(old.content);
        entries.insert(url.clone(), entry);
        true
    }

    /// Remove `url` and everything below it.
    pub fn remove(&self, url: &Url) -> bool {
        if url.is_root() {
            return false;
        }
        Self::remove_locked(&mut self.entries.write(), url)
    }

    /// Make listings of `url` fail with an I/O error until cleared.
    pub fn fail_listing(&self, url: &Url) {
        self.failing.write().push(url.clone());
    }

    pub fn clear_failures(&self) {
        self.failing.write().clear();
    }

    fn remove_locked(entries: &mut BTreeMap<Url, Entry>, url: &Url) -> bool {
        let doomed: Vec<Url> = entries
            .range(url.clone()..)
            .take_while(|(key, _)| key.is_within(url))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        !doomed.is_empty()
    }
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn stat(&self, url: &Url) -> Result<FileRecord, FsError> {
        self.entries
            .read()
            .get(url)
            .map(Entry::record)
            .ok_or_else(|| FsError::NotFound(url.clone()))
    }

    async fn read_directory(&self, url: &Url) -> Result<Vec<(String, FileRecord)>, FsError> {
        if self.failing.read().contains(url) {
            return Err(FsError::Io {
                url: url.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "listing failed"),
            });
        }
        let entries = self.entries.read();
        match entries.get(url).map(|e| &e.content) {
            Some(Content::Directory) => {}
            Some(Content::File(_)) => return Err(FsError::NotADirectory(url.clone())),
            None => return Err(FsError::NotFound(url.clone())),
        }
        Ok(entries
            .range(url.clone()..)
            .take_while(|(key, _)| key.is_within(url))
            .filter(|(key, _)| key.depth() == url.depth() + 1)
            .filter_map(|(key, entry)| Some((key.name()?.to_string(), entry.record())))
            .collect())
    }
}
