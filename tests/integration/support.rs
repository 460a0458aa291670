//! Shared fixtures.

use arbor::{EventChannel, FileChangeBatch, FileChangeKind, FileRecord, Hint, HintTracker, TreeIndex, Url};
use std::sync::Arc;

pub fn tracker() -> HintTracker {
    let index = TreeIndex::temporary().unwrap();
    HintTracker::new(Arc::new(index), EventChannel::new(256))
}

pub fn file(id: &str, content: &str) -> FileRecord {
    FileRecord::file(id, content)
}

pub fn dir(id: &str) -> FileRecord {
    FileRecord::directory(id, "dir")
}

pub fn url(path: &str) -> Url {
    Url::parse(path)
}

/// Commit and flatten the batch into `(kind, url)` pairs.
pub fn commit(tracker: &HintTracker, hint: Hint) -> Vec<(FileChangeKind, String)> {
    summary(&tracker.commit_hint(&hint).unwrap())
}

pub fn summary(batch: &FileChangeBatch) -> Vec<(FileChangeKind, String)> {
    batch.iter().map(|e| (e.kind, e.url.to_string())).collect()
}

pub fn created(path: &str) -> (FileChangeKind, String) {
    (FileChangeKind::Created, path.to_string())
}

pub fn changed(path: &str) -> (FileChangeKind, String) {
    (FileChangeKind::Changed, path.to_string())
}

pub fn deleted(path: &str) -> (FileChangeKind, String) {
    (FileChangeKind::Deleted, path.to_string())
}
