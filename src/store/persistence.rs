//! Sled-backed transaction engine for the tree index.
//!
//! Layout, one sled tree:
//! - `b'n' + url key` -> bincode `NodeRecord`
//! - `b'a' + url key + 0xFF + attachment key` -> bincode `AttachedData`
//!
//! Url keys are materialized paths (see [`Url::storage_key`]), so a subtree is
//! one contiguous key range and ordered scans visit parents before children.
//!
//! Mutation transactions are single-writer: the writer lock is held from
//! `begin` until commit or drop. Writes are buffered in an ordered overlay and
//! land as one atomic `sled::Batch`. Query transactions hold the commit read
//! lock, so they never see half of a batch.

use super::{AttachedData, NodeId, NodeRecord};
use crate::error::StorageError;
use crate::tree::Url;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, error};

const NODE_TAG: u8 = b'n';
const ATTACHMENT_TAG: u8 = b'a';
const ATTACHMENT_SEPARATOR: u8 = 0xFF;

/// Transaction mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Read-only snapshot; writes are rejected.
    Query,
    /// Exclusive read-write transaction.
    Mutation,
}

/// Row counts of the index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub nodes: usize,
    pub observed_nodes: usize,
    pub attachments: usize,
}

/// Persisted tree index
pub struct TreeIndex {
    db: sled::Db,
    tree: sled::Tree,
    writer: Mutex<()>,
    commit_lock: RwLock<()>,
    flush_on_commit: bool,
}

impl TreeIndex {
    /// Open (or create) the index stored at `path`.
    pub fn open(path: &Path, tree_name: &str, flush_on_commit: bool) -> Result<Self, StorageError> {
        std::fs::create_dir_all(path)?;
        let db = sled::open(path)?;
        Self::from_db(db, tree_name, flush_on_commit)
    }

    /// Index backed by a throwaway database, removed on drop.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, "file-index", false)
    }

    pub fn from_db(db: sled::Db, tree_name: &str, flush_on_commit: bool) -> Result<Self, StorageError> {
        let tree = db.open_tree(tree_name)?;
        Ok(Self {
            db,
            tree,
            writer: Mutex::new(()),
            commit_lock: RwLock::new(()),
            flush_on_commit,
        })
    }

    /// Start a transaction.
    ///
    /// A mutation blocks until every other mutation has committed or rolled back.
    pub fn begin(&self, mode: TransactionMode) -> Transaction<'_> {
        let guard = match mode {
            TransactionMode::Query => TransactionGuard::Query(self.commit_lock.read()),
            TransactionMode::Mutation => TransactionGuard::Mutation(self.writer.lock()),
        };
        Transaction {
            index: self,
            overlay: BTreeMap::new(),
            guard,
        }
    }

    pub fn stats(&self) -> Result<IndexStats, StorageError> {
        let _read = self.commit_lock.read();
        let mut stats = IndexStats::default();
        for item in self.tree.scan_prefix([NODE_TAG]) {
            let (key, value) = item?;
            let record: NodeRecord = decode(&key, &value)?;
            stats.nodes += 1;
            if record.is_observed() {
                stats.observed_nodes += 1;
            }
        }
        stats.attachments = self.tree.scan_prefix([ATTACHMENT_TAG]).count();
        Ok(stats)
    }
}

enum TransactionGuard<'a> {
    Query(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    Mutation(#[allow(dead_code)] MutexGuard<'a, ()>),
}

/// An open transaction. Dropping it without `commit` discards its writes.
pub struct Transaction<'a> {
    index: &'a TreeIndex,
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    guard: TransactionGuard<'a>,
}

impl<'a> Transaction<'a> {
    pub fn mode(&self) -> TransactionMode {
        match self.guard {
            TransactionGuard::Query(_) => TransactionMode::Query,
            TransactionGuard::Mutation(_) => TransactionMode::Mutation,
        }
    }

    /// Allocate a fresh node id.
    pub fn next_id(&self) -> Result<NodeId, StorageError> {
        Ok(self.index.db.generate_id()?)
    }

    pub fn get_node(&self, url: &Url) -> Result<Option<NodeRecord>, StorageError> {
        let key = node_key(url);
        self.get_raw(&key)?
            .map(|value| decode(&key, &value))
            .transpose()
    }

    pub fn put_node(&mut self, record: &NodeRecord) -> Result<(), StorageError> {
        let value = encode(record)?;
        self.write(node_key(&record.url), Some(value))
    }

    /// Immediate children of `url`, ordered by name.
    pub fn children(&self, url: &Url) -> Result<Vec<NodeRecord>, StorageError> {
        let mut prefix = vec![NODE_TAG];
        prefix.extend(url.descendant_prefix());
        let child_depth = url.depth() + 1;

        let mut children = Vec::new();
        let mut cursor = prefix.clone();
        while let Some((key, value)) = self.first_from(&cursor, &prefix)? {
            let record: NodeRecord = decode(&key, &value)?;
            // Skip the child's own descendants: they all start with key + 0x00.
            cursor = key;
            cursor.push(0x01);
            if record.url.depth() == child_depth {
                children.push(record);
            }
        }
        Ok(children)
    }

    /// `url` and all of its descendants, parents before children.
    pub fn subtree(&self, url: &Url) -> Result<Vec<NodeRecord>, StorageError> {
        let mut nodes = Vec::new();
        if let Some(record) = self.get_node(url)? {
            nodes.push(record);
        }
        let mut prefix = vec![NODE_TAG];
        prefix.extend(url.descendant_prefix());
        for (key, value) in self.scan(&prefix)? {
            nodes.push(decode(&key, &value)?);
        }
        Ok(nodes)
    }

    /// Remove `url` and everything below it, returning each removed node with
    /// the attached data it held, in pre-order.
    pub fn delete_subtree(
        &mut self,
        url: &Url,
    ) -> Result<Vec<(NodeRecord, Vec<AttachedData>)>, StorageError> {
        let nodes = self.subtree(url)?;
        let mut removed = Vec::with_capacity(nodes.len());
        for node in nodes {
            let attachments = self.attachments(&node.url)?;
            for data in &attachments {
                self.write(attachment_key(&node.url, &data.key), None)?;
            }
            self.write(node_key(&node.url), None)?;
            removed.push((node, attachments));
        }
        Ok(removed)
    }

    pub fn attachments(&self, url: &Url) -> Result<Vec<AttachedData>, StorageError> {
        self.scan(&attachment_prefix(url))?
            .into_iter()
            .map(|(key, value)| decode(&key, &value))
            .collect()
    }

    pub fn get_attachment(&self, url: &Url, key: &str) -> Result<Option<AttachedData>, StorageError> {
        let raw_key = attachment_key(url, key);
        self.get_raw(&raw_key)?
            .map(|value| decode(&raw_key, &value))
            .transpose()
    }

    pub fn put_attachment(&mut self, url: &Url, data: &AttachedData) -> Result<(), StorageError> {
        let value = encode(data)?;
        self.write(attachment_key(url, &data.key), Some(value))
    }

    pub fn remove_attachment(&mut self, url: &Url, key: &str) -> Result<(), StorageError> {
        self.write(attachment_key(url, key), None)
    }

    /// Apply all buffered writes atomically.
    pub fn commit(self) -> Result<(), StorageError> {
        self.commit_then(|| ())
    }

    /// Commit, then run `after` while this transaction still holds its lock.
    ///
    /// Anything `after` does is ordered exactly like the commits themselves.
    /// Once the batch is applied its rows are visible, so `after` runs even if
    /// the following flush fails; a failed flush is logged.
    pub fn commit_then<T>(self, after: impl FnOnce() -> T) -> Result<T, StorageError> {
        if self.overlay.is_empty() {
            return Ok(after());
        }
        let write_count = self.overlay.len();
        let mut batch = sled::Batch::default();
        for (key, value) in self.overlay {
            match value {
                Some(value) => batch.insert(key, value),
                None => batch.remove(key),
            }
        }
        {
            let _exclusive = self.index.commit_lock.write();
            self.index.tree.apply_batch(batch).map_err(|e| {
                error!(error = %e, "Failed to apply index batch");
                StorageError::from(e)
            })?;
        }
        debug!(writes = write_count, "Committed index transaction");
        let tree = &self.index.tree;
        let flush = self.index.flush_on_commit.then_some(|| tree.flush());
        Ok(settle(after, flush))
    }

    /// Discard all buffered writes.
    pub fn rollback(self) {}

    fn write(&mut self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<(), StorageError> {
        if self.mode() == TransactionMode::Query {
            return Err(StorageError::ReadOnly);
        }
        self.overlay.insert(key, value);
        Ok(())
    }

    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        if let Some(value) = self.overlay.get(key) {
            return Ok(value.clone());
        }
        Ok(self.index.tree.get(key)?.map(|v| v.to_vec()))
    }

    /// All live rows under `prefix`, merged with the overlay, in key order.
    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut merged = BTreeMap::new();
        for item in self.index.tree.scan_prefix(prefix) {
            let (key, value) = item?;
            merged.insert(key.to_vec(), value.to_vec());
        }
        for (key, value) in self
            .overlay
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// First live row with key `>= start` that still starts with `prefix`.
    fn first_from(
        &self,
        start: &[u8],
        prefix: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut cursor = start.to_vec();
        loop {
            let base = match self.index.tree.range(cursor.clone()..).next() {
                Some(item) => {
                    let (key, value) = item?;
                    key.starts_with(prefix)
                        .then(|| (key.to_vec(), value.to_vec()))
                }
                None => None,
            };
            let pending = self
                .overlay
                .range(cursor.clone()..)
                .next()
                .filter(|(key, _)| key.starts_with(prefix));

            match (base, pending) {
                (None, None) => return Ok(None),
                (Some(row), None) => return Ok(Some(row)),
                (base, Some((key, value))) => {
                    if let Some(row) = base.as_ref().filter(|row| row.0 < *key) {
                        return Ok(Some(row.clone()));
                    }
                    match value {
                        Some(value) => return Ok(Some((key.clone(), value.clone()))),
                        None => {
                            cursor = key.clone();
                            cursor.push(0x00);
                        }
                    }
                }
            }
        }
    }
}

/// Run the post-commit step, then flush.
fn settle<T>(
    after: impl FnOnce() -> T,
    flush: Option<impl FnOnce() -> sled::Result<usize>>,
) -> T {
    let out = after();
    if let Some(flush) = flush {
        if let Err(e) = flush() {
            error!(error = %e, "Failed to flush committed index batch");
        }
    }
    out
}

fn node_key(url: &Url) -> Vec<u8> {
    let mut key = vec![NODE_TAG];
    key.extend(url.storage_key());
    key
}

fn attachment_prefix(url: &Url) -> Vec<u8> {
    let mut key = vec![ATTACHMENT_TAG];
    key.extend(url.storage_key());
    key.push(ATTACHMENT_SEPARATOR);
    key
}

fn attachment_key(url: &Url, name: &str) -> Vec<u8> {
    let mut key = attachment_prefix(url);
    key.extend_from_slice(name.as_bytes());
    key
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value).map_err(|e| StorageError::Encode(e.to_string()))
}

fn decode<T: DeserializeOwned>(key: &[u8], value: &[u8]) -> Result<T, StorageError> {
    bincode::deserialize(value).map_err(|e| StorageError::Decode {
        key: String::from_utf8_lossy(key).into_owned(),
        message: e.to_string(),
    })
}
