//! Hint Tracker
//!
//! The reconciliation engine. Every hint is applied in its own mutation
//! transaction; the resulting events are published only after that
//! transaction has committed, and in commit order.

pub mod events;
mod reconcile;
pub mod service;

use crate::error::TrackerError;
use crate::hint::Hint;
use crate::store::persistence::TransactionMode;
use crate::store::{AttachedData, NodeRecord, TreeIndex};
use crate::tree::{FileRecord, Url};
use reconcile::Reconciler;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error};

pub use events::{EventChannel, FileChangeBatch, FileChangeEvent, FileChangeKind};
pub use service::{TrackerHandle, TrackerService};

/// Reconciles hints against the persisted tree index
pub struct HintTracker {
    index: Arc<TreeIndex>,
    events: EventChannel,
}

impl HintTracker {
    pub fn new(index: Arc<TreeIndex>, events: EventChannel) -> Self {
        Self { index, events }
    }

    pub fn index(&self) -> &Arc<TreeIndex> {
        &self.index
    }

    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    /// Receive one batch per committed hint.
    pub fn subscribe(&self) -> broadcast::Receiver<FileChangeBatch> {
        self.events.subscribe()
    }

    /// Apply a hint and return the events it produced.
    ///
    /// On failure nothing is written and nothing is published; re-submitting
    /// the same (or a fresher) hint is always safe.
    pub fn commit_hint(&self, hint: &Hint) -> Result<FileChangeBatch, TrackerError> {
        let mut tx = self.index.begin(TransactionMode::Mutation);
        let mut reconciler = Reconciler::new(&mut tx);
        reconciler.apply(hint).map_err(|e| {
            error!(url = %hint.url(), kind = hint.kind(), error = %e, "Failed to reconcile hint");
            e
        })?;
        let batch: FileChangeBatch = reconciler.into_events().into();

        tx.commit_then(|| self.events.publish(&batch)).map_err(|e| {
            error!(url = %hint.url(), kind = hint.kind(), error = %e, "Failed to commit hint");
            e
        })?;

        debug!(
            url = %hint.url(),
            kind = hint.kind(),
            events = batch.len(),
            "Committed hint"
        );
        Ok(batch)
    }

    /// Attach subscriber data to the indexed version described by `record`.
    pub fn attach_data(
        &self,
        url: &Url,
        record: &FileRecord,
        data: AttachedData,
        replace: bool,
    ) -> Result<(), TrackerError> {
        let mut tx = self.index.begin(TransactionMode::Mutation);
        let node = tx
            .get_node(url)?
            .ok_or_else(|| TrackerError::NotIndexed(url.clone()))?;
        if !node.matches(record) {
            return Err(TrackerError::StaleRecord(url.clone()));
        }
        if !replace && tx.get_attachment(url, &data.key)?.is_some() {
            return Err(TrackerError::AttachmentExists {
                url: url.clone(),
                key: data.key,
            });
        }
        tx.put_attachment(url, &data)?;
        tx.commit()?;
        debug!(url = %url, key = %data.key, "Attached data");
        Ok(())
    }

    /// Remove attached data by key, returning it if it existed.
    pub fn detach_data(&self, url: &Url, key: &str) -> Result<Option<AttachedData>, TrackerError> {
        let mut tx = self.index.begin(TransactionMode::Mutation);
        if tx.get_node(url)?.is_none() {
            return Err(TrackerError::NotIndexed(url.clone()));
        }
        let existing = tx.get_attachment(url, key)?;
        if existing.is_some() {
            tx.remove_attachment(url, key)?;
            tx.commit()?;
        }
        Ok(existing)
    }

    /// Attached data currently held by `url`.
    pub fn get_metadata(&self, url: &Url) -> Result<Vec<AttachedData>, TrackerError> {
        let tx = self.index.begin(TransactionMode::Query);
        if tx.get_node(url)?.is_none() {
            return Err(TrackerError::NotIndexed(url.clone()));
        }
        Ok(tx.attachments(url)?)
    }

    pub fn get_node(&self, url: &Url) -> Result<Option<NodeRecord>, TrackerError> {
        let tx = self.index.begin(TransactionMode::Query);
        Ok(tx.get_node(url)?)
    }

    /// Every observed path at or below `base`, parents first.
    ///
    /// The listing is read from one consistent snapshot and materialized
    /// before the query transaction ends, so later commits never show up in
    /// it. Call again for a fresh enumeration. An unindexed `base` yields an
    /// empty list.
    pub fn enumerate_all_files(&self, base: &Url) -> Result<Vec<Url>, TrackerError> {
        let tx = self.index.begin(TransactionMode::Query);
        Ok(tx
            .subtree(base)?
            .into_iter()
            .filter(NodeRecord::is_observed)
            .map(|node| node.url)
            .collect())
    }
}
