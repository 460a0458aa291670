//! Change events and their multicast channel.

use crate::store::AttachedData;
use crate::tree::Url;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Kind of committed change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileChangeKind {
    Created,
    Changed,
    Deleted,
}

/// One committed change to the index
///
/// `attached_data` is empty for `Created`. For `Changed` it lists the
/// attachments the content change expired. For `Deleted` it lists every
/// attachment the node held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChangeEvent {
    pub kind: FileChangeKind,
    pub url: Url,
    pub attached_data: Vec<AttachedData>,
}

impl FileChangeEvent {
    pub fn created(url: Url) -> Self {
        Self {
            kind: FileChangeKind::Created,
            url,
            attached_data: Vec::new(),
        }
    }

    pub fn changed(url: Url, attached_data: Vec<AttachedData>) -> Self {
        Self {
            kind: FileChangeKind::Changed,
            url,
            attached_data,
        }
    }

    pub fn deleted(url: Url, attached_data: Vec<AttachedData>) -> Self {
        Self {
            kind: FileChangeKind::Deleted,
            url,
            attached_data,
        }
    }
}

/// Events of one committed hint, in emission order.
pub type FileChangeBatch = Arc<[FileChangeEvent]>;

/// Multicast channel delivering one batch per committed hint
///
/// Subscribers that fall more than `capacity` batches behind receive
/// `RecvError::Lagged` and should re-read the index.
#[derive(Debug, Clone)]
pub struct EventChannel {
    sender: broadcast::Sender<FileChangeBatch>,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FileChangeBatch> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish a committed batch. Empty batches are not sent.
    pub(crate) fn publish(&self, batch: &FileChangeBatch) {
        if batch.is_empty() {
            return;
        }
        // No receivers is not an error: nobody is listening yet.
        if self.sender.send(Arc::clone(batch)).is_err() {
            trace!(events = batch.len(), "No subscribers for change batch");
        }
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new(1024)
    }
}
