//! Persisted Tree Index
//!
//! Durable rows for tree nodes and the data subscribers attach to them.
//! All access goes through a [`persistence::Transaction`].

pub mod persistence;

use crate::tree::{FileRecord, FileType, Url};
use serde::{Deserialize, Serialize};

pub use persistence::{TransactionMode, TreeIndex};

/// Opaque node identifier
pub type NodeId = u64;

/// NodeRecord: one persisted tree node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub url: Url,
    pub parent_id: Option<NodeId>,
    pub is_directory: bool,
    pub identifier_tag: Option<String>,
    pub content_tag: Option<String>,
}

impl NodeRecord {
    /// Node for an observed record.
    pub fn observed(id: NodeId, url: Url, parent_id: Option<NodeId>, record: &FileRecord) -> Self {
        Self {
            id,
            url,
            parent_id,
            is_directory: record.is_directory(),
            identifier_tag: record.identifier_tag.clone(),
            content_tag: record.content_tag.clone(),
        }
    }

    /// Directory with unknown tags, created to hold a deeper path.
    pub fn synthetic_directory(id: NodeId, url: Url, parent_id: Option<NodeId>) -> Self {
        Self {
            id,
            url,
            parent_id,
            is_directory: true,
            identifier_tag: None,
            content_tag: None,
        }
    }

    /// Whether the node has been seen with a resolved identity.
    pub fn is_observed(&self) -> bool {
        self.identifier_tag.is_some()
    }

    pub fn file_type(&self) -> FileType {
        if self.is_directory {
            FileType::Directory
        } else {
            FileType::File
        }
    }

    /// The observation this node currently reflects.
    pub fn file_record(&self) -> FileRecord {
        FileRecord {
            identifier_tag: self.identifier_tag.clone(),
            content_tag: self.content_tag.clone(),
            file_type: self.file_type(),
        }
    }

    /// True when `record` describes exactly this node's current version.
    pub fn matches(&self, record: &FileRecord) -> bool {
        self.is_directory == record.is_directory()
            && self.identifier_tag == record.identifier_tag
            && self.content_tag == record.content_tag
    }
}

/// When attached data stops applying to its node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeletionPolicy {
    /// Kept until detached by its owner or until the node is destroyed.
    Manual,
    /// Dropped as soon as the node's content tag changes.
    #[default]
    WhenContentChanges,
    /// Survives content changes, dropped when the node is destroyed.
    WhenDeleted,
}

impl DeletionPolicy {
    pub fn survives_content_change(self) -> bool {
        !matches!(self, DeletionPolicy::WhenContentChanges)
    }
}

/// AttachedData: a subscriber's claim on a node's current version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedData {
    pub key: String,
    pub payload: Vec<u8>,
    pub deletion_policy: DeletionPolicy,
}

impl AttachedData {
    pub fn new(key: impl Into<String>, payload: impl Into<Vec<u8>>, policy: DeletionPolicy) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
            deletion_policy: policy,
        }
    }
}
