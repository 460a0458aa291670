//! Arbor: Incremental File-Tree Tracking
//!
//! Turns raw, possibly stale observations of a hierarchical namespace into a
//! durable, queryable tree and a minimal stream of Created/Changed/Deleted
//! events. A background walker enumerates the tree in laps; every listing is
//! submitted as a hint and reconciled against the persisted index in one
//! transaction, with events published only after that transaction commits.

pub mod backend;
pub mod config;
pub mod error;
pub mod hint;
pub mod logging;
pub mod store;
pub mod tooling;
pub mod tracker;
pub mod tree;
pub mod walker;

pub use backend::{FileSystem, LocalFileSystem, MemoryFileSystem};
pub use error::{ApiError, FsError, StorageError, TrackerError, WalkerError};
pub use hint::Hint;
pub use store::{AttachedData, DeletionPolicy, NodeRecord, TreeIndex};
pub use tracker::{
    EventChannel, FileChangeBatch, FileChangeEvent, FileChangeKind, HintTracker, TrackerHandle,
    TrackerService,
};
pub use tree::{FileRecord, FileType, Url};
pub use walker::{WalkHandler, WalkItem, Walker, WalkerThread, WalkerTiming};
