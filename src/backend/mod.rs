//! File-system backends
//!
//! A backend answers two questions about a namespace: what is at a path, and
//! what are a directory's immediate children. Everything else (walking,
//! diffing, persistence) is backend-independent.

pub mod local;
pub mod memory;

use crate::error::FsError;
use crate::hint::Hint;
use crate::tree::{FileRecord, Url};
use async_trait::async_trait;

pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;

/// Stat/listing provider
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Observe one path. Absent paths fail with [`FsError::NotFound`].
    async fn stat(&self, url: &Url) -> Result<FileRecord, FsError>;

    /// Immediate children of a directory, sorted by name.
    async fn read_directory(&self, url: &Url) -> Result<Vec<(String, FileRecord)>, FsError>;
}

/// Turn a direct stat of `url` into a file hint.
///
/// A missing path becomes an "observed absent" hint; any other failure is
/// returned so the caller does not mistake "could not look" for "gone".
pub async fn observe(fs: &dyn FileSystem, url: &Url) -> Result<Hint, FsError> {
    match fs.stat(url).await {
        Ok(record) => Ok(Hint::file(url.clone(), Some(record))),
        Err(FsError::NotFound(_)) => Ok(Hint::file(url.clone(), None)),
        Err(e) => Err(e),
    }
}
