//! Local disk backend.
//!
//! Identifier tags come from device and inode numbers (creation time on
//! platforms without inodes), content tags from modification time and size.
//! Symlinks are reported as files and never followed.

use super::FileSystem;
use crate::error::FsError;
use crate::tree::hasher::metadata_content_tag;
use crate::tree::{FileRecord, FileType, Url};
use async_trait::async_trait;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

/// Backend rooted at a directory on disk
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Disk path for a namespace key.
    pub fn path_for(&self, url: &Url) -> PathBuf {
        url.segments().fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// Namespace key for a disk path under the root.
    pub fn url_for(&self, path: &Path) -> Option<Url> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut url = Url::root();
        for component in relative.components() {
            match component {
                std::path::Component::Normal(name) => url = url.join(name.to_str()?),
                _ => return None,
            }
        }
        Some(url)
    }
}

pub(crate) fn record_from_metadata(metadata: &Metadata) -> FileRecord {
    let file_type = if metadata.is_dir() {
        FileType::Directory
    } else {
        FileType::File
    };
    let modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    FileRecord {
        identifier_tag: identifier_tag(metadata),
        content_tag: Some(metadata_content_tag(modified, metadata.len())),
        file_type,
    }
}

#[cfg(unix)]
fn identifier_tag(metadata: &Metadata) -> Option<String> {
    use std::os::unix::fs::MetadataExt;
    Some(format!("{:x}:{:x}", metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn identifier_tag(metadata: &Metadata) -> Option<String> {
    metadata
        .created()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| format!("c{:x}", d.as_nanos()))
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn stat(&self, url: &Url) -> Result<FileRecord, FsError> {
        let metadata = tokio::fs::symlink_metadata(self.path_for(url))
            .await
            .map_err(|e| FsError::io(url, e))?;
        Ok(record_from_metadata(&metadata))
    }

    async fn read_directory(&self, url: &Url) -> Result<Vec<(String, FileRecord)>, FsError> {
        let path = self.path_for(url);
        let metadata = tokio::fs::symlink_metadata(&path)
            .await
            .map_err(|e| FsError::io(url, e))?;
        if !metadata.is_dir() {
            return Err(FsError::NotADirectory(url.clone()));
        }

        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| FsError::io(url, e))?;
        let mut children = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FsError::io(url, e))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = ?entry.path(), "Skipping non UTF-8 file name");
                continue;
            };
            match entry.metadata().await {
                Ok(metadata) => children.push((name, record_from_metadata(&metadata))),
                // Removed between listing and stat: it is simply not there.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = ?entry.path(), "Entry vanished during listing");
                }
                Err(e) => return Err(FsError::io(&url.join(&name), e)),
            }
        }
        children.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(children)
    }
}
