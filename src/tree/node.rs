//! Observation types: what a backend reports about one path.

use serde::{Deserialize, Serialize};

/// Directory/file classification of an observed node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    File,
    Directory,
}

impl FileType {
    pub fn is_directory(self) -> bool {
        matches!(self, FileType::Directory)
    }
}

/// FileRecord: one observation of a path
///
/// `identifier_tag` answers "is this the same underlying object as before",
/// `content_tag` answers "has its content changed" and is only comparable
/// while the identifier is unchanged. `None` means unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRecord {
    pub identifier_tag: Option<String>,
    pub content_tag: Option<String>,
    pub file_type: FileType,
}

impl FileRecord {
    pub fn new(
        identifier_tag: impl Into<String>,
        content_tag: impl Into<String>,
        file_type: FileType,
    ) -> Self {
        Self {
            identifier_tag: Some(identifier_tag.into()),
            content_tag: Some(content_tag.into()),
            file_type,
        }
    }

    pub fn file(identifier_tag: impl Into<String>, content_tag: impl Into<String>) -> Self {
        Self::new(identifier_tag, content_tag, FileType::File)
    }

    pub fn directory(identifier_tag: impl Into<String>, content_tag: impl Into<String>) -> Self {
        Self::new(identifier_tag, content_tag, FileType::Directory)
    }

    /// Directory with unknown tags, as created for implicit ancestors.
    pub fn synthetic_directory() -> Self {
        Self {
            identifier_tag: None,
            content_tag: None,
            file_type: FileType::Directory,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.file_type.is_directory()
    }
}
