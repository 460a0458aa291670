//! Hints: caller-supplied observations of namespace state
//!
//! A hint is not a command. Submitting the same hint twice leaves the index in
//! the same state and produces events only the first time.

use crate::tree::{FileRecord, Url};

/// Observation submitted to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hint {
    /// Observation of exactly one path; `None` means observed absent.
    File { url: Url, record: Option<FileRecord> },
    /// Complete listing of one directory's immediate children.
    Directory {
        url: Url,
        children: Vec<(String, FileRecord)>,
    },
    /// The subtree at `url` no longer exists.
    Deleted { url: Url },
}

impl Hint {
    pub fn file(url: impl Into<Url>, record: Option<FileRecord>) -> Self {
        Hint::File {
            url: url.into(),
            record,
        }
    }

    pub fn directory(url: impl Into<Url>, children: Vec<(String, FileRecord)>) -> Self {
        Hint::Directory {
            url: url.into(),
            children,
        }
    }

    pub fn deleted(url: impl Into<Url>) -> Self {
        Hint::Deleted { url: url.into() }
    }

    pub fn url(&self) -> &Url {
        match self {
            Hint::File { url, .. } | Hint::Directory { url, .. } | Hint::Deleted { url } => url,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Hint::File { record: Some(_), .. } => "file",
            Hint::File { record: None, .. } => "file-absent",
            Hint::Directory { .. } => "directory",
            Hint::Deleted { .. } => "deleted",
        }
    }
}
