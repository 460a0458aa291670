//! StorageConfig: where the tree index lives.

use crate::config::xdg;
use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_tree_name() -> String {
    "file-index".to_string()
}

fn default_flush_on_commit() -> bool {
    true
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Index directory; None means the platform data directory
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Name of the sled tree holding nodes and attachments
    #[serde(default = "default_tree_name")]
    pub tree_name: String,

    /// Flush to disk before a commit returns
    #[serde(default = "default_flush_on_commit")]
    pub flush_on_commit: bool,
}

impl StorageConfig {
    /// Resolve the index directory.
    pub fn resolve_path(&self) -> Result<PathBuf, ApiError> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Ok(xdg::data_dir()?.join("index")),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            tree_name: default_tree_name(),
            flush_on_commit: default_flush_on_commit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let config = StorageConfig {
            path: Some(PathBuf::from("/var/lib/arbor")),
            ..StorageConfig::default()
        };
        assert_eq!(config.resolve_path().unwrap(), PathBuf::from("/var/lib/arbor"));
    }
}
