//! ConfigLoader facade delegating to merge service.

use super::merge::service::MergeService;
use super::ArborConfig;
use crate::error::ApiError;
use std::path::Path;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from the global file (if any) and the environment.
    pub fn load() -> Result<ArborConfig, ApiError> {
        MergeService::load(None)
    }

    /// Load with `path` layered over the global file. The file must exist.
    pub fn load_from_file(path: &Path) -> Result<ArborConfig, ApiError> {
        MergeService::load(Some(path))
    }
}
