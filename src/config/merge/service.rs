//! MergeService: orchestrates sources and deserializes to ArborConfig.

use crate::config::sources::{environment, global_file};
use crate::config::ArborConfig;
use crate::error::ApiError;
use config::{Config, File, FileFormat};
use std::path::Path;

/// Merge service for config composition.
pub struct MergeService;

impl MergeService {
    /// Precedence: defaults (lowest) -> global file -> explicit file -> environment (highest).
    pub fn load(explicit: Option<&Path>) -> Result<ArborConfig, ApiError> {
        let defaults = Config::try_from(&ArborConfig::default())?;
        let builder = Config::builder().add_source(defaults);
        let builder = global_file::add_to_builder(builder)?;
        let builder = match explicit {
            Some(path) => {
                if !path.is_file() {
                    return Err(ApiError::ConfigError(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                let format = match path.extension().and_then(|e| e.to_str()) {
                    Some("json") => FileFormat::Json,
                    _ => FileFormat::Toml,
                };
                builder.add_source(File::from(path).format(format))
            }
            None => builder,
        };
        let builder = environment::add_to_builder(builder)?;

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}
