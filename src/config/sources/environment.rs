//! Environment variable source: ARBOR__ prefix with __ separator

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

/// Add environment variable overlay to builder.
///
/// `ARBOR__WALKER__LAP_INTERVAL_MS=50` sets `walker.lap_interval_ms`. The
/// double underscore after the prefix keeps the `ARBOR_LOG*` logging
/// variables out of the config tree.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let builder = builder.add_source(
        Environment::with_prefix("ARBOR")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );
    Ok(builder)
}
