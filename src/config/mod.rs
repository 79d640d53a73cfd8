mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{LoggingSettings, NodeSettings, Settings, SyncSettings};

/// Prefix for environment overrides, e.g. `EDGE_SYNC__BATCH_SIZE=50`.
pub const ENV_PREFIX: &str = "EDGE";

/// Loads `config/default.*` (if present) plus `EDGE_*` environment variables
/// and merges them with default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    load("config/default", false)
}

/// Same as `load_config`, but reads the given file, which must exist.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    load(path, true)
}

fn load(path: &str, required: bool) -> Result<Settings, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name(path).required(required))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;
    Ok(partial.merge_with_defaults())
}
