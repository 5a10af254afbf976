mod settings;

use std::path::Path;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{ClientSettings, LoggingSettings, ServerSettings, SessionSettings, Settings};

/// Prefix of environment overrides, e.g. `STOMPCHAT_CLIENT__URL`.
pub const ENV_PREFIX: &str = "STOMPCHAT";

/// Load `config/default.*` from the working directory, then environment
/// overrides, merged over the defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(Path::new("."))
}

/// Same as `load_config` with `config/default.*` resolved under `base`.
pub fn load_config_from(base: &Path) -> Result<Settings, ConfigError> {
    let config = Config::builder()
        .add_source(File::from(base.join("config").join("default")).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let partial: PartialSettings = config.try_deserialize()?;
    Ok(partial.merge(Settings::default()))
}
