//! Reading and validating a config file.

use std::path::Path;

use pitchside_common::ConfigError;
use tracing::{debug, info};

use super::paths::{create_default_config, default_config_path};
use crate::schema::PitchsideConfig;
use crate::validation;

/// Load and validate one TOML file. Missing keys take their defaults;
/// out-of-range values are an error, never silently clamped.
pub fn load_from_path(path: &Path) -> Result<PitchsideConfig, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::FileNotFound(path.to_path_buf()))
        }
        Err(e) => {
            return Err(ConfigError::ParseError(format!(
                "cannot read {}: {e}",
                path.display()
            )))
        }
    };

    let config: PitchsideConfig = toml::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
    validation::validate(&config)?;

    debug!(path = %path.display(), "Config loaded");
    Ok(config)
}

/// Load from [`default_config_path`], writing the commented default file
/// first if there is none.
pub fn load_default() -> Result<PitchsideConfig, ConfigError> {
    let path = default_config_path()?;
    if !path.exists() {
        info!(path = %path.display(), "No config file, using defaults");
        create_default_config(&path)?;
        return Ok(PitchsideConfig::default());
    }
    load_from_path(&path)
}
