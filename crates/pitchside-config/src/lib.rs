//! Pitchside configuration.
//!
//! TOML-based settings for the realtime client and logging. Every section
//! uses serde defaults so partial files work out of the box.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pitchside_config::load_config;
//!
//! let config = load_config().expect("failed to load config");
//! println!("{}", config.realtime.base_url);
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{LogLevel, LoggingConfig, PitchsideConfig, RealtimeSettings, ReconnectSettings};
pub use toml_loader::{default_config_path, load_default, load_from_path};

use pitchside_common::ConfigError;

/// Load config from the platform default path, creating it if missing.
pub fn load_config() -> Result<PitchsideConfig, ConfigError> {
    toml_loader::load_default()
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &PitchsideConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}
