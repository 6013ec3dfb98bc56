//! Configuration schema types.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod logging;
mod realtime;

pub use logging::*;
pub use realtime::*;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchsideConfig {
    pub realtime: RealtimeSettings,
    pub logging: LoggingConfig,
}
