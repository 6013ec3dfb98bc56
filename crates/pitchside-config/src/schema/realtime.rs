//! Realtime client configuration types.

use serde::{Deserialize, Serialize};

/// Automatic reconnect budget and backoff curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Automatic attempts per channel before giving up (valid range: 1-20).
    pub max_attempts: u32,
    /// First backoff delay; doubles on every failed attempt.
    pub base_delay_ms: u64,
    /// Upper bound for any single backoff delay.
    pub max_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

/// Connection settings for the match-simulation and notification hubs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSettings {
    pub base_url: String,
    pub simulation_hub_path: String,
    pub notification_hub_path: String,
    pub connect_timeout_secs: u64,
    pub invoke_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
    /// Silence on the socket for this long closes the connection.
    pub server_timeout_secs: u64,
    pub reconnect: ReconnectSettings,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".into(),
            simulation_hub_path: "/matchSimulationHub".into(),
            notification_hub_path: "/Notify".into(),
            connect_timeout_secs: 15,
            invoke_timeout_secs: 30,
            keepalive_interval_secs: 15,
            server_timeout_secs: 30,
            reconnect: ReconnectSettings::default(),
        }
    }
}
