//! Client construction parameters.

use std::time::Duration;

use crate::policy::ReconnectPolicy;
use crate::protocol::ChannelKind;
use crate::transport::TransportOptions;

/// Endpoints, timeouts, and reconnect policy for a [`RealtimeClient`].
///
/// [`RealtimeClient`]: crate::RealtimeClient
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Base URL of the API host, e.g. `https://api.example.com`.
    pub base_url: String,
    pub simulation_hub_path: String,
    pub notification_hub_path: String,
    /// Upper bound on one connection attempt, handshake included.
    pub connect_timeout: Duration,
    pub policy: ReconnectPolicy,
    pub transport: TransportOptions,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".into(),
            simulation_hub_path: "/matchSimulationHub".into(),
            notification_hub_path: "/Notify".into(),
            connect_timeout: Duration::from_secs(15),
            policy: ReconnectPolicy::default(),
            transport: TransportOptions::default(),
        }
    }
}

impl RealtimeConfig {
    /// Full hub endpoint for a channel.
    pub fn endpoint(&self, kind: ChannelKind) -> String {
        let path = match kind {
            ChannelKind::Simulation => &self.simulation_hub_path,
            ChannelKind::Notifications => &self.notification_hub_path,
        };
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
