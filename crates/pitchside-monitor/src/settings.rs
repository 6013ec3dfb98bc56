//! Turns loaded configuration into realtime client parameters.

use std::time::Duration;

use pitchside_config::{RealtimeSettings, ReconnectSettings};
use pitchside_realtime::transport::TransportOptions;
use pitchside_realtime::{RealtimeConfig, ReconnectPolicy};

pub fn realtime_config(settings: &RealtimeSettings) -> RealtimeConfig {
    RealtimeConfig {
        base_url: settings.base_url.clone(),
        simulation_hub_path: settings.simulation_hub_path.clone(),
        notification_hub_path: settings.notification_hub_path.clone(),
        connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
        policy: reconnect_policy(&settings.reconnect),
        transport: TransportOptions {
            keepalive_interval: Duration::from_secs(settings.keepalive_interval_secs),
            server_timeout: Duration::from_secs(settings.server_timeout_secs),
            invoke_timeout: Duration::from_secs(settings.invoke_timeout_secs),
        },
    }
}

fn reconnect_policy(settings: &ReconnectSettings) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts: settings.max_attempts,
        base_delay: Duration::from_millis(settings.base_delay_ms),
        max_delay: Duration::from_millis(settings.max_delay_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitchside_realtime::ChannelKind;

    #[test]
    fn defaults_map_onto_client_defaults() {
        let config = realtime_config(&RealtimeSettings::default());
        let expected = RealtimeConfig::default();
        assert_eq!(config.policy, expected.policy);
        assert_eq!(config.connect_timeout, expected.connect_timeout);
        assert_eq!(
            config.endpoint(ChannelKind::Simulation),
            expected.endpoint(ChannelKind::Simulation)
        );
    }

    #[test]
    fn custom_values_carry_over() {
        let mut settings = RealtimeSettings::default();
        settings.base_url = "https://api.pitchside.test".into();
        settings.reconnect.max_attempts = 8;
        settings.reconnect.base_delay_ms = 250;
        settings.invoke_timeout_secs = 5;

        let config = realtime_config(&settings);
        assert_eq!(config.policy.max_attempts, 8);
        assert_eq!(config.policy.base_delay, Duration::from_millis(250));
        assert_eq!(config.transport.invoke_timeout, Duration::from_secs(5));
        assert_eq!(
            config.endpoint(ChannelKind::Notifications),
            "https://api.pitchside.test/Notify"
        );
    }
}
