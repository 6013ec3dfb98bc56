//! Configuration validation.
//!
//! Collects every violation so a single error lists all of them.

use crate::schema::{PitchsideConfig, RealtimeSettings};
use pitchside_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &PitchsideConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_realtime(&mut errors, &config.realtime);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn validate_realtime(errors: &mut Vec<String>, rt: &RealtimeSettings) {
    let base = rt.base_url.trim();
    if base.is_empty() {
        errors.push("realtime.base_url must not be empty".into());
    } else if !["http://", "https://", "ws://", "wss://"]
        .iter()
        .any(|scheme| base.starts_with(scheme))
    {
        errors.push(format!(
            "realtime.base_url = {base:?} must use http, https, ws or wss"
        ));
    }

    validate_hub_path(errors, "realtime.simulation_hub_path", &rt.simulation_hub_path);
    validate_hub_path(errors, "realtime.notification_hub_path", &rt.notification_hub_path);

    validate_range(errors, "realtime.connect_timeout_secs", rt.connect_timeout_secs, 1, 300);
    validate_range(errors, "realtime.invoke_timeout_secs", rt.invoke_timeout_secs, 1, 300);
    validate_range(errors, "realtime.keepalive_interval_secs", rt.keepalive_interval_secs, 1, 300);
    validate_range(errors, "realtime.server_timeout_secs", rt.server_timeout_secs, 1, 600);
    if rt.keepalive_interval_secs >= rt.server_timeout_secs {
        errors.push(format!(
            "realtime.keepalive_interval_secs = {} must be below realtime.server_timeout_secs = {}",
            rt.keepalive_interval_secs, rt.server_timeout_secs
        ));
    }

    let reconnect = &rt.reconnect;
    validate_range(
        errors,
        "realtime.reconnect.max_attempts",
        u64::from(reconnect.max_attempts),
        1,
        20,
    );
    validate_range(errors, "realtime.reconnect.base_delay_ms", reconnect.base_delay_ms, 10, 60_000);
    if reconnect.max_delay_ms < reconnect.base_delay_ms {
        errors.push(format!(
            "realtime.reconnect.max_delay_ms = {} must be >= base_delay_ms = {}",
            reconnect.max_delay_ms, reconnect.base_delay_ms
        ));
    }
}

fn validate_hub_path(errors: &mut Vec<String>, name: &str, value: &str) {
    if !value.starts_with('/') {
        errors.push(format!("{name} = {value:?} must start with '/'"));
    }
}

fn validate_range(errors: &mut Vec<String>, name: &str, value: u64, min: u64, max: u64) {
    if value < min || value > max {
        errors.push(format!("{name} = {value} is out of range [{min}, {max}]"));
    }
}
