//! Default config file contents.

/// Generate the default TOML config content with comments.
pub fn default_config_toml() -> String {
    r##"# Pitchside Configuration
# Only override what you want to change -- missing fields use defaults.

[realtime]
# base_url = "http://localhost:5000"
# simulation_hub_path = "/matchSimulationHub"
# notification_hub_path = "/Notify"
# connect_timeout_secs = 15
# invoke_timeout_secs = 30
# keepalive_interval_secs = 15   # must be below server_timeout_secs
# server_timeout_secs = 30

[realtime.reconnect]
# max_attempts = 5               # 1-20
# base_delay_ms = 1000           # 10-60000, doubles per attempt
# max_delay_ms = 30000

[logging]
# level = "info"                 # trace, debug, info, warn, error
"##
    .to_string()
}
