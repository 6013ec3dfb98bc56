//! pitchside-monitor: watch the match-simulation and notification hubs.
//!
//! Connects both realtime channels, joins the groups named on the command
//! line, and logs every event the server pushes until interrupted.

mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pitchside_common::PitchsideError;
use pitchside_config::{config_to_json, load_config, load_from_path, PitchsideConfig};
use pitchside_realtime::{
    HubEvent, NotificationEvent, RealtimeClient, SimulationEvent, StaticTokenProvider,
};

#[derive(Parser)]
#[command(name = "pitchside-monitor", about = "Log live match-simulation and notification events")]
struct Args {
    /// Config file. Defaults to the platform config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the API base URL from the config file.
    #[arg(long)]
    base_url: Option<String>,

    /// Simulation to join. May be repeated.
    #[arg(short, long = "simulation")]
    simulations: Vec<String>,

    /// User whose notification group to join.
    #[arg(short, long)]
    user: Option<String>,

    /// Bearer token for both hubs.
    #[arg(long, env = "PITCHSIDE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log connection stats every N seconds (0 disables).
    #[arg(long, default_value_t = 0)]
    stats_interval: u64,

    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("pitchside-monitor: {e}");
            return ExitCode::FAILURE;
        }
    };
    if args.print_config {
        println!("{}", config_to_json(&config));
        return ExitCode::SUCCESS;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_filter().into()),
        )
        .init();

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Monitor stopped");
            ExitCode::FAILURE
        }
    }
}

fn load(args: &Args) -> Result<PitchsideConfig, PitchsideError> {
    let mut config = match &args.config {
        Some(path) => load_from_path(path)?,
        None => load_config()?,
    };
    if let Some(url) = &args.base_url {
        config.realtime.base_url = url.clone();
        pitchside_config::validation::validate(&config)?;
    }
    Ok(config)
}

async fn run(args: Args, config: PitchsideConfig) -> Result<(), PitchsideError> {
    let tokens = Arc::new(StaticTokenProvider::new(args.token.clone()));
    let client = RealtimeClient::new(settings::realtime_config(&config.realtime), tokens);
    tracing::info!(client = %client.id(), base_url = %config.realtime.base_url, "pitchside-monitor starting");

    for event in SimulationEvent::ALL {
        log_event(&client, event);
    }
    for event in NotificationEvent::ALL {
        log_event(&client, event);
    }

    if !client.ensure_connected().await {
        return Err(PitchsideError::Realtime(
            "could not connect to the realtime hubs".into(),
        ));
    }

    for simulation in &args.simulations {
        client
            .join_simulation(simulation)
            .await
            .map_err(|e| PitchsideError::Realtime(e.to_string()))?;
    }
    if let Some(user) = &args.user {
        client
            .join_user_notifications(user)
            .await
            .map_err(|e| PitchsideError::Realtime(e.to_string()))?;
    }

    let stats_task = (args.stats_interval > 0).then(|| {
        let every = Duration::from_secs(args.stats_interval);
        let simulation = client.simulation().clone();
        let notifications = client.notifications().clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                let stats = serde_json::json!({
                    "simulation": simulation.stats(),
                    "notifications": notifications.stats(),
                });
                tracing::info!(stats = %stats, "Connection stats");
            }
        })
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupted, shutting down");

    if let Some(task) = stats_task {
        task.abort();
    }
    client.cleanup().await;
    Ok(())
}

/// Log every occurrence of `event` with its payload.
fn log_event<E: HubEvent>(client: &RealtimeClient, event: E) {
    let name = event.name();
    client.on(event, move |message| {
        let payload = serde_json::Value::Array(message.arguments.clone());
        tracing::info!(channel = %message.channel, event = name, payload = %payload, "Event");
        Ok(())
    });
}
