//! Real-time event client for the match-simulation and notification hubs.
//!
//! Two long-lived hub connections are kept alive across network drops,
//! re-authenticated on every attempt, re-joined to their groups after each
//! reconnect, and fan inbound messages out to listeners off the read path.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pitchside_realtime::{RealtimeClient, RealtimeConfig, SimulationEvent, StaticTokenProvider};
//!
//! # async fn run() {
//! let tokens = Arc::new(StaticTokenProvider::new(Some("jwt".into())));
//! let client = RealtimeClient::new(RealtimeConfig::default(), tokens);
//! client.on(SimulationEvent::MatchEvent, |msg| {
//!     println!("{:?}", msg.arguments);
//!     Ok(())
//! });
//! if client.ensure_connected().await {
//!     let _ = client.join_simulation("42").await;
//! }
//! # }
//! ```

mod client;
mod config;
mod connection;
mod dispatcher;
mod error;
mod policy;
mod protocol;
mod session;
mod subscriptions;
mod token;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{ConnectionStats, RealtimeClient};
pub use config::RealtimeConfig;
pub use connection::{ChannelConnection, ChannelStats, ConnectionState};
pub use dispatcher::{DiagnosticSink, EventDispatcher, ListenerHandle, TracingDiagnostics};
pub use error::{ListenerError, RealtimeError};
pub use policy::{FailureClass, ReconnectCounter, ReconnectDecision, ReconnectPolicy};
pub use protocol::{
    methods, ChannelKind, Group, HubEvent, InboundMessage, NotificationEvent, SimulationEvent,
};
pub use session::SessionGate;
pub use subscriptions::{ReplayReport, SubscriptionRegistry};
pub use token::{StaticTokenProvider, TokenProvider};
