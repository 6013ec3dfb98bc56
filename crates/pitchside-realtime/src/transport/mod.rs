//! Transport seam between a channel connection and the wire.
//!
//! A [`Connector`] opens one authenticated hub connection and hands back a
//! [`TransportLink`]: a sink for outbound calls plus a stream of inbound
//! [`TransportEvent`]s. Transports never reconnect on their own; every
//! close is reported and the channel's reconnect policy decides what next.

pub mod hub_protocol;
mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RealtimeError;

pub use websocket::{TransportOptions, WebSocketConnector};

/// What a live transport reports to its owning channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Server invoked a client method.
    Message {
        target: String,
        arguments: Vec<serde_json::Value>,
    },
    /// Transport lost its link and is re-establishing it itself.
    Reconnecting,
    /// Transport re-established its link; groups must be re-joined.
    Reconnected,
    /// Link is gone. `None` means a clean close.
    Closed(Option<RealtimeError>),
}

/// Outbound half of a live connection.
#[async_trait]
pub trait TransportSink: Send + Sync {
    /// Call a hub method and wait for its completion.
    async fn invoke(
        &self,
        target: &str,
        arguments: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RealtimeError>;

    /// Tear the connection down. Safe to call more than once.
    async fn close(&self);
}

/// A freshly opened connection.
pub struct TransportLink {
    pub sink: std::sync::Arc<dyn TransportSink>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens connections to a hub endpoint with a bearer token.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str, token: &str) -> Result<TransportLink, RealtimeError>;
}
