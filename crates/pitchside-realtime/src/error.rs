//! Error taxonomy for the realtime client.

use crate::policy::FailureClass;
use crate::protocol::ChannelKind;

/// Error raised inside a listener callback. Reported, never propagated.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RealtimeError {
    /// Token missing, rejected, or expired.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// Drop, handshake failure, or close without an auth signal.
    #[error("transient network failure: {0}")]
    Transient(String),

    #[error("{0} channel is not connected")]
    NotConnected(ChannelKind),

    #[error("remote call {method} failed: {message}")]
    Invocation { method: String, message: String },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The attempt finished after `disconnect()` and was torn down.
    #[error("connection attempt superseded by disconnect")]
    Superseded,
}

impl RealtimeError {
    /// Failure class that drives the reconnect decision.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            RealtimeError::AuthFailure(_) => FailureClass::AuthFailure,
            RealtimeError::Superseded => FailureClass::Manual,
            _ => FailureClass::Transient,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, RealtimeError::AuthFailure(_))
    }
}
