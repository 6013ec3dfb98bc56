//! Credential source consulted on every connection attempt.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

/// Supplies the bearer token for hub connections.
///
/// `current_token` is read at the moment of every attempt, never cached
/// across attempts, so a token refreshed mid-session is picked up by the
/// next reconnect.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    fn current_token(&self) -> Option<String>;

    fn is_authenticated(&self) -> bool;

    /// Give the provider a chance to refresh its credentials.
    /// Returns whether the session is usable afterwards.
    async fn refresh(&self) -> bool {
        self.is_authenticated()
    }
}

/// Token provider backed by a settable in-memory token.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    token: RwLock<Option<String>>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    fn current_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|t| !t.is_empty())
    }

    fn is_authenticated(&self) -> bool {
        self.current_token().is_some()
    }
}
