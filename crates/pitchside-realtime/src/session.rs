//! Session-wide auth suppression shared by both channels.

use std::sync::Arc;

use tokio::sync::watch;

/// Tripped when any channel sees an auth failure. While tripped no channel
/// schedules automatic reconnects; a manual connect clears it.
#[derive(Debug, Clone)]
pub struct SessionGate {
    suppressed: Arc<watch::Sender<bool>>,
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            suppressed: Arc::new(tx),
        }
    }

    /// Returns true if this call tripped the gate.
    pub fn suppress(&self) -> bool {
        self.suppressed.send_if_modified(|s| !std::mem::replace(s, true))
    }

    pub fn clear(&self) {
        self.suppressed.send_if_modified(|s| std::mem::replace(s, false));
    }

    pub fn is_suppressed(&self) -> bool {
        *self.suppressed.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.suppressed.subscribe()
    }
}
