//! Per-channel fan-out of inbound messages to registered listeners.
//!
//! The transport pump only enqueues; a dedicated worker task drains the
//! queue in receipt order and invokes listeners, so slow or failing
//! listeners never stall the socket read path.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{error, trace, warn};

use crate::error::{ListenerError, RealtimeError};
use crate::protocol::{ChannelKind, Group, InboundMessage};

type Listener = Arc<dyn Fn(&InboundMessage) -> Result<(), ListenerError> + Send + Sync>;

struct Registration {
    id: u64,
    listener: Listener,
}

/// Listeners keyed by lower-cased event name, in registration order.
type ListenerTable = HashMap<String, Vec<Registration>>;

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Where non-fatal failures are reported.
pub trait DiagnosticSink: Send + Sync {
    fn listener_failed(&self, message: &InboundMessage, error: &ListenerError);

    fn replay_failed(&self, channel: ChannelKind, group: &Group, error: &RealtimeError);
}

/// Reports failures through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn listener_failed(&self, message: &InboundMessage, error: &ListenerError) {
        error!(
            channel = %message.channel,
            event = %message.event,
            error = %error,
            "Listener failed"
        );
    }

    fn replay_failed(&self, channel: ChannelKind, group: &Group, error: &RealtimeError) {
        warn!(channel = %channel, group = %group, error = %error, "Group rejoin failed");
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Returned by registration; pass back to unregister that one listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    channel: ChannelKind,
    id: u64,
}

impl ListenerHandle {
    pub fn channel(&self) -> ChannelKind {
        self.channel
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct EventDispatcher {
    channel: ChannelKind,
    listeners: Arc<RwLock<ListenerTable>>,
    queue: mpsc::UnboundedSender<InboundMessage>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    /// Create a dispatcher and spawn its delivery worker.
    ///
    /// Must be called from within a tokio runtime. The worker exits once the
    /// dispatcher is dropped and its queue drained.
    pub fn new(channel: ChannelKind, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        let listeners = Arc::new(RwLock::new(ListenerTable::new()));
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(delivery_loop(rx, Arc::clone(&listeners), diagnostics));
        Self {
            channel,
            listeners,
            queue,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn channel(&self) -> ChannelKind {
        self.channel
    }

    /// Register a listener for an event. Event names match case-insensitively.
    pub fn register<F>(&self, event: &str, listener: F) -> ListenerHandle
    where
        F: Fn(&InboundMessage) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_lowercase())
            .or_default()
            .push(Registration {
                id,
                listener: Arc::new(listener),
            });
        ListenerHandle {
            channel: self.channel,
            id,
        }
    }

    /// Remove one listener. Returns false if the handle is unknown here.
    pub fn unregister(&self, handle: ListenerHandle) -> bool {
        if handle.channel != self.channel {
            return false;
        }
        let mut table = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        table.retain(|_, regs| {
            let before = regs.len();
            regs.retain(|r| r.id != handle.id);
            removed |= regs.len() != before;
            !regs.is_empty()
        });
        removed
    }

    /// Remove every listener for one event. Returns how many were removed.
    pub fn unregister_event(&self, event: &str) -> usize {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&event.to_lowercase())
            .map_or(0, |regs| regs.len())
    }

    pub fn remove_all(&self) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Queue a message for delivery. Never blocks.
    pub fn dispatch(&self, message: InboundMessage) {
        if self.queue.send(message).is_err() {
            warn!(channel = %self.channel, "Dispatch worker gone, message dropped");
        }
    }
}

async fn delivery_loop(
    mut rx: mpsc::UnboundedReceiver<InboundMessage>,
    listeners: Arc<RwLock<ListenerTable>>,
    diagnostics: Arc<dyn DiagnosticSink>,
) {
    while let Some(message) = rx.recv().await {
        // Snapshot so listeners may (un)register from inside a callback.
        let targets: Vec<Listener> = listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&message.event.to_lowercase())
            .map(|regs| regs.iter().map(|r| Arc::clone(&r.listener)).collect())
            .unwrap_or_default();

        if targets.is_empty() {
            trace!(channel = %message.channel, event = %message.event, "No listeners");
            continue;
        }

        for listener in targets {
            deliver(&listener, &message, diagnostics.as_ref());
        }
    }
}

/// Invoke one listener, turning both errors and panics into diagnostics.
fn deliver(listener: &Listener, message: &InboundMessage, diagnostics: &dyn DiagnosticSink) {
    match panic::catch_unwind(AssertUnwindSafe(|| (listener.as_ref())(message))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => diagnostics.listener_failed(message, &e),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "listener panicked".to_string());
            let e: ListenerError = format!("listener panicked: {reason}").into();
            diagnostics.listener_failed(message, &e);
        }
    }
}
