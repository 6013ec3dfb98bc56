//! One hub connection: lifecycle state machine, automatic reconnect, group
//! replay, and inbound fan-out.
//!
//! A [`ChannelConnection`] owns at most one live transport link. Every
//! failure, whether a failed attempt or a dropped link, is classified and
//! handed to the [`ReconnectPolicy`]; the resulting timer is the only retry
//! loop. Background tasks hold weak references, so dropping the last handle
//! tears everything down.

mod state;


use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use pitchside_common::new_correlation_id;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::RealtimeConfig;
use crate::dispatcher::{DiagnosticSink, EventDispatcher, ListenerHandle};
use crate::error::{ListenerError, RealtimeError};
use crate::policy::{FailureClass, ReconnectCounter, ReconnectPolicy};
use crate::protocol::{ChannelKind, Group, InboundMessage};
use crate::session::SessionGate;
use crate::subscriptions::{replay_groups, ReplayReport, SubscriptionRegistry};
use crate::token::TokenProvider;
use crate::transport::{Connector, TransportEvent, TransportLink, TransportSink};

pub use state::ConnectionState;

/// Snapshot of one channel for operational tooling.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub channel: ChannelKind,
    pub endpoint: String,
    pub state: ConnectionState,
    pub attempts: u32,
    pub has_connection: bool,
    pub last_failure: Option<FailureClass>,
    pub groups: usize,
    pub listeners: usize,
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Manual,
    Automatic,
}

struct LiveLink {
    id: u64,
    sink: Arc<dyn TransportSink>,
    pump: JoinHandle<()>,
}

struct ConnectionInner {
    kind: ChannelKind,
    endpoint: String,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    gate: SessionGate,
    state: watch::Sender<ConnectionState>,
    counter: Mutex<ReconnectCounter>,
    link: Mutex<Option<LiveLink>>,
    link_seq: AtomicU64,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    /// Bumped by `disconnect()`; attempts and timers from an older
    /// generation discard their result.
    generation: AtomicU64,
    /// Serializes connection attempts.
    connect_lock: tokio::sync::Mutex<()>,
    subscriptions: SubscriptionRegistry,
    dispatcher: EventDispatcher,
    diagnostics: Arc<dyn DiagnosticSink>,
}

/// Handle to one hub connection. Clones share the same connection.
#[derive(Clone)]
pub struct ChannelConnection {
    inner: Arc<ConnectionInner>,
}

impl ChannelConnection {
    /// Must be called from within a tokio runtime.
    pub(crate) fn new(
        kind: ChannelKind,
        config: &RealtimeConfig,
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenProvider>,
        gate: SessionGate,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let inner = ConnectionInner {
            kind,
            endpoint: config.endpoint(kind),
            connector,
            tokens,
            policy: config.policy,
            connect_timeout: config.connect_timeout,
            gate,
            state,
            counter: Mutex::new(ReconnectCounter::new()),
            link: Mutex::new(None),
            link_seq: AtomicU64::new(1),
            reconnect_timer: Mutex::new(None),
            generation: AtomicU64::new(0),
            connect_lock: tokio::sync::Mutex::new(()),
            subscriptions: SubscriptionRegistry::new(),
            dispatcher: EventDispatcher::new(kind, Arc::clone(&diagnostics)),
            diagnostics,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.inner.kind
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn attempts(&self) -> u32 {
        self.inner.lock_counter().attempts()
    }

    pub fn has_live_link(&self) -> bool {
        self.inner.lock_link().is_some()
    }

    pub fn subscriptions(&self) -> Vec<Group> {
        self.inner.subscriptions.snapshot()
    }

    pub fn stats(&self) -> ChannelStats {
        let counter = self.inner.lock_counter().clone();
        ChannelStats {
            channel: self.inner.kind,
            endpoint: self.inner.endpoint.clone(),
            state: self.state(),
            attempts: counter.attempts(),
            has_connection: self.has_live_link(),
            last_failure: counter.last_failure(),
            groups: self.inner.subscriptions.len(),
            listeners: self.inner.dispatcher.listener_count(),
        }
    }

    /// Open the connection.
    ///
    /// Returns immediately if already connected. Otherwise this is a manual
    /// attempt: the retry budget is reset, any pending reconnect timer is
    /// cancelled and session-wide auth suppression is lifted before trying.
    pub async fn connect(&self) -> Result<(), RealtimeError> {
        self.open().await.map(|_| ())
    }

    /// Manual attempt. Yields the replay report when this call opened the
    /// link, `None` when it was already up.
    async fn open(&self) -> Result<Option<ReplayReport>, RealtimeError> {
        let inner = &self.inner;
        let _guard = inner.connect_lock.lock().await;
        if inner.state() == ConnectionState::Connected {
            trace!(channel = %inner.kind, "Already connected");
            return Ok(None);
        }

        inner.cancel_reconnect_timer();
        inner.lock_counter().reset();
        inner.gate.clear();
        inner.attempt(Trigger::Manual).await.map(Some)
    }

    /// Tear the connection down. Safe from any state; listeners and the
    /// group record are kept.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        // State and link change together so a concurrent attempt never
        // observes a half-torn-down channel.
        let link = {
            let mut slot = inner.lock_link();
            inner.generation.fetch_add(1, Ordering::SeqCst);
            if inner.state() != ConnectionState::Disconnected {
                inner.set_state(ConnectionState::Disconnecting);
            }
            let link = slot.take();
            inner.set_state(ConnectionState::Disconnected);
            link
        };
        inner.cancel_reconnect_timer();
        inner.lock_counter().note_manual_disconnect();

        if let Some(link) = link {
            link.pump.abort();
            link.sink.close().await;
        }
        info!(channel = %inner.kind, "Disconnected");
    }

    /// Call a hub method. Fails with `NotConnected` unless connected.
    pub async fn invoke(
        &self,
        method: &str,
        arguments: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RealtimeError> {
        self.inner.invoke(method, arguments).await
    }

    /// Join a group, connecting first if needed. The group is recorded
    /// only once the server accepted the join.
    pub async fn join(&self, group: Group) -> Result<(), RealtimeError> {
        let inner = &self.inner;
        if group.channel() != inner.kind {
            return Err(RealtimeError::Protocol(format!(
                "group {group} belongs to the {} channel",
                group.channel()
            )));
        }

        if inner.state() != ConnectionState::Connected {
            let recorded = inner.subscriptions.contains(&group);
            let report = self.open().await?;
            if recorded {
                // The connect already replayed this group.
                if let Some((_, error)) = report
                    .into_iter()
                    .flat_map(|r| r.failed)
                    .find(|(failed, _)| *failed == group)
                {
                    return Err(error);
                }
                debug!(channel = %inner.kind, group = %group, "Group rejoined by replay");
                return Ok(());
            }
        }
        inner
            .invoke(group.join_method(), vec![group.argument()])
            .await?;

        if inner.subscriptions.record(group.clone()) {
            info!(channel = %inner.kind, group = %group, "Joined group");
        }
        Ok(())
    }

    /// Leave a group. The local record is removed even when disconnected;
    /// the remote leave is only sent on a live connection.
    pub async fn leave(&self, group: &Group) -> Result<(), RealtimeError> {
        let inner = &self.inner;
        if inner.subscriptions.remove(group) {
            info!(channel = %inner.kind, group = %group, "Left group");
        }
        if inner.state() == ConnectionState::Connected {
            inner
                .invoke(group.leave_method(), vec![group.argument()])
                .await?;
        }
        Ok(())
    }

    pub fn on<F>(&self, event: &str, listener: F) -> ListenerHandle
    where
        F: Fn(&InboundMessage) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.inner.dispatcher.register(event, listener)
    }

    pub fn off(&self, handle: ListenerHandle) -> bool {
        self.inner.dispatcher.unregister(handle)
    }

    pub fn remove_listeners(&self, event: &str) -> usize {
        self.inner.dispatcher.unregister_event(event)
    }

    pub fn remove_all_listeners(&self) {
        self.inner.dispatcher.remove_all();
    }

    /// Spend the retry budget so no automatic reconnect is scheduled.
    pub(crate) fn exhaust_retries(&self) {
        self.inner.lock_counter().exhaust(&self.inner.policy);
    }

    pub(crate) fn reset_counter(&self) {
        self.inner.lock_counter().reset();
    }

    pub(crate) fn clear_subscriptions(&self) {
        self.inner.subscriptions.clear();
    }
}

impl ConnectionInner {
    fn lock_counter(&self) -> MutexGuard<'_, ReconnectCounter> {
        self.counter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_link(&self) -> MutexGuard<'_, Option<LiveLink>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let kind = self.kind;
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                warn!(channel = %kind, from = %current, to = %next, "Ignoring invalid state transition");
                return false;
            }
            debug!(channel = %kind, from = %current, to = %next, "State change");
            *current = next;
            true
        });
    }

    fn is_current(&self, link_id: u64) -> bool {
        self.lock_link().as_ref().is_some_and(|l| l.id == link_id)
    }

    fn cancel_reconnect_timer(&self) {
        let timer = self
            .reconnect_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.abort();
            debug!(channel = %self.kind, "Cancelled pending reconnect");
        }
    }

    async fn invoke(
        &self,
        method: &str,
        arguments: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RealtimeError> {
        let sink = {
            let slot = self.lock_link();
            match slot.as_ref() {
                Some(link) if self.state() == ConnectionState::Connected => Arc::clone(&link.sink),
                _ => return Err(RealtimeError::NotConnected(self.kind)),
            }
        };
        trace!(channel = %self.kind, method, "Invoking hub method");
        sink.invoke(method, arguments).await
    }

    /// One connection attempt. Caller holds `connect_lock`.
    async fn attempt(self: &Arc<Self>, trigger: Trigger) -> Result<ReplayReport, RealtimeError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let attempt_id = new_correlation_id();
        self.retire_link().await;
        self.set_state(ConnectionState::Connecting);

        // Token is read fresh for every attempt.
        let Some(token) = self.tokens.current_token() else {
            let error = RealtimeError::AuthFailure("no token available".into());
            warn!(channel = %self.kind, attempt = %attempt_id, "No token, not connecting");
            self.fail_attempt(generation, &error);
            return Err(error);
        };

        info!(
            channel = %self.kind,
            attempt = %attempt_id,
            trigger = ?trigger,
            endpoint = %self.endpoint,
            "Connecting"
        );
        let result = match tokio::time::timeout(
            self.connect_timeout,
            self.connector.connect(&self.endpoint, &token),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RealtimeError::Transient(format!(
                "connect timed out after {:?}",
                self.connect_timeout
            ))),
        };

        let link = match result {
            Ok(link) => link,
            Err(error) => {
                warn!(channel = %self.kind, attempt = %attempt_id, error = %error, "Connection attempt failed");
                self.fail_attempt(generation, &error);
                return Err(error);
            }
        };

        if let Err(sink) = self.install(link, generation) {
            debug!(channel = %self.kind, attempt = %attempt_id, "Attempt superseded by disconnect");
            sink.close().await;
            self.set_state(ConnectionState::Disconnected);
            return Err(RealtimeError::Superseded);
        }
        info!(channel = %self.kind, attempt = %attempt_id, "Connected");

        Ok(self.replay_subscriptions().await)
    }

    fn fail_attempt(self: &Arc<Self>, generation: u64, error: &RealtimeError) {
        self.set_state(ConnectionState::Disconnected);
        if self.generation.load(Ordering::SeqCst) == generation {
            self.on_failure(error);
        }
    }

    /// Store a fresh link and mark the channel connected, unless a
    /// `disconnect()` ran since the attempt started.
    fn install(
        self: &Arc<Self>,
        link: TransportLink,
        generation: u64,
    ) -> Result<(), Arc<dyn TransportSink>> {
        let TransportLink { sink, events } = link;
        let mut slot = self.lock_link();
        if self.generation.load(Ordering::SeqCst) != generation {
            return Err(sink);
        }

        let id = self.link_seq.fetch_add(1, Ordering::Relaxed);
        let pump = tokio::spawn(pump(Arc::downgrade(self), id, events));
        *slot = Some(LiveLink { id, sink, pump });
        self.lock_counter().reset();
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// Close a link left over from an earlier connection, if any.
    async fn retire_link(&self) {
        let link = self.lock_link().take();
        if let Some(link) = link {
            link.pump.abort();
            self.set_state(ConnectionState::Disconnected);
            link.sink.close().await;
        }
    }

    /// Classify a failure, share auth suppression, and schedule the next
    /// automatic attempt if the policy allows one.
    fn on_failure(self: &Arc<Self>, error: &RealtimeError) {
        let class = error.failure_class();
        if class == FailureClass::AuthFailure && self.gate.suppress() {
            warn!(channel = %self.kind, "Auth failure, suppressing automatic reconnects");
        }

        let authenticated = self.tokens.is_authenticated() && !self.gate.is_suppressed();
        let (decision, attempts) = {
            let mut counter = self.lock_counter();
            let decision = counter.on_failure(&self.policy, class, authenticated);
            (decision, counter.attempts())
        };

        if decision.retry {
            self.schedule_reconnect(decision.delay, attempts);
        } else {
            info!(
                channel = %self.kind,
                attempts,
                class = ?class,
                authenticated,
                "Not reconnecting"
            );
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, delay: Duration, attempt: u32) {
        let generation = self.generation.load(Ordering::SeqCst);
        let weak = Arc::downgrade(self);
        info!(
            channel = %self.kind,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling reconnect"
        );

        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.reconnect_now(generation).await;
            }
        });
        let previous = self
            .reconnect_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(timer);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    async fn reconnect_now(self: &Arc<Self>, generation: u64) {
        // Running means this task is the pending timer; forget its handle
        // so the next schedule does not abort it.
        self.reconnect_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let _guard = self.connect_lock.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(channel = %self.kind, "Stale reconnect timer");
            return;
        }
        if self.state() == ConnectionState::Connected {
            return;
        }
        let _ = self.attempt(Trigger::Automatic).await;
    }

    /// Re-issue every recorded join in order. Failures are reported and do
    /// not stop the remaining joins.
    async fn replay_subscriptions(&self) -> ReplayReport {
        let groups = self.subscriptions.snapshot();
        if groups.is_empty() {
            return ReplayReport::default();
        }
        info!(channel = %self.kind, count = groups.len(), "Rejoining groups");

        let this = self;
        let report = replay_groups(groups, move |group| async move {
            this.invoke(group.join_method(), vec![group.argument()])
                .await
                .map(|_| ())
        })
        .await;

        for (group, error) in &report.failed {
            self.diagnostics.replay_failed(self.kind, group, error);
        }
        debug!(
            channel = %self.kind,
            succeeded = report.succeeded(),
            failed = report.failed.len(),
            "Group replay finished"
        );
        report
    }

    /// The live link ended. Stale links are ignored.
    fn handle_close(self: &Arc<Self>, link_id: u64, reason: Option<RealtimeError>) {
        let link = {
            let mut slot = self.lock_link();
            match slot.as_ref() {
                Some(l) if l.id == link_id => slot.take(),
                _ => None,
            }
        };
        if link.is_none() {
            trace!(channel = %self.kind, "Close from retired link ignored");
            return;
        }

        let error = reason
            .unwrap_or_else(|| RealtimeError::Transient("connection closed by server".into()));
        if error.is_auth_failure() {
            warn!(channel = %self.kind, error = %error, "Connection closed, credentials rejected");
        } else {
            info!(channel = %self.kind, error = %error, "Connection lost");
        }
        self.set_state(ConnectionState::Disconnected);
        self.on_failure(&error);
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        let timer = self
            .reconnect_timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.abort();
        }

        let link = self
            .link
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(link) = link {
            link.pump.abort();
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move { link.sink.close().await });
            }
        }
    }
}

/// Drain transport events for one link.
async fn pump(
    weak: Weak<ConnectionInner>,
    link_id: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Message { target, arguments } => {
                inner.dispatcher.dispatch(InboundMessage {
                    channel: inner.kind,
                    event: target,
                    arguments,
                });
            }
            TransportEvent::Reconnecting => {
                if inner.is_current(link_id) {
                    info!(channel = %inner.kind, "Transport reconnecting");
                    inner.set_state(ConnectionState::Reconnecting);
                }
            }
            TransportEvent::Reconnected => {
                if inner.is_current(link_id) {
                    info!(channel = %inner.kind, "Transport reconnected");
                    inner.lock_counter().reset();
                    inner.set_state(ConnectionState::Connected);
                    // Replay off the pump so inbound messages keep flowing.
                    tokio::spawn(async move {
                        inner.replay_subscriptions().await;
                    });
                }
            }
            TransportEvent::Closed(reason) => {
                inner.handle_close(link_id, reason);
                return;
            }
        }
    }

    if let Some(inner) = weak.upgrade() {
        inner.handle_close(
            link_id,
            Some(RealtimeError::Transient("transport event stream ended".into())),
        );
    }
}
