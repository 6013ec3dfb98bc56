//! Façade over the simulation and notification channels.

use std::sync::Arc;

use pitchside_common::ClientId;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::RealtimeConfig;
use crate::connection::{ChannelConnection, ChannelStats, ConnectionState};
use crate::dispatcher::{DiagnosticSink, ListenerHandle, TracingDiagnostics};
use crate::error::{ListenerError, RealtimeError};
use crate::protocol::{ChannelKind, Group, HubEvent, InboundMessage};
use crate::session::SessionGate;
use crate::token::TokenProvider;
use crate::transport::{Connector, WebSocketConnector};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Read-only snapshot of both channels, for operational tooling.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub client_id: ClientId,
    pub simulation: ChannelStats,
    pub notifications: ChannelStats,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Owns both hub connections and the session-wide auth signal.
///
/// Construct one per application and pass it by reference. Must be created
/// inside a tokio runtime.
pub struct RealtimeClient {
    id: ClientId,
    simulation: ChannelConnection,
    notifications: ChannelConnection,
    tokens: Arc<dyn TokenProvider>,
    gate: SessionGate,
    auth_watch: JoinHandle<()>,
}

impl RealtimeClient {
    /// Client speaking the hub protocol over WebSocket.
    pub fn new(config: RealtimeConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        let connector = Arc::new(WebSocketConnector::new(config.transport.clone()));
        Self::with_connector(config, tokens, connector, Arc::new(TracingDiagnostics))
    }

    pub fn with_connector(
        config: RealtimeConfig,
        tokens: Arc<dyn TokenProvider>,
        connector: Arc<dyn Connector>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let id = ClientId::new();
        let gate = SessionGate::new();
        let channel = |kind| {
            ChannelConnection::new(
                kind,
                &config,
                Arc::clone(&connector),
                Arc::clone(&tokens),
                gate.clone(),
                Arc::clone(&diagnostics),
            )
        };
        let simulation = channel(ChannelKind::Simulation);
        let notifications = channel(ChannelKind::Notifications);

        let auth_watch = tokio::spawn(watch_auth_failures(
            gate.clone(),
            simulation.clone(),
            notifications.clone(),
        ));
        info!(client = %id, "Realtime client created");

        Self {
            id,
            simulation,
            notifications,
            tokens,
            gate,
            auth_watch,
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn channel(&self, kind: ChannelKind) -> &ChannelConnection {
        match kind {
            ChannelKind::Simulation => &self.simulation,
            ChannelKind::Notifications => &self.notifications,
        }
    }

    pub fn simulation(&self) -> &ChannelConnection {
        &self.simulation
    }

    pub fn notifications(&self) -> &ChannelConnection {
        &self.notifications
    }

    pub fn state(&self, kind: ChannelKind) -> ConnectionState {
        self.channel(kind).state()
    }

    pub fn state_changes(&self, kind: ChannelKind) -> watch::Receiver<ConnectionState> {
        self.channel(kind).state_changes()
    }

    pub fn is_connected(&self) -> bool {
        ChannelKind::ALL
            .iter()
            .all(|&kind| self.state(kind) == ConnectionState::Connected)
    }

    // -- Connection control -------------------------------------------------

    /// Connect both channels concurrently. True only if both succeed; a
    /// failure on one neither blocks nor rolls back the other.
    pub async fn connect_all(&self) -> bool {
        let (simulation, notifications) =
            tokio::join!(self.simulation.connect(), self.notifications.connect());

        for (kind, result) in [
            (ChannelKind::Simulation, &simulation),
            (ChannelKind::Notifications, &notifications),
        ] {
            if let Err(e) = result {
                warn!(client = %self.id, channel = %kind, error = %e, "Channel failed to connect");
            }
        }
        simulation.is_ok() && notifications.is_ok()
    }

    /// Make sure both channels are up.
    ///
    /// Returns false without touching the network when the session is not
    /// authenticated; both channels are disconnected in that case.
    pub async fn ensure_connected(&self) -> bool {
        if self.is_connected() {
            return true;
        }
        if !self.tokens.is_authenticated() {
            warn!(client = %self.id, "Not authenticated, disconnecting realtime channels");
            self.disconnect_all().await;
            return false;
        }
        if !self.tokens.refresh().await {
            warn!(client = %self.id, "Token refresh failed, disconnecting realtime channels");
            self.disconnect_all().await;
            return false;
        }
        self.connect_all().await
    }

    /// Stop both channels after an auth failure so neither keeps retrying
    /// against a dead session.
    pub async fn disconnect_for_auth_failure(&self) {
        disconnect_for_auth_failure(&self.simulation, &self.notifications).await;
    }

    /// Tear both channels down, zero their counters, and connect again.
    pub async fn reset_connections(&self) -> bool {
        info!(client = %self.id, "Resetting realtime connections");
        self.disconnect_all().await;
        self.simulation.reset_counter();
        self.notifications.reset_counter();
        self.gate.clear();
        self.connect_all().await
    }

    pub async fn disconnect_all(&self) {
        tokio::join!(self.simulation.disconnect(), self.notifications.disconnect());
    }

    /// Forget every group and listener, then disconnect.
    pub async fn cleanup(&self) {
        for channel in [&self.simulation, &self.notifications] {
            channel.clear_subscriptions();
            channel.remove_all_listeners();
        }
        self.disconnect_all().await;
        info!(client = %self.id, "Realtime client cleaned up");
    }

    // -- Groups and calls ---------------------------------------------------

    /// Join a group on its owning channel, connecting that channel first if
    /// needed.
    pub async fn join(&self, group: Group) -> Result<(), RealtimeError> {
        self.channel(group.channel()).join(group).await
    }

    pub async fn leave(&self, group: &Group) -> Result<(), RealtimeError> {
        self.channel(group.channel()).leave(group).await
    }

    pub async fn join_simulation(&self, simulation_id: &str) -> Result<(), RealtimeError> {
        self.join(Group::Simulation(simulation_id.to_string())).await
    }

    pub async fn leave_simulation(&self, simulation_id: &str) -> Result<(), RealtimeError> {
        self.leave(&Group::Simulation(simulation_id.to_string())).await
    }

    pub async fn join_user_notifications(&self, user_id: &str) -> Result<(), RealtimeError> {
        self.join(Group::UserNotifications(user_id.to_string())).await
    }

    pub async fn leave_user_notifications(&self, user_id: &str) -> Result<(), RealtimeError> {
        self.leave(&Group::UserNotifications(user_id.to_string()))
            .await
    }

    /// Ad-hoc hub call on one channel.
    pub async fn invoke(
        &self,
        kind: ChannelKind,
        method: &str,
        arguments: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RealtimeError> {
        self.channel(kind).invoke(method, arguments).await
    }

    // -- Listeners ----------------------------------------------------------

    /// Register a listener for a typed event on the channel that carries it.
    pub fn on<E, F>(&self, event: E, listener: F) -> ListenerHandle
    where
        E: HubEvent,
        F: Fn(&InboundMessage) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.channel(E::CHANNEL).on(event.name(), listener)
    }

    /// Register a listener by wire name.
    pub fn on_raw<F>(&self, kind: ChannelKind, event: &str, listener: F) -> ListenerHandle
    where
        F: Fn(&InboundMessage) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.channel(kind).on(event, listener)
    }

    pub fn off(&self, handle: ListenerHandle) -> bool {
        self.channel(handle.channel()).off(handle)
    }

    /// Drop every listener for one typed event. Returns how many were removed.
    pub fn remove_listeners<E: HubEvent>(&self, event: E) -> usize {
        self.channel(E::CHANNEL).remove_listeners(event.name())
    }

    pub fn remove_all_listeners(&self, kind: ChannelKind) {
        self.channel(kind).remove_all_listeners();
    }

    // -- Diagnostics --------------------------------------------------------

    pub fn connection_stats(&self) -> ConnectionStats {
        ConnectionStats {
            client_id: self.id.clone(),
            simulation: self.simulation.stats(),
            notifications: self.notifications.stats(),
        }
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.auth_watch.abort();
    }
}

async fn disconnect_for_auth_failure(simulation: &ChannelConnection, notifications: &ChannelConnection) {
    simulation.exhaust_retries();
    notifications.exhaust_retries();
    tokio::join!(simulation.disconnect(), notifications.disconnect());
}

/// Stop both channels whenever the session gate trips.
async fn watch_auth_failures(
    gate: SessionGate,
    simulation: ChannelConnection,
    notifications: ChannelConnection,
) {
    let mut tripped = gate.subscribe();
    while tripped.changed().await.is_ok() {
        let suppressed = *tripped.borrow_and_update();
        if suppressed && gate.is_suppressed() {
            warn!("Auth failure observed, stopping both realtime channels");
            disconnect_for_auth_failure(&simulation, &notifications).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::protocol::{methods, NotificationEvent, SimulationEvent};
    use crate::testing::{eventually, fast_config, recv_within, MockConnector};
    use crate::token::StaticTokenProvider;
    use crate::transport::TransportEvent;

    const SIM: &str = "/matchSimulationHub";
    const NOTIFY: &str = "/Notify";

    fn client_with(tokens: Arc<dyn TokenProvider>) -> (RealtimeClient, MockConnector) {
        let mock = MockConnector::new();
        let client = RealtimeClient::with_connector(
            fast_config(),
            tokens,
            Arc::new(mock.clone()),
            Arc::new(TracingDiagnostics),
        );
        (client, mock)
    }

    fn client() -> (RealtimeClient, MockConnector) {
        client_with(Arc::new(StaticTokenProvider::new(Some("jwt".into()))))
    }

    /// Let every pending reconnect timer run out. Tests calling this run on a
    /// paused clock, so the sleep auto-advances through the whole backoff chain.
    async fn settle() {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    /// Authenticated, but refresh always fails.
    struct ExpiredSession;

    #[async_trait]
    impl TokenProvider for ExpiredSession {
        fn current_token(&self) -> Option<String> {
            Some("stale".into())
        }

        fn is_authenticated(&self) -> bool {
            true
        }

        async fn refresh(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn connect_all_opens_both_channels() {
        let (client, mock) = client();
        assert!(client.connect_all().await);

        assert!(client.is_connected());
        assert_eq!(mock.connects_to(SIM), 1);
        assert_eq!(mock.connects_to(NOTIFY), 1);
    }

    #[tokio::test]
    async fn connect_all_failure_of_one_channel_keeps_the_other() {
        let (client, mock) = client();
        mock.reject_endpoint(NOTIFY, RealtimeError::Transient("refused".into()));

        assert!(!client.connect_all().await);
        assert_eq!(client.state(ChannelKind::Simulation), ConnectionState::Connected);
        assert_ne!(
            client.state(ChannelKind::Notifications),
            ConnectionState::Connected
        );

        // The failed channel keeps retrying on its own budget.
        mock.accept_endpoint(NOTIFY);
        assert!(eventually(|| client.is_connected()).await);
        assert_eq!(mock.connects_to(SIM), 1);
    }

    #[tokio::test]
    async fn ensure_connected_when_up_does_nothing() {
        let (client, mock) = client();
        assert!(client.connect_all().await);
        assert!(client.ensure_connected().await);
        assert_eq!(mock.connect_count(), 2);
    }

    #[tokio::test]
    async fn ensure_connected_without_session_skips_network() {
        let (client, mock) = client_with(Arc::new(StaticTokenProvider::new(None)));
        assert!(!client.ensure_connected().await);
        assert_eq!(mock.connect_count(), 0);
        assert_eq!(client.state(ChannelKind::Simulation), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn ensure_connected_fails_when_refresh_fails() {
        let (client, mock) = client_with(Arc::new(ExpiredSession));
        assert!(!client.ensure_connected().await);
        assert_eq!(mock.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_on_one_channel_stops_both() {
        let (client, mock) = client();
        assert!(client.connect_all().await);

        mock.emit_on(
            SIM,
            TransportEvent::Closed(Some(RealtimeError::AuthFailure("token expired".into()))),
        );

        assert!(eventually(|| {
            client.state(ChannelKind::Simulation) == ConnectionState::Disconnected
                && client.state(ChannelKind::Notifications) == ConnectionState::Disconnected
        })
        .await);
        settle().await;

        assert_eq!(mock.connect_count(), 2);
        let stats = client.connection_stats();
        assert_eq!(stats.simulation.attempts, 5);
        assert_eq!(stats.notifications.attempts, 5);
    }

    #[tokio::test]
    async fn reset_connections_recovers_after_auth_failure() {
        let (client, mock) = client();
        assert!(client.connect_all().await);
        mock.emit_on(
            NOTIFY,
            TransportEvent::Closed(Some(RealtimeError::AuthFailure("Unauthorized".into()))),
        );
        assert!(eventually(|| !client.simulation().has_live_link()).await);

        assert!(client.reset_connections().await);
        assert!(client.is_connected());
        let stats = client.connection_stats();
        assert_eq!(stats.simulation.attempts, 0);
        assert_eq!(stats.notifications.attempts, 0);
        assert_eq!(mock.connect_count(), 4);
    }

    #[tokio::test]
    async fn join_helpers_route_to_owning_channel() {
        let (client, mock) = client();
        client.join_simulation("42").await.unwrap();
        client.join_user_notifications("abc").await.unwrap();

        assert_eq!(mock.calls_to(methods::JOIN_SIMULATION), vec!["42"]);
        assert_eq!(mock.calls_to(methods::JOIN_USER_NOTIFICATION_GROUP), vec!["abc"]);
        assert_eq!(
            client.simulation().subscriptions(),
            vec![Group::Simulation("42".into())]
        );
        assert_eq!(
            client.notifications().subscriptions(),
            vec![Group::UserNotifications("abc".into())]
        );

        client.leave_user_notifications("abc").await.unwrap();
        assert_eq!(mock.calls_to(methods::LEAVE_USER_NOTIFICATION_GROUP), vec!["abc"]);
        assert!(client.notifications().subscriptions().is_empty());
    }

    #[tokio::test]
    async fn typed_listeners_bind_to_their_channel() {
        let (client, mock) = client();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let sim_handle = client.on(SimulationEvent::MatchEvent, |_| Ok(()));
        let notify_handle = client.on(NotificationEvent::Notification, move |m| {
            let title: serde_json::Value = m.payload()?;
            let _ = tx.send(title);
            Ok(())
        });
        assert_eq!(sim_handle.channel(), ChannelKind::Simulation);
        assert_eq!(notify_handle.channel(), ChannelKind::Notifications);

        assert!(client.connect_all().await);
        mock.emit_on(
            NOTIFY,
            TransportEvent::Message {
                target: "ReceiveNotification".into(),
                arguments: vec![json!({ "title": "Kick-off" })],
            },
        );
        assert_eq!(recv_within(&mut rx).await, Some(json!({ "title": "Kick-off" })));

        assert!(client.off(notify_handle));
        assert!(!client.off(notify_handle));
        assert_eq!(client.connection_stats().notifications.listeners, 0);
        assert_eq!(client.connection_stats().simulation.listeners, 1);
    }

    #[tokio::test]
    async fn remove_listeners_drops_only_that_event() {
        let (client, _mock) = client();
        client.on(SimulationEvent::MatchEvent, |_| Ok(()));
        client.on(SimulationEvent::MatchEvent, |_| Ok(()));
        client.on(SimulationEvent::SimulationComplete, |_| Ok(()));

        assert_eq!(client.remove_listeners(SimulationEvent::MatchEvent), 2);
        assert_eq!(client.remove_listeners(SimulationEvent::MatchEvent), 0);
        assert_eq!(client.remove_listeners(NotificationEvent::Notification), 0);
        assert_eq!(client.connection_stats().simulation.listeners, 1);
    }

    #[tokio::test]
    async fn invoke_on_disconnected_channel_is_rejected() {
        let (client, _mock) = client();
        let err = client
            .invoke(ChannelKind::Notifications, "Anything", vec![])
            .await
            .unwrap_err();
        assert_eq!(err, RealtimeError::NotConnected(ChannelKind::Notifications));
    }

    #[tokio::test]
    async fn cleanup_forgets_groups_and_listeners() {
        let (client, _mock) = client();
        client.on(SimulationEvent::SimulationProgress, |_| Ok(()));
        client.on_raw(ChannelKind::Notifications, "MatchStarted", |_| Ok(()));
        client.join_simulation("1").await.unwrap();

        client.cleanup().await;

        let stats = client.connection_stats();
        for channel in [&stats.simulation, &stats.notifications] {
            assert_eq!(channel.state, ConnectionState::Disconnected);
            assert_eq!(channel.groups, 0);
            assert_eq!(channel.listeners, 0);
            assert!(!channel.has_connection);
        }
    }

    #[tokio::test]
    async fn stats_serialize_per_channel() {
        let (client, _mock) = client();
        client.join_simulation("3").await.unwrap();

        let value = serde_json::to_value(client.connection_stats()).unwrap();
        assert_eq!(value["simulation"]["state"], "connected");
        assert_eq!(value["simulation"]["groups"], 1);
        assert_eq!(value["simulation"]["has_connection"], true);
        assert_eq!(value["notifications"]["state"], "disconnected");
        assert_eq!(value["notifications"]["attempts"], 0);
        assert_eq!(value["client_id"], client.id().as_str());
    }
}
