//! Channel identities, hub method names, typed inbound events, and groups.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::RealtimeError;

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// The two independent hub connections owned by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Match-simulation event stream.
    Simulation,
    /// Per-user notification stream.
    Notifications,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 2] = [ChannelKind::Simulation, ChannelKind::Notifications];

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Simulation => "simulation",
            ChannelKind::Notifications => "notifications",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Outbound hub methods
// ---------------------------------------------------------------------------

/// Server methods invoked by the client.
pub mod methods {
    pub const JOIN_SIMULATION: &str = "JoinSimulation";
    pub const LEAVE_SIMULATION: &str = "LeaveSimulation";
    pub const JOIN_USER_NOTIFICATION_GROUP: &str = "JoinUserNotificationGroup";
    pub const LEAVE_USER_NOTIFICATION_GROUP: &str = "LeaveUserNotificationGroup";
}

// ---------------------------------------------------------------------------
// Inbound events
// ---------------------------------------------------------------------------

/// A server-to-client event name bound to the channel that carries it.
pub trait HubEvent: Copy {
    const CHANNEL: ChannelKind;

    /// Wire name of the event.
    fn name(self) -> &'static str;
}

/// Events pushed on the simulation channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimulationEvent {
    MatchEvent,
    SimulationProgress,
    SimulationComplete,
    SimulationError,
    StatisticsUpdate,
}

impl SimulationEvent {
    pub const ALL: [SimulationEvent; 5] = [
        SimulationEvent::MatchEvent,
        SimulationEvent::SimulationProgress,
        SimulationEvent::SimulationComplete,
        SimulationEvent::SimulationError,
        SimulationEvent::StatisticsUpdate,
    ];
}

impl HubEvent for SimulationEvent {
    const CHANNEL: ChannelKind = ChannelKind::Simulation;

    fn name(self) -> &'static str {
        match self {
            SimulationEvent::MatchEvent => "MatchEvent",
            SimulationEvent::SimulationProgress => "SimulationProgress",
            SimulationEvent::SimulationComplete => "SimulationComplete",
            SimulationEvent::SimulationError => "SimulationError",
            SimulationEvent::StatisticsUpdate => "StatisticsUpdate",
        }
    }
}

/// Events pushed on the notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationEvent {
    /// Generic notification.
    Notification,
    MatchStarted,
    MatchEnded,
    SimulationStarted,
}

impl NotificationEvent {
    pub const ALL: [NotificationEvent; 4] = [
        NotificationEvent::Notification,
        NotificationEvent::MatchStarted,
        NotificationEvent::MatchEnded,
        NotificationEvent::SimulationStarted,
    ];
}

impl HubEvent for NotificationEvent {
    const CHANNEL: ChannelKind = ChannelKind::Notifications;

    fn name(self) -> &'static str {
        match self {
            NotificationEvent::Notification => "ReceiveNotification",
            NotificationEvent::MatchStarted => "MatchStarted",
            NotificationEvent::MatchEnded => "MatchEnded",
            NotificationEvent::SimulationStarted => "SimulationStarted",
        }
    }
}

/// A message delivered by the server, as handed to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub channel: ChannelKind,
    pub event: String,
    pub arguments: Vec<serde_json::Value>,
}

impl InboundMessage {
    /// Deserialize the first argument into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, RealtimeError> {
        let first = self
            .arguments
            .first()
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        serde_json::from_value(first).map_err(|e| {
            RealtimeError::Protocol(format!("invalid {} payload: {e}", self.event))
        })
    }
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// A server-side broadcast scope a channel joins to receive its messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Group {
    /// One match's simulation room.
    Simulation(String),
    /// One user's notification feed.
    UserNotifications(String),
}

impl Group {
    /// Stable key, e.g. `simulation:42` or `user:abc`.
    pub fn key(&self) -> String {
        match self {
            Group::Simulation(id) => format!("simulation:{id}"),
            Group::UserNotifications(user_id) => format!("user:{user_id}"),
        }
    }

    pub fn channel(&self) -> ChannelKind {
        match self {
            Group::Simulation(_) => ChannelKind::Simulation,
            Group::UserNotifications(_) => ChannelKind::Notifications,
        }
    }

    pub fn join_method(&self) -> &'static str {
        match self {
            Group::Simulation(_) => methods::JOIN_SIMULATION,
            Group::UserNotifications(_) => methods::JOIN_USER_NOTIFICATION_GROUP,
        }
    }

    pub fn leave_method(&self) -> &'static str {
        match self {
            Group::Simulation(_) => methods::LEAVE_SIMULATION,
            Group::UserNotifications(_) => methods::LEAVE_USER_NOTIFICATION_GROUP,
        }
    }

    /// The single argument passed to the join/leave methods.
    pub fn argument(&self) -> serde_json::Value {
        match self {
            Group::Simulation(id) | Group::UserNotifications(id) => {
                serde_json::Value::String(id.clone())
            }
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_keys() {
        assert_eq!(Group::Simulation("42".into()).key(), "simulation:42");
        assert_eq!(Group::UserNotifications("abc".into()).key(), "user:abc");
        assert_eq!(Group::Simulation("7".into()).to_string(), "simulation:7");
    }

    #[test]
    fn group_routes_to_owning_channel_and_methods() {
        let sim = Group::Simulation("42".into());
        assert_eq!(sim.channel(), ChannelKind::Simulation);
        assert_eq!(sim.join_method(), "JoinSimulation");
        assert_eq!(sim.leave_method(), "LeaveSimulation");
        assert_eq!(sim.argument(), serde_json::json!("42"));

        let user = Group::UserNotifications("abc".into());
        assert_eq!(user.channel(), ChannelKind::Notifications);
        assert_eq!(user.join_method(), "JoinUserNotificationGroup");
        assert_eq!(user.leave_method(), "LeaveUserNotificationGroup");
    }

    #[test]
    fn events_know_their_channel() {
        assert_eq!(SimulationEvent::CHANNEL, ChannelKind::Simulation);
        assert_eq!(NotificationEvent::CHANNEL, ChannelKind::Notifications);
        assert_eq!(SimulationEvent::MatchEvent.name(), "MatchEvent");
        assert_eq!(NotificationEvent::Notification.name(), "ReceiveNotification");
    }

    #[test]
    fn event_names_are_unique() {
        let mut names: Vec<&str> = SimulationEvent::ALL.iter().map(|e| e.name()).collect();
        names.extend(NotificationEvent::ALL.iter().map(|e| e.name()));
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn payload_deserializes_first_argument() {
        #[derive(Deserialize)]
        struct Progress {
            minute: u32,
        }

        let msg = InboundMessage {
            channel: ChannelKind::Simulation,
            event: "SimulationProgress".into(),
            arguments: vec![serde_json::json!({ "minute": 63 }), serde_json::json!("extra")],
        };
        let progress: Progress = msg.payload().unwrap();
        assert_eq!(progress.minute, 63);
    }

    #[test]
    fn payload_type_mismatch_is_protocol_error() {
        let msg = InboundMessage {
            channel: ChannelKind::Simulation,
            event: "MatchEvent".into(),
            arguments: vec![serde_json::json!("not a number")],
        };
        let result: Result<u32, _> = msg.payload();
        assert!(matches!(result, Err(RealtimeError::Protocol(_))));
    }

    #[test]
    fn channel_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ChannelKind::Notifications).unwrap();
        assert_eq!(json, "\"notifications\"");
    }
}
