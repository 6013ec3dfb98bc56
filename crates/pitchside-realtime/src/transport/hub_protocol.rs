//! JSON hub protocol codec.
//!
//! Records are JSON objects terminated by the ASCII record separator
//! (`0x1E`); several records may share one WebSocket frame. The `type`
//! field selects the message kind.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::RealtimeError;

pub const RECORD_SEPARATOR: char = '\u{1e}';

const INVOCATION: u8 = 1;
const COMPLETION: u8 = 3;
const PING: u8 = 6;
const CLOSE: u8 = 7;

/// A decoded hub protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<serde_json::Value>,
    },
    Completion {
        invocation_id: String,
        result: Option<serde_json::Value>,
        error: Option<String>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// Stream items, cancellations and anything newer than this client.
    Other(u8),
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allow_reconnect: Option<bool>,
}

#[derive(Debug, Serialize)]
struct HandshakeRequest<'a> {
    protocol: &'a str,
    version: u32,
}

#[derive(Debug, Deserialize)]
struct HandshakeResponse {
    #[serde(default)]
    error: Option<String>,
}

/// The first record a client sends after the socket opens.
pub fn handshake_request() -> String {
    let body = serde_json::to_string(&HandshakeRequest {
        protocol: "json",
        version: 1,
    })
    .unwrap_or_else(|_| r#"{"protocol":"json","version":1}"#.to_string());
    format!("{body}{RECORD_SEPARATOR}")
}

/// Check the server's handshake reply.
pub fn parse_handshake(record: &str) -> Result<(), RealtimeError> {
    let response: HandshakeResponse = serde_json::from_str(record)
        .map_err(|e| RealtimeError::Protocol(format!("malformed handshake response: {e}")))?;
    match response.error {
        Some(error) => Err(classify_server_error(&error)),
        None => Ok(()),
    }
}

/// Split a frame into its non-empty records.
pub fn split_records(frame: &str) -> impl Iterator<Item = &str> {
    frame.split(RECORD_SEPARATOR).filter(|r| !r.trim().is_empty())
}

pub fn encode(message: &HubMessage) -> Result<String, RealtimeError> {
    let raw = match message {
        HubMessage::Invocation {
            invocation_id,
            target,
            arguments,
        } => RawMessage {
            kind: INVOCATION,
            invocation_id: invocation_id.clone(),
            target: Some(target.clone()),
            arguments: Some(arguments.clone()),
            ..RawMessage::default()
        },
        HubMessage::Completion {
            invocation_id,
            result,
            error,
        } => RawMessage {
            kind: COMPLETION,
            invocation_id: Some(invocation_id.clone()),
            result: result.clone(),
            error: error.clone(),
            ..RawMessage::default()
        },
        HubMessage::Ping => RawMessage {
            kind: PING,
            ..RawMessage::default()
        },
        HubMessage::Close {
            error,
            allow_reconnect,
        } => RawMessage {
            kind: CLOSE,
            error: error.clone(),
            allow_reconnect: Some(*allow_reconnect),
            ..RawMessage::default()
        },
        HubMessage::Other(kind) => RawMessage {
            kind: *kind,
            ..RawMessage::default()
        },
    };
    let body = serde_json::to_string(&raw)
        .map_err(|e| RealtimeError::Protocol(format!("failed to encode message: {e}")))?;
    Ok(format!("{body}{RECORD_SEPARATOR}"))
}

pub fn decode(record: &str) -> Result<HubMessage, RealtimeError> {
    let raw: RawMessage = serde_json::from_str(record)
        .map_err(|e| RealtimeError::Protocol(format!("malformed hub message: {e}")))?;
    let message = match raw.kind {
        INVOCATION => HubMessage::Invocation {
            invocation_id: raw.invocation_id,
            target: raw
                .target
                .ok_or_else(|| RealtimeError::Protocol("invocation without target".into()))?,
            arguments: raw.arguments.unwrap_or_default(),
        },
        COMPLETION => HubMessage::Completion {
            invocation_id: raw
                .invocation_id
                .ok_or_else(|| RealtimeError::Protocol("completion without id".into()))?,
            result: raw.result,
            error: raw.error,
        },
        PING => HubMessage::Ping,
        CLOSE => HubMessage::Close {
            error: raw.error,
            allow_reconnect: raw.allow_reconnect.unwrap_or(false),
        },
        other => HubMessage::Other(other),
    };
    Ok(message)
}

/// Map a server close onto the error taxonomy. `None` is a clean close.
pub fn classify_close(error: Option<&str>) -> Option<RealtimeError> {
    error.map(classify_server_error)
}

fn classify_server_error(error: &str) -> RealtimeError {
    let lower = error.to_ascii_lowercase();
    let auth = ["unauthorized", "forbidden", "401", "403", "token expired", "invalid token"]
        .iter()
        .any(|needle| lower.contains(needle));
    if auth {
        RealtimeError::AuthFailure(error.to_string())
    } else {
        RealtimeError::Transient(error.to_string())
    }
}

/// WebSocket URL for a hub endpoint with the bearer token attached.
pub fn hub_url(endpoint: &str, token: &str) -> Result<Url, RealtimeError> {
    let mut url = Url::parse(endpoint.trim())
        .map_err(|e| RealtimeError::Protocol(format!("invalid hub endpoint {endpoint:?}: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(RealtimeError::Protocol(format!(
                "unsupported hub scheme {other:?}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| RealtimeError::Protocol(format!("cannot switch {endpoint:?} to {scheme}")))?;
    url.query_pairs_mut().append_pair("access_token", token);
    Ok(url)
}
