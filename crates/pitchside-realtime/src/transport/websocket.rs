//! WebSocket transport speaking the JSON hub protocol.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};

use super::hub_protocol::{self, HubMessage};
use super::{Connector, TransportEvent, TransportLink, TransportSink};
use crate::error::RealtimeError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, WsMessage>;
type WsRead = SplitStream<WsStream>;

struct PendingCall {
    target: String,
    reply: oneshot::Sender<Result<serde_json::Value, RealtimeError>>,
}

type PendingCalls = Arc<Mutex<HashMap<String, PendingCall>>>;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Timing knobs for a hub socket.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// How often a ping is sent to the server.
    pub keepalive_interval: Duration,
    /// Silence from the server for this long closes the link.
    pub server_timeout: Duration,
    /// How long an invocation waits for its completion.
    pub invoke_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
            invoke_timeout: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Opens hub connections over `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    options: TransportOptions,
}

impl WebSocketConnector {
    pub fn new(options: TransportOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &str, token: &str) -> Result<TransportLink, RealtimeError> {
        let url = hub_protocol::hub_url(endpoint, token)?;
        debug!(endpoint = %endpoint, "Opening hub socket");

        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(classify_ws_error)?;
        let (mut write, mut read) = ws.split();

        write
            .send(WsMessage::Text(hub_protocol::handshake_request().into()))
            .await
            .map_err(classify_ws_error)?;
        let backlog = read_handshake(&mut read, self.options.server_timeout).await?;
        debug!(endpoint = %endpoint, "Hub handshake complete");

        let write = Arc::new(Mutex::new(write));
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let keepalive = tokio::spawn(keepalive_task(
            Arc::clone(&write),
            self.options.keepalive_interval,
        ));
        tokio::spawn(read_loop(ReadLoop {
            read,
            backlog,
            pending: Arc::clone(&pending),
            events: events_tx,
            server_timeout: self.options.server_timeout,
            write: Arc::clone(&write),
            keepalive,
        }));

        let sink = WebSocketSink {
            write,
            pending,
            next_id: AtomicU64::new(1),
            invoke_timeout: self.options.invoke_timeout,
            closed: AtomicBool::new(false),
        };
        Ok(TransportLink {
            sink: Arc::new(sink),
            events: events_rx,
        })
    }
}

/// Map a socket error onto the error taxonomy.
fn classify_ws_error(error: WsError) -> RealtimeError {
    match error {
        WsError::Http(response) => {
            let status = response.status();
            if matches!(status.as_u16(), 401 | 403) {
                RealtimeError::AuthFailure(format!("hub rejected credentials (HTTP {status})"))
            } else {
                RealtimeError::Transient(format!("hub returned HTTP {status}"))
            }
        }
        other => RealtimeError::Transient(other.to_string()),
    }
}

/// Wait for the handshake reply. Returns records that arrived in the same frame.
async fn read_handshake(read: &mut WsRead, wait: Duration) -> Result<Vec<String>, RealtimeError> {
    loop {
        let frame = tokio::time::timeout(wait, read.next())
            .await
            .map_err(|_| RealtimeError::Timeout(format!("no handshake response within {wait:?}")))?;
        match frame {
            Some(Ok(WsMessage::Text(text))) => {
                let mut records = hub_protocol::split_records(&text);
                let first = records
                    .next()
                    .ok_or_else(|| RealtimeError::Protocol("empty handshake frame".into()))?;
                hub_protocol::parse_handshake(first)?;
                return Ok(records.map(str::to_string).collect());
            }
            Some(Ok(WsMessage::Close(frame))) => {
                let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                return Err(RealtimeError::Transient(format!(
                    "closed during handshake: {reason}"
                )));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(classify_ws_error(e)),
            None => {
                return Err(RealtimeError::Transient(
                    "socket ended during handshake".into(),
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

struct WebSocketSink {
    write: Arc<Mutex<WsWrite>>,
    pending: PendingCalls,
    next_id: AtomicU64,
    invoke_timeout: Duration,
    closed: AtomicBool,
}

#[async_trait]
impl TransportSink for WebSocketSink {
    async fn invoke(
        &self,
        target: &str,
        arguments: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RealtimeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RealtimeError::Transient("connection closed".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let frame = hub_protocol::encode(&HubMessage::Invocation {
            invocation_id: Some(id.clone()),
            target: target.to_string(),
            arguments,
        })?;

        let (reply, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            id.clone(),
            PendingCall {
                target: target.to_string(),
                reply,
            },
        );

        let sent = self
            .write
            .lock()
            .await
            .send(WsMessage::Text(frame.into()))
            .await;
        if let Err(e) = sent {
            self.pending.lock().await.remove(&id);
            return Err(classify_ws_error(e));
        }

        match tokio::time::timeout(self.invoke_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RealtimeError::Transient(format!(
                "connection closed before {target} completed"
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(RealtimeError::Timeout(format!(
                    "{target} did not complete within {:?}",
                    self.invoke_timeout
                )))
            }
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut writer = self.write.lock().await;
        let _ = writer.close().await;
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

async fn keepalive_task(write: Arc<Mutex<WsWrite>>, interval: Duration) {
    let Ok(ping) = hub_protocol::encode(&HubMessage::Ping) else {
        return;
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately
    loop {
        ticker.tick().await;
        let mut writer = write.lock().await;
        if writer.send(WsMessage::Text(ping.clone().into())).await.is_err() {
            break;
        }
        trace!("Keepalive ping sent");
    }
}

struct ReadLoop {
    read: WsRead,
    backlog: Vec<String>,
    pending: PendingCalls,
    events: mpsc::UnboundedSender<TransportEvent>,
    server_timeout: Duration,
    write: Arc<Mutex<WsWrite>>,
    keepalive: JoinHandle<()>,
}

enum Flow {
    Continue,
    Stop(Option<RealtimeError>),
}

async fn read_loop(mut ctx: ReadLoop) {
    let mut reason = None;
    let mut open = true;

    for record in std::mem::take(&mut ctx.backlog) {
        if let Flow::Stop(r) = handle_record(&record, &ctx.pending, &ctx.events).await {
            reason = r;
            open = false;
            break;
        }
    }

    while open {
        match tokio::time::timeout(ctx.server_timeout, ctx.read.next()).await {
            Err(_) => {
                reason = Some(RealtimeError::Transient(format!(
                    "no message from server within {:?}",
                    ctx.server_timeout
                )));
                break;
            }
            Ok(Some(Ok(WsMessage::Text(text)))) => {
                for record in hub_protocol::split_records(&text) {
                    if let Flow::Stop(r) = handle_record(record, &ctx.pending, &ctx.events).await {
                        reason = r;
                        open = false;
                        break;
                    }
                }
            }
            Ok(Some(Ok(WsMessage::Close(frame)))) => {
                debug!(?frame, "Hub socket closed by server");
                break;
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => {
                reason = Some(classify_ws_error(e));
                break;
            }
            Ok(None) => {
                reason = Some(RealtimeError::Transient("socket ended".into()));
                break;
            }
        }
    }

    ctx.keepalive.abort();
    let _ = ctx.write.lock().await.close().await;

    for (_, call) in ctx.pending.lock().await.drain() {
        let _ = call.reply.send(Err(RealtimeError::Transient(format!(
            "connection closed before {} completed",
            call.target
        ))));
    }

    let _ = ctx.events.send(TransportEvent::Closed(reason));
}

async fn handle_record(
    record: &str,
    pending: &PendingCalls,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Flow {
    let message = match hub_protocol::decode(record) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "Skipping undecodable record");
            return Flow::Continue;
        }
    };

    match message {
        HubMessage::Invocation {
            target, arguments, ..
        } => {
            trace!(target = %target, "Server invocation");
            let _ = events.send(TransportEvent::Message { target, arguments });
        }
        HubMessage::Completion {
            invocation_id,
            result,
            error,
        } => {
            let call = pending.lock().await.remove(&invocation_id);
            match call {
                Some(call) => {
                    let outcome = match error {
                        Some(message) => Err(RealtimeError::Invocation {
                            method: call.target,
                            message,
                        }),
                        None => Ok(result.unwrap_or(serde_json::Value::Null)),
                    };
                    let _ = call.reply.send(outcome);
                }
                None => trace!(id = %invocation_id, "Completion for unknown invocation"),
            }
        }
        HubMessage::Ping => trace!("Server ping"),
        HubMessage::Close {
            error,
            allow_reconnect,
        } => {
            info!(error = ?error, allow_reconnect, "Server closed the hub connection");
            return Flow::Stop(hub_protocol::classify_close(error.as_deref()));
        }
        HubMessage::Other(kind) => trace!(kind, "Ignoring hub message"),
    }
    Flow::Continue
}
