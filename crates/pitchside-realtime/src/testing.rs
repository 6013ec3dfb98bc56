//! Scriptable transport and helpers shared by the unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::RealtimeConfig;
use crate::dispatcher::DiagnosticSink;
use crate::error::{ListenerError, RealtimeError};
use crate::policy::ReconnectPolicy;
use crate::protocol::{ChannelKind, Group, InboundMessage};
use crate::transport::{Connector, TransportEvent, TransportLink, TransportSink};

// ---------------------------------------------------------------------------
// Mock transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockState {
    script: Mutex<VecDeque<Result<(), RealtimeError>>>,
    connect_delay: Mutex<Duration>,
    connects: AtomicUsize,
    tokens: Mutex<Vec<String>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    failing: Mutex<HashSet<String>>,
    rejected: Mutex<Vec<(String, RealtimeError)>>,
    endpoints: Mutex<Vec<String>>,
    links: Mutex<Vec<(String, mpsc::UnboundedSender<TransportEvent>)>>,
    closed: AtomicUsize,
}

/// Connector whose outcomes are scripted. An empty script accepts.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next connect.
    pub fn push_outcome(&self, outcome: Result<(), RealtimeError>) {
        self.state.script.lock().unwrap().push_back(outcome);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock().unwrap() = delay;
    }

    /// Make `method` fail when invoked with `argument`.
    pub fn fail_call(&self, method: &str, argument: &str) {
        self.state
            .failing
            .lock()
            .unwrap()
            .insert(format!("{method}:{argument}"));
    }

    /// Fail every connect to an endpoint containing `fragment`.
    pub fn reject_endpoint(&self, fragment: &str, error: RealtimeError) {
        self.state
            .rejected
            .lock()
            .unwrap()
            .push((fragment.to_string(), error));
    }

    pub fn accept_endpoint(&self, fragment: &str) {
        self.state
            .rejected
            .lock()
            .unwrap()
            .retain(|(f, _)| f != fragment);
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Connects attempted against endpoints containing `fragment`.
    pub fn connects_to(&self, fragment: &str) -> usize {
        self.state
            .endpoints
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.contains(fragment))
            .count()
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.state.tokens.lock().unwrap().clone()
    }

    pub fn closed_count(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Every invocation as `(method, first string argument)`.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.state
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(m, args)| (m.clone(), first_arg(args)))
            .collect()
    }

    /// First arguments of every invocation of `method`.
    pub fn calls_to(&self, method: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == method)
            .map(|(_, a)| a)
            .collect()
    }

    /// Push an event into the most recently opened link.
    pub fn emit(&self, event: TransportEvent) {
        if let Some((_, tx)) = self.state.links.lock().unwrap().last() {
            let _ = tx.send(event);
        }
    }

    /// Push an event into the newest link to an endpoint containing `fragment`.
    pub fn emit_on(&self, fragment: &str, event: TransportEvent) {
        let links = self.state.links.lock().unwrap();
        if let Some((_, tx)) = links.iter().rev().find(|(e, _)| e.contains(fragment)) {
            let _ = tx.send(event);
        }
    }

    /// Server pushes an invocation of `target`.
    pub fn push_message(&self, target: &str, arguments: Vec<Value>) {
        self.emit(TransportEvent::Message {
            target: target.into(),
            arguments,
        });
    }

    /// Close the live link with `reason` (`None` is a clean close).
    pub fn drop_connection(&self, reason: Option<RealtimeError>) {
        self.emit(TransportEvent::Closed(reason));
    }
}

fn first_arg(args: &[Value]) -> String {
    args.first()
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &str, token: &str) -> Result<TransportLink, RealtimeError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state.endpoints.lock().unwrap().push(endpoint.to_string());
        self.state.tokens.lock().unwrap().push(token.to_string());

        let delay = *self.state.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let rejection = self
            .state
            .rejected
            .lock()
            .unwrap()
            .iter()
            .find(|(f, _)| endpoint.contains(f.as_str()))
            .map(|(_, e)| e.clone());
        if let Some(e) = rejection {
            return Err(e);
        }

        let outcome = self.state.script.lock().unwrap().pop_front();
        if let Some(Err(e)) = outcome {
            return Err(e);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .links
            .lock()
            .unwrap()
            .push((endpoint.to_string(), tx));
        Ok(TransportLink {
            sink: Arc::new(MockSink {
                state: Arc::clone(&self.state),
                closed: AtomicBool::new(false),
            }),
            events: rx,
        })
    }
}

struct MockSink {
    state: Arc<MockState>,
    closed: AtomicBool,
}

#[async_trait]
impl TransportSink for MockSink {
    async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<Value, RealtimeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RealtimeError::Transient("connection closed".into()));
        }
        let key = format!("{target}:{}", first_arg(&arguments));
        self.state
            .calls
            .lock()
            .unwrap()
            .push((target.to_string(), arguments));
        if self.state.failing.lock().unwrap().contains(&key) {
            return Err(RealtimeError::Invocation {
                method: target.to_string(),
                message: "rejected".into(),
            });
        }
        Ok(Value::Null)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingDiagnostics {
    listener_failures: Mutex<Vec<String>>,
    replay_failures: Mutex<Vec<String>>,
}

impl RecordingDiagnostics {
    /// `"{event}: {error}"` per failed listener call.
    pub fn listener_failures(&self) -> Vec<String> {
        self.listener_failures.lock().unwrap().clone()
    }

    /// `"{group}"` per failed rejoin.
    pub fn replay_failures(&self) -> Vec<String> {
        self.replay_failures.lock().unwrap().clone()
    }
}

impl DiagnosticSink for RecordingDiagnostics {
    fn listener_failed(&self, message: &InboundMessage, error: &ListenerError) {
        self.listener_failures
            .lock()
            .unwrap()
            .push(format!("{}: {error}", message.event));
    }

    fn replay_failed(&self, _channel: ChannelKind, group: &Group, _error: &RealtimeError) {
        self.replay_failures.lock().unwrap().push(group.to_string());
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Receive with a generous timeout so a hung test fails instead of stalling.
pub async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Option<T> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .ok()
        .flatten()
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Config with millisecond backoff so reconnect tests run fast.
pub fn fast_config() -> RealtimeConfig {
    RealtimeConfig {
        connect_timeout: Duration::from_secs(1),
        policy: ReconnectPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(40),
        },
        ..RealtimeConfig::default()
    }
}
