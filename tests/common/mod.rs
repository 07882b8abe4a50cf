#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for skribbl-presence integration tests.
//!
//! Provides a scripted [`MockTransport`], recording presence and
//! notification sinks, and builders for the frames the game sends.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use skribbl_presence::{Activity, NotificationSink, PresenceError, PresenceSink, Transport};

/// Route `tracing` output through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── MockTransport ───────────────────────────────────────────────────

/// A scripted mock transport.
///
/// Inbound frames are consumed in order by `recv()`. Everything sent is
/// recorded in `sent`.
pub struct MockTransport {
    incoming: VecDeque<Option<Result<String, PresenceError>>>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new(
        incoming: Vec<Option<Result<String, PresenceError>>>,
    ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, sent, closed)
    }

    /// A transport that yields each frame once and then reports a clean close.
    pub fn scripted(frames: &[&str]) -> Self {
        let mut incoming: Vec<_> = frames.iter().map(|f| Some(Ok((*f).to_string()))).collect();
        incoming.push(None);
        Self::new(incoming).0
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: String) -> Result<(), PresenceError> {
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, PresenceError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), PresenceError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── Recording sinks ─────────────────────────────────────────────────

/// A call observed by [`RecordingPresence`].
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceCall {
    Set(Activity),
    Clear,
}

/// Presence sink that records every successful call.
///
/// While `failing` is set, every call is rejected and nothing is recorded.
#[derive(Default)]
pub struct RecordingPresence {
    pub calls: StdMutex<Vec<PresenceCall>>,
    pub failing: AtomicBool,
}

impl RecordingPresence {
    pub fn calls(&self) -> Vec<PresenceCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sets(&self) -> Vec<Activity> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PresenceCall::Set(activity) => Some(activity),
                PresenceCall::Clear => None,
            })
            .collect()
    }

    pub fn clears(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, PresenceCall::Clear))
            .count()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn record(&self, call: PresenceCall) -> Result<(), PresenceError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(PresenceError::Sink("presence client not connected".into()));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl PresenceSink for RecordingPresence {
    async fn set_activity(&self, activity: &Activity) -> Result<(), PresenceError> {
        self.record(PresenceCall::Set(activity.clone()))
    }

    async fn clear_activity(&self) -> Result<(), PresenceError> {
        self.record(PresenceCall::Clear)
    }
}

/// Notification sink that records `(title, body)` pairs.
#[derive(Default)]
pub struct RecordingNotifications {
    pub sent: StdMutex<Vec<(String, String)>>,
}

impl RecordingNotifications {
    pub fn bodies(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifications {
    async fn notify(&self, title: &str, body: &str) -> Result<(), PresenceError> {
        self.sent
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
        Ok(())
    }
}

// ── Frame builders ──────────────────────────────────────────────────

/// A lobby object as the game sends it.
pub fn lobby_json(id: &str) -> Value {
    json!({
        "id": id,
        "owner": 1,
        "me": 2,
        "settings": ["English", 8, 80, 3],
        "users": [
            { "id": 1, "name": "Alice", "score": 300 },
            { "id": 2, "name": "Bob", "score": 120 }
        ]
    })
}

/// The raw frame for a lobby `data` event, nested the way the game nests it.
pub fn lobby_frame(id: &str) -> String {
    let args = json!(["data", { "id": 10, "data": lobby_json(id) }]);
    format!("42{args}")
}

/// A chat message frame; never a lobby snapshot.
pub fn chat_frame(text: &str) -> String {
    format!("42{}", json!(["chat", { "id": 2, "msg": text }]))
}
