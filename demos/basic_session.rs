//! # Basic Session Example
//!
//! Runs a [`PresenceSession`] end to end without a browser or a real
//! rich-presence client:
//!
//! - a loopback [`Transport`] plays the game server and is wrapped in a
//!   [`TransportTap`], so every inbound frame is mirrored to the session
//! - the host reports what the page shows as [`DomPatch`]es
//! - logging sinks print what would reach the presence and notification
//!   clients
//!
//! ## Running
//!
//! ```sh
//! cargo run --example basic_session
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use skribbl_presence::{
    Activity, DomPatch, NotificationSink, PresenceError, PresenceSession, PresenceSink,
    SessionConfig, SessionEvent, Transport, TransportTap,
};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: A loopback transport standing in for the game socket
// ─────────────────────────────────────────────────────────────────────

/// Frames pushed into `tx` arrive at the page through `recv`.
struct LoopbackTransport {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, frame: String) -> Result<(), PresenceError> {
        tracing::debug!("page sent: {frame}");
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, PresenceError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), PresenceError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Sinks that log instead of talking to external clients
// ─────────────────────────────────────────────────────────────────────

struct LoggingPresence;

#[async_trait]
impl PresenceSink for LoggingPresence {
    async fn set_activity(&self, activity: &Activity) -> Result<(), PresenceError> {
        tracing::info!(
            "presence: {} / {}",
            activity.details.as_deref().unwrap_or("-"),
            activity.state.as_deref().unwrap_or("-")
        );
        Ok(())
    }

    async fn clear_activity(&self) -> Result<(), PresenceError> {
        tracing::info!("presence: cleared");
        Ok(())
    }
}

struct LoggingNotifications;

#[async_trait]
impl NotificationSink for LoggingNotifications {
    async fn notify(&self, title: &str, body: &str) -> Result<(), PresenceError> {
        tracing::info!("notification [{title}]: {body}");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Wire the tap, the session and a scripted game
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (server_tx, server_rx) = mpsc::unbounded_channel();
    let (mut tap, frames) = TransportTap::new(LoopbackTransport { rx: server_rx });
    let (dom_tx, dom_rx) = mpsc::unbounded_channel();

    let config = SessionConfig::new()
        .with_sync_interval(Duration::from_secs(1))
        .with_game_loaded_timeout(Duration::from_secs(3));
    let (mut session, mut events) = PresenceSession::start(
        frames,
        dom_rx,
        Arc::new(LoggingPresence),
        Arc::new(LoggingNotifications),
        config,
    );

    // The page keeps reading its socket; the tap mirrors each frame.
    let page = tokio::spawn(async move {
        while let Some(Ok(frame)) = tap.recv().await {
            tracing::debug!("page received: {frame}");
        }
    });

    // ── The game server announces the lobby ─────────────────────────
    let lobby = serde_json::json!({
        "id": "ABCD1234",
        "owner": 1,
        "me": 2,
        "settings": ["English", 8, 80, 3],
        "users": [
            { "id": 1, "name": "Alice", "score": 300 },
            { "id": 2, "name": "Bob", "score": 120 }
        ]
    });
    server_tx.send("40".to_string())?;
    server_tx.send(format!(
        "42{}",
        serde_json::json!(["data", { "id": 10, "data": lobby }])
    ))?;

    // ── The host reports what the page shows ────────────────────────
    dom_tx.send(
        DomPatch::default()
            .with_game_visible(true)
            .with_player_name("Bob")
            .with_round_label("Round 1 of 3")
            .with_language("English"),
    )?;
    dom_tx.send(DomPatch::default().with_overlay_text("Alice is choosing a word!"))?;

    // ── Read events until presence has been forwarded ───────────────
    let mut forwarded = 0;
    while let Some(event) = events.recv().await {
        match &event {
            SessionEvent::SnapshotAccepted { lobby_id } => {
                tracing::info!("Event: lobby {lobby_id} ({})", lobby_id.game_url());
            }
            SessionEvent::PresenceForwarded { hash } => {
                tracing::info!("Event: presence forwarded ({hash})");
                forwarded += 1;
                if forwarded == 1 {
                    dom_tx.send(DomPatch::default().with_round_label("Round 2 of 3"))?;
                } else {
                    break;
                }
            }
            other => tracing::info!("Event: {other:?}"),
        }
    }

    // ── Clean shutdown ──────────────────────────────────────────────
    session.shutdown().await;
    while let Some(event) = events.recv().await {
        tracing::info!("Event: {event:?}");
    }
    drop(server_tx);
    page.await?;
    tracing::info!("Done: forwarded {forwarded} presence update(s).");
    Ok(())
}
