//! Cross-context messages between the page and the outside observer.
//!
//! The page side posts structured messages discriminated by `type`:
//!
//! ```json
//! { "type": "INTERCEPTED_DATA", "data": "42[\"data\",{...}]" }
//! { "type": "GAME_LOADED" }
//! ```
//!
//! Consumers must tolerate other `type` values; they parse as
//! [`ChannelMessage::Unknown`] and are ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// A message on the cross-context channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelMessage {
    /// A raw inbound frame captured by the transport tap.
    InterceptedData { data: Value },
    /// The game finished loading (or the fallback timer fired on the page).
    GameLoaded,
    /// Any other `type`.
    #[serde(other)]
    Unknown,
}

impl ChannelMessage {
    /// Wrap a captured text frame.
    pub fn intercepted(frame: impl Into<String>) -> Self {
        Self::InterceptedData {
            data: Value::String(frame.into()),
        }
    }

    /// Parse a message from its JSON form.
    ///
    /// # Errors
    ///
    /// Fails only when `json` is not a JSON object with a `type` member;
    /// unrecognized `type` values parse as [`ChannelMessage::Unknown`].
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The captured frame text, for text frames.
    ///
    /// Binary frames (anything that is not a JSON string) yield `None`.
    pub fn frame_text(&self) -> Option<&str> {
        match self {
            Self::InterceptedData { data } => data.as_str(),
            _ => None,
        }
    }
}

// ── Game-loaded race ────────────────────────────────────────────────

/// How the game-loaded wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameLoaded {
    /// The page signalled that the game loaded.
    Signalled,
    /// The fallback timeout elapsed first.
    TimedOut,
}

/// Wait for the game-loaded signal, falling back after `timeout`.
///
/// Resolves exactly once; the losing path is dropped. A sender dropped
/// without signalling is treated as "never signalled" and the wait runs to
/// the timeout.
#[cfg(feature = "tokio-runtime")]
pub async fn wait_for_game_loaded(
    signal: tokio::sync::oneshot::Receiver<()>,
    timeout: std::time::Duration,
) -> GameLoaded {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    tokio::select! {
        result = signal => match result {
            Ok(()) => GameLoaded::Signalled,
            Err(_) => {
                deadline.await;
                GameLoaded::TimedOut
            }
        },
        () = &mut deadline => GameLoaded::TimedOut,
    }
}

/// One-shot latch for the game-loaded state.
///
/// Whichever of signal or timeout arrives first flips it; later arrivals
/// are no-ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadLatch {
    fired: Option<GameLoaded>,
}

impl LoadLatch {
    /// Record an arrival. Returns `true` only for the first one.
    pub fn fire(&mut self, how: GameLoaded) -> bool {
        if self.fired.is_some() {
            return false;
        }
        self.fired = Some(how);
        true
    }

    pub fn state(&self) -> Option<GameLoaded> {
        self.fired
    }

    pub fn is_fired(&self) -> bool {
        self.fired.is_some()
    }
}
