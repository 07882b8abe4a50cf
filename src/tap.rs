//! Transparent tap over the game's transport.
//!
//! [`TransportTap`] is an explicit proxy: it implements [`Transport`] by
//! forwarding every call to the wrapped transport, and additionally posts
//! each inbound text frame to a cross-context channel *before* handing it
//! to the caller. The game sees exactly the frames it would have seen
//! without the tap, in the same order.
//!
//! Delivery to the observer is fire-and-forget over an unbounded channel:
//! no backpressure, no acknowledgement, never coalesced or reordered. If
//! the observer side has gone away, frames are still forwarded to the game.
//!
//! # Example
//!
//! ```rust,ignore
//! let ws = WebSocketTransport::connect(url).await?;
//! let (mut tap, frames) = TransportTap::new(ws);
//!
//! // The game drives `tap` as it would the raw socket...
//! let frame = tap.recv().await;
//!
//! // ...while the observer reads copies from `frames`.
//! let copy = frames.recv().await;
//! ```

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::channel::ChannelMessage;
use crate::error::PresenceError;
use crate::transport::Transport;

/// Connection state, numbered like the WebSocket `readyState` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

/// A [`Transport`] proxy that mirrors inbound frames onto a channel.
pub struct TransportTap<T> {
    inner: T,
    frames_tx: mpsc::UnboundedSender<ChannelMessage>,
    ready_state: ReadyState,
}

impl<T: Transport> TransportTap<T> {
    pub const CONNECTING: u16 = ReadyState::Connecting as u16;
    pub const OPEN: u16 = ReadyState::Open as u16;
    pub const CLOSING: u16 = ReadyState::Closing as u16;
    pub const CLOSED: u16 = ReadyState::Closed as u16;

    /// Wrap a connected transport and return the observer's end of the channel.
    #[must_use = "the frame receiver must be used to observe frames"]
    pub fn new(inner: T) -> (Self, mpsc::UnboundedReceiver<ChannelMessage>) {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        (Self::with_channel(inner, frames_tx), frames_rx)
    }

    /// Wrap a connected transport, posting frames on an existing channel.
    ///
    /// Useful when the same channel also carries page-side messages such as
    /// [`ChannelMessage::GameLoaded`].
    pub fn with_channel(inner: T, frames_tx: mpsc::UnboundedSender<ChannelMessage>) -> Self {
        Self {
            inner,
            frames_tx,
            ready_state: ReadyState::Open,
        }
    }

    /// A sender for posting page-side messages on the same channel.
    pub fn sender(&self) -> mpsc::UnboundedSender<ChannelMessage> {
        self.frames_tx.clone()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Remove the tap and return the wrapped transport.
    pub fn into_inner(self) -> T {
        self.inner
    }

    fn mirror(&self, frame: &str) {
        if self.frames_tx.send(ChannelMessage::intercepted(frame)).is_err() {
            debug!("frame observer gone; forwarding without mirroring");
        }
    }
}

#[async_trait]
impl<T: Transport> Transport for TransportTap<T> {
    async fn send(&mut self, frame: String) -> Result<(), PresenceError> {
        self.inner.send(frame).await
    }

    // Cancel-safe: nothing is awaited after the inner `recv` resolves.
    async fn recv(&mut self) -> Option<Result<String, PresenceError>> {
        match self.inner.recv().await {
            Some(Ok(frame)) => {
                self.mirror(&frame);
                Some(Ok(frame))
            }
            Some(Err(e)) => Some(Err(e)),
            None => {
                self.ready_state = ReadyState::Closed;
                None
            }
        }
    }

    async fn close(&mut self) -> Result<(), PresenceError> {
        if self.ready_state == ReadyState::Closed {
            return Ok(());
        }
        self.ready_state = ReadyState::Closing;
        let result = self.inner.close().await;
        self.ready_state = ReadyState::Closed;
        result
    }
}

impl<T> std::fmt::Debug for TransportTap<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportTap")
            .field("ready_state", &self.ready_state)
            .field("observer_attached", &!self.frames_tx.is_closed())
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex as StdMutex};

    struct ScriptedTransport {
        incoming: VecDeque<Option<Result<String, PresenceError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&mut self, frame: String) -> Result<(), PresenceError> {
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String, PresenceError>> {
            self.incoming.pop_front().flatten()
        }

        async fn close(&mut self) -> Result<(), PresenceError> {
            Ok(())
        }
    }

    fn scripted(frames: &[&str]) -> (ScriptedTransport, Arc<StdMutex<Vec<String>>>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let transport = ScriptedTransport {
            incoming: frames.iter().map(|f| Some(Ok((*f).to_string()))).collect(),
            sent: Arc::clone(&sent),
        };
        (transport, sent)
    }

    #[test]
    fn ready_state_constants_match_websocket() {
        type Tap = TransportTap<ScriptedTransport>;
        assert_eq!(Tap::CONNECTING, 0);
        assert_eq!(Tap::OPEN, 1);
        assert_eq!(Tap::CLOSING, 2);
        assert_eq!(Tap::CLOSED, 3);
    }

    #[tokio::test]
    async fn frames_reach_game_and_observer_in_order() {
        let (transport, _sent) = scripted(&["0{\"sid\":\"x\"}", "40", "42[\"chat\",\"hi\"]"]);
        let (mut tap, mut frames) = TransportTap::new(transport);

        let mut seen_by_game = Vec::new();
        while let Some(Ok(frame)) = tap.recv().await {
            seen_by_game.push(frame);
        }
        assert_eq!(tap.ready_state(), ReadyState::Closed);

        let mut seen_by_observer = Vec::new();
        while let Ok(msg) = frames.try_recv() {
            seen_by_observer.push(msg.frame_text().unwrap().to_string());
        }
        assert_eq!(seen_by_game, seen_by_observer);
        assert_eq!(seen_by_game.len(), 3);
    }

    #[tokio::test]
    async fn send_is_forwarded_untouched() {
        let (transport, sent) = scripted(&[]);
        let (mut tap, _frames) = TransportTap::new(transport);
        tap.send("3".into()).await.unwrap();
        assert_eq!(*sent.lock().unwrap(), vec!["3".to_string()]);
    }

    #[tokio::test]
    async fn dropped_observer_does_not_affect_game() {
        let (transport, _sent) = scripted(&["2"]);
        let (mut tap, frames) = TransportTap::new(transport);
        drop(frames);
        assert_eq!(tap.recv().await.unwrap().unwrap(), "2");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (transport, _sent) = scripted(&[]);
        let (mut tap, _frames) = TransportTap::new(transport);
        tap.close().await.unwrap();
        tap.close().await.unwrap();
        assert_eq!(tap.ready_state(), ReadyState::Closed);
    }
}
