//! Transport abstraction for the game's realtime connection.
//!
//! The [`Transport`] trait is the seam the [`TransportTap`](crate::tap::TransportTap)
//! wraps: a bidirectional channel of text frames. The game speaks textual
//! Engine.IO, so each frame is one complete Engine.IO packet; any framing
//! below that (WebSocket frames, long-polling batches) is the transport's
//! concern.
//!
//! # Connection Setup
//!
//! Connection setup is intentionally NOT part of this trait. Construct a
//! connected transport externally, wrap it in a tap, and hand the tap to
//! whatever drives the game connection.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use skribbl_presence::error::PresenceError;
//! use skribbl_presence::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, _frame: String) -> Result<(), PresenceError> {
//!         // Write one text frame
//!         Ok(())
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, PresenceError>> {
//!         // Return the next text frame, or None once closed cleanly
//!         None
//!     }
//!
//!     async fn close(&mut self) -> Result<(), PresenceError> {
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::PresenceError;

/// A bidirectional text frame transport.
///
/// # Object Safety
///
/// This trait is object-safe, so `Box<dyn Transport>` works for dynamic dispatch.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is
/// used inside `tokio::select!`. If `recv` is cancelled before completion,
/// calling it again must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::TransportSend`] if the frame could not be sent.
    async fn send(&mut self, frame: String) -> Result<(), PresenceError>;

    /// Receive the next text frame.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed cleanly by the peer
    async fn recv(&mut self) -> Option<Result<String, PresenceError>>;

    /// Close the connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), PresenceError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, frame: String) -> Result<(), PresenceError> {
        (**self).send(frame).await
    }

    async fn recv(&mut self) -> Option<Result<String, PresenceError>> {
        (**self).recv().await
    }

    async fn close(&mut self) -> Result<(), PresenceError> {
        (**self).close().await
    }
}
