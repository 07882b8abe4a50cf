//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries textual Engine.IO frames over a WebSocket
//! connection. Both `ws://` and `wss://` URLs are supported; TLS is handled
//! transparently via [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! Binary WebSocket frames (Engine.IO binary attachments) are skipped: the
//! presence pipeline only ever looks at text frames.
//!
//! # Feature gate
//!
//! This module is only available when the `transport-websocket` feature is enabled
//! (it is enabled by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), skribbl_presence::PresenceError> {
//! use skribbl_presence::{Transport, TransportTap, WebSocketTransport};
//! use skribbl_presence::transports::websocket::engineio_url;
//!
//! let ws = WebSocketTransport::connect(&engineio_url("wss://server2.skribbl.io:5001")).await?;
//! let (mut tap, _frames) = TransportTap::new(ws);
//!
//! if let Some(Ok(frame)) = tap.recv().await {
//!     println!("server said: {frame}");
//! }
//!
//! tap.close().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::PresenceError;
use crate::transport::Transport;

/// Engine.IO protocol revision spoken by the game server.
pub const ENGINE_IO_VERSION: u8 = 4;

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Build the Engine.IO WebSocket endpoint for a server origin.
///
/// ```
/// use skribbl_presence::transports::websocket::engineio_url;
///
/// assert_eq!(
///     engineio_url("wss://example.org:5001/"),
///     "wss://example.org:5001/socket.io/?EIO=4&transport=websocket"
/// );
/// ```
pub fn engineio_url(origin: &str) -> String {
    format!(
        "{}/socket.io/?EIO={ENGINE_IO_VERSION}&transport=websocket",
        origin.trim_end_matches('/')
    )
}

/// A [`Transport`] implementation backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method is cancel-safe. Dropping the future
/// returned by `recv` before it completes will not consume or lose any frames.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to the given URL.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Io`] if the URL is invalid or the connection
    /// cannot be established. I/O error kinds are preserved; all other errors
    /// map to [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, PresenceError> {
        tracing::debug!(url = %url, "connecting to game server");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            PresenceError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %url, "game server connection established");

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established WebSocket stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// Establish a new WebSocket connection with a timeout.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Timeout`] if the deadline elapses, or any
    /// error that [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, PresenceError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| PresenceError::Timeout)?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: String) -> Result<(), PresenceError> {
        if self.closed {
            return Err(PresenceError::TransportClosed);
        }
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| PresenceError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, PresenceError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(PresenceError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                Message::Binary(data) => {
                    tracing::debug!(len = data.len(), "skipping binary frame");
                }
                // tungstenite answers pings itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), PresenceError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| PresenceError::TransportSend(e.to_string()))
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
    use crate::tap::TransportTap;
    use tokio::net::TcpListener;

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[test]
    fn engineio_url_without_trailing_slash() {
        assert_eq!(
            engineio_url("ws://127.0.0.1:5001"),
            "ws://127.0.0.1:5001/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketTransport::connect("not-a-valid-url").await.unwrap_err();
        assert!(matches!(err, PresenceError::Io(_)));
    }

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the address to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn tapped_socket_mirrors_text_and_skips_binary() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("0{\"sid\":\"abc\"}".into())).await.unwrap();
            ws.send(Message::Binary(vec![0xDE, 0xAD].into())).await.unwrap();
            ws.send(Message::Text("42[\"chat\",\"hi\"]".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let ws = WebSocketTransport::connect(&url).await.unwrap();
        let (mut tap, mut frames) = TransportTap::new(ws);

        assert_eq!(tap.recv().await.unwrap().unwrap(), "0{\"sid\":\"abc\"}");
        assert_eq!(tap.recv().await.unwrap().unwrap(), "42[\"chat\",\"hi\"]");
        assert!(tap.recv().await.is_none());

        assert_eq!(frames.recv().await.unwrap().frame_text(), Some("0{\"sid\":\"abc\"}"));
        assert_eq!(frames.recv().await.unwrap().frame_text(), Some("42[\"chat\",\"hi\"]"));
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("2".to_string()).await.unwrap_err();
        assert!(matches!(err, PresenceError::TransportClosed));
    }

    #[tokio::test]
    async fn pong_reply_round_trip() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("2".into())).await.unwrap();
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "2");
        transport.send("3".to_string()).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "3");
    }
}
