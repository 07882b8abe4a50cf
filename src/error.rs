//! Error types for the presence pipeline.

use thiserror::Error;

/// Errors that can occur while tapping the transport or talking to the
/// external presence and notification collaborators.
///
/// Nothing in the frame pipeline itself returns this type: malformed frames
/// and rejected lobby payloads are reported as `None` (see
/// [`frame::decode`](crate::frame::decode) and
/// [`lobby::extract`](crate::lobby::extract)).
#[derive(Debug, Error)]
pub enum PresenceError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a JSON message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An external presence or notification sink rejected a call.
    #[error("sink error: {0}")]
    Sink(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for presence pipeline operations.
pub type Result<T> = std::result::Result<T, PresenceError>;
