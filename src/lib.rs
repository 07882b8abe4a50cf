//! # skribbl-presence
//!
//! Wire interception and lobby-state tracking for skribbl.io, feeding an
//! external rich-presence client.
//!
//! The game talks Socket.IO over Engine.IO. This crate sits on that
//! connection as a passive tap, picks the full lobby state out of the frame
//! stream, merges it with what the host observes in the page, and keeps an
//! external presence client in sync without flooding it.
//!
//! ## Features
//!
//! - **Frame decoding**: [`decode`] splits textual Engine.IO / Socket.IO
//!   frames into a [`DecodedFrame`]; malformed input yields `None`.
//! - **Lobby extraction**: [`extract`] validates and projects the game's
//!   `data` event into a [`LobbySnapshot`].
//! - **Transport tap**: [`TransportTap`] wraps any [`Transport`] and mirrors
//!   each inbound frame onto a channel without altering delivery.
//! - **De-duplicated presence**: [`PresenceSession`] forwards an activity to
//!   the [`PresenceSink`] only when its content hash changes.
//! - **WebSocket built-in**: the default `transport-websocket` feature
//!   provides `WebSocketTransport`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use skribbl_presence::{PresenceSession, SessionConfig, TransportTap, WebSocketTransport};
//! use skribbl_presence::transports::websocket::engineio_url;
//!
//! let ws = WebSocketTransport::connect(&engineio_url("wss://server2.skribbl.io:5001")).await?;
//! let (tap, frames) = TransportTap::new(ws);
//! let (dom_tx, dom_rx) = tokio::sync::mpsc::unbounded_channel();
//!
//! let (mut session, mut events) = PresenceSession::start(
//!     frames,
//!     dom_rx,
//!     Arc::new(my_presence_client),
//!     Arc::new(my_notifier),
//!     SessionConfig::new(),
//! );
//! // Drive `tap` as the game connection; report page changes via `dom_tx`.
//! ```

pub mod channel;
pub mod error;
pub mod event;
pub mod frame;
pub mod hash;
pub mod join;
pub mod lobby;
pub mod notify;
pub mod observer;
pub mod presence;
#[cfg(feature = "tokio-runtime")]
pub mod session;
pub mod tap;
pub mod transport;
#[cfg(feature = "transport-websocket")]
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use channel::ChannelMessage;
pub use error::PresenceError;
pub use event::SessionEvent;
pub use frame::{decode, DecodedFrame};
pub use join::LobbyCode;
pub use lobby::{extract, LobbySnapshot};
pub use notify::NotificationSink;
pub use observer::{CombinedGameState, DomPatch, GameStateObserver};
pub use presence::{Activity, PresenceSink, PresenceSyncEngine};
#[cfg(feature = "tokio-runtime")]
pub use session::{PresenceSession, SessionConfig};
pub use tap::TransportTap;
pub use transport::Transport;
#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
