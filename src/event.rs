//! Events emitted by a running [`PresenceSession`](crate::session::PresenceSession).

use crate::join::LobbyCode;

/// Something observable happened in the presence pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session loop is running.
    Started,
    /// The game finished loading, either signalled by the page or assumed
    /// after the fallback timeout.
    GameLoaded { timed_out: bool },
    /// A lobby snapshot passed validation and replaced the previous one.
    SnapshotAccepted { lobby_id: LobbyCode },
    /// A changed activity was accepted by the presence sink.
    PresenceForwarded { hash: String },
    /// The presence sink was told to clear the activity.
    PresenceCleared,
    /// The session loop exited. Always the last event.
    Stopped { reason: Option<String> },
}
