//! Lobby snapshot extraction from decoded frames.
//!
//! The game pushes its full room state as a Socket.IO `data` event. The
//! same transport also carries chat, drawing strokes, timers, and dozens of
//! other events, so a frame only becomes a [`LobbySnapshot`] when it passes a
//! strict structural gate:
//!
//! - Engine.IO `message` carrying a Socket.IO `event`
//! - event name `"data"`
//! - the lobby object (the first argument's `data` member, or the first
//!   argument itself) exposes `owner`, `me`, `users`, and an `id` made of
//!   exactly 8 ASCII alphanumerics
//!
//! The `id` check is a best-effort filter, not a protocol guarantee: any
//! object that happens to have these four fields will be accepted.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::frame::{DecodedFrame, EngineType, SocketType};
use crate::join::LobbyCode;

/// Event name the game uses for full lobby state.
pub const LOBBY_EVENT: &str = "data";

/// Player identifier as sent by the game (numbers are stringified).
pub type PlayerId = String;

/// One player as seen in the lobby payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerEntry {
    pub name: String,
    /// 1-based standing by score; tied players share a rank.
    pub rank: u32,
    pub score: i64,
}

/// A validated view of the current game room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LobbySnapshot {
    pub lobby_id: LobbyCode,
    pub owner_id: PlayerId,
    pub self_id: PlayerId,
    pub players: HashMap<PlayerId, PlayerEntry>,
    /// Slot count from the lobby settings, when present.
    pub max_players: Option<u32>,
}

impl LobbySnapshot {
    /// The local player's entry, if listed.
    pub fn me(&self) -> Option<&PlayerEntry> {
        self.players.get(&self.self_id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Returns `true` if the local player owns the lobby.
    pub fn is_owner(&self) -> bool {
        self.owner_id == self.self_id
    }
}

/// Why a frame did not yield a snapshot.
///
/// Only the field-level variants indicate a payload that looked like lobby
/// state and failed validation; the others are ordinary traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotRejection {
    /// Not an Engine.IO `message` frame.
    NotMessage,
    /// A message, but not a Socket.IO `event`.
    NotEvent,
    /// An event other than [`LOBBY_EVENT`].
    UnrecognizedEvent,
    /// The `data` event has no object argument.
    MissingData,
    /// A required lobby field is absent or null.
    MissingField(&'static str),
    /// The `id` is not an 8-character alphanumeric code.
    InvalidLobbyId,
}

impl SnapshotRejection {
    /// Returns `true` for rejections of a payload that claimed to be lobby state.
    pub fn is_validation_failure(self) -> bool {
        matches!(
            self,
            Self::MissingData | Self::MissingField(_) | Self::InvalidLobbyId
        )
    }
}

/// Extract a lobby snapshot from `frame`, or `None` if it is not one.
pub fn extract(frame: &DecodedFrame) -> Option<LobbySnapshot> {
    extract_checked(frame).ok()
}

/// Extract a lobby snapshot from `frame`, reporting why it was rejected.
pub fn extract_checked(frame: &DecodedFrame) -> Result<LobbySnapshot, SnapshotRejection> {
    if frame.engine_type != EngineType::Message {
        return Err(SnapshotRejection::NotMessage);
    }
    if frame.socket_type != Some(SocketType::Event) {
        return Err(SnapshotRejection::NotEvent);
    }
    if frame.event_name() != Some(LOBBY_EVENT) {
        return Err(SnapshotRejection::UnrecognizedEvent);
    }

    let first = frame
        .payload
        .as_ref()
        .and_then(|p| p.args.first())
        .and_then(Value::as_object)
        .ok_or(SnapshotRejection::MissingData)?;
    let lobby = match first.get("data") {
        Some(Value::Object(inner)) => inner,
        _ => first,
    };

    let owner_id = required(lobby, "owner").and_then(player_id)?;
    let self_id = required(lobby, "me").and_then(player_id)?;
    let users = required(lobby, "users")?;
    let lobby_id = required(lobby, "id")?
        .as_str()
        .and_then(LobbyCode::new)
        .ok_or(SnapshotRejection::InvalidLobbyId)?;

    let players = parse_players(users).ok_or(SnapshotRejection::MissingField("users"))?;
    let max_players = lobby.get("settings").and_then(max_players_setting);

    Ok(LobbySnapshot {
        lobby_id,
        owner_id,
        self_id,
        players,
        max_players,
    })
}

fn required<'a>(
    lobby: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Value, SnapshotRejection> {
    match lobby.get(field) {
        Some(Value::Null) | None => Err(SnapshotRejection::MissingField(field)),
        Some(value) => Ok(value),
    }
}

fn player_id(value: &Value) -> Result<PlayerId, SnapshotRejection> {
    id_string(value).ok_or(SnapshotRejection::MissingField("owner/me"))
}

fn id_string(value: &Value) -> Option<PlayerId> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse `users` (an array of user objects, or an id-keyed object).
///
/// Entries without an id are skipped rather than failing the snapshot.
fn parse_players(users: &Value) -> Option<HashMap<PlayerId, PlayerEntry>> {
    let entries: Vec<(PlayerId, String, i64)> = match users {
        Value::Array(list) => list
            .iter()
            .filter_map(|user| {
                let id = user.get("id").and_then(id_string)?;
                Some((id, user_name(user), user_score(user)))
            })
            .collect(),
        Value::Object(map) => map
            .iter()
            .map(|(id, user)| (id.clone(), user_name(user), user_score(user)))
            .collect(),
        _ => return None,
    };

    let players = entries
        .iter()
        .map(|(id, name, score)| {
            let ahead = entries.iter().filter(|(_, _, other)| other > score).count();
            let rank = u32::try_from(ahead).unwrap_or(u32::MAX).saturating_add(1);
            (
                id.clone(),
                PlayerEntry {
                    name: name.clone(),
                    rank,
                    score: *score,
                },
            )
        })
        .collect();
    Some(players)
}

fn user_name(user: &Value) -> String {
    user.get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn user_score(user: &Value) -> i64 {
    user.get("score").and_then(Value::as_i64).unwrap_or(0)
}

/// Settings arrive as a positional array `[language, slots, ...]` or as an
/// object with a `maxPlayers` member.
fn max_players_setting(settings: &Value) -> Option<u32> {
    let value = match settings {
        Value::Array(items) => items.get(1)?,
        Value::Object(map) => map.get("maxPlayers")?,
        _ => return None,
    };
    value.as_u64().and_then(|n| u32::try_from(n).ok())
}

// ── Tracker ─────────────────────────────────────────────────────────

/// Holds the latest accepted snapshot.
///
/// Rejected frames never touch the held snapshot.
#[derive(Debug, Default)]
pub struct LobbyTracker {
    current: Option<LobbySnapshot>,
}

impl LobbyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a frame. Returns the new snapshot if the frame was accepted.
    pub fn offer(&mut self, frame: &DecodedFrame) -> Option<&LobbySnapshot> {
        match extract_checked(frame) {
            Ok(snapshot) => {
                debug!(lobby_id = %snapshot.lobby_id, players = snapshot.player_count(), "lobby snapshot accepted");
                self.current = Some(snapshot);
                self.current.as_ref()
            }
            Err(rejection) if rejection.is_validation_failure() => {
                debug!(?rejection, "lobby payload failed validation; keeping previous snapshot");
                None
            }
            Err(_) => None,
        }
    }

    pub fn current(&self) -> Option<&LobbySnapshot> {
        self.current.as_ref()
    }

    /// Forget the held snapshot (the page navigated away).
    pub fn clear(&mut self) {
        self.current = None;
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::frame::decode;
    use serde_json::json;

    fn lobby_frame(lobby: Value) -> DecodedFrame {
        DecodedFrame::event("/", LOBBY_EVENT, vec![json!({ "id": 10, "data": lobby })])
    }

    fn full_lobby() -> Value {
        json!({
            "id": "ABCD1234",
            "owner": 1,
            "me": 2,
            "settings": ["en", 8, 80, 3],
            "users": [
                { "id": 1, "name": "Alice", "score": 300 },
                { "id": 2, "name": "Bob", "score": 120 },
                { "id": 3, "name": "Cleo", "score": 300 },
                { "name": "ghost" }
            ]
        })
    }

    #[test]
    fn nested_lobby_payload_is_accepted() {
        let snapshot = extract(&lobby_frame(full_lobby())).unwrap();
        assert_eq!(snapshot.lobby_id.as_str(), "ABCD1234");
        assert_eq!(snapshot.owner_id, "1");
        assert_eq!(snapshot.self_id, "2");
        assert_eq!(snapshot.max_players, Some(8));
        assert_eq!(snapshot.player_count(), 3);
        assert!(!snapshot.is_owner());
    }

    #[test]
    fn ranks_follow_scores_with_ties() {
        let snapshot = extract(&lobby_frame(full_lobby())).unwrap();
        assert_eq!(snapshot.players["1"].rank, 1);
        assert_eq!(snapshot.players["3"].rank, 1);
        assert_eq!(snapshot.me().unwrap().rank, 3);
        assert_eq!(snapshot.me().unwrap().name, "Bob");
    }

    #[test]
    fn flat_payload_from_raw_frame() {
        let raw = r#"42/,["data",{"owner":"p1","me":"p1","users":[],"id":"ABCD1234"}]"#;
        let snapshot = extract(&decode(raw).unwrap()).unwrap();
        assert_eq!(snapshot.lobby_id.as_str(), "ABCD1234");
        assert!(snapshot.is_owner());
        assert!(snapshot.players.is_empty());
        assert!(snapshot.max_players.is_none());
    }

    #[test]
    fn seven_character_id_is_rejected() {
        let raw = r#"42/,["data",{"owner":"p1","me":"p1","users":[],"id":"ABCD123"}]"#;
        let frame = decode(raw).unwrap();
        assert_eq!(extract_checked(&frame), Err(SnapshotRejection::InvalidLobbyId));
    }

    #[test]
    fn numeric_or_symbolic_id_is_rejected() {
        let mut lobby = full_lobby();
        lobby["id"] = json!(12345678);
        assert_eq!(
            extract_checked(&lobby_frame(lobby.clone())),
            Err(SnapshotRejection::InvalidLobbyId)
        );
        lobby["id"] = json!("ABCD_234");
        assert_eq!(
            extract_checked(&lobby_frame(lobby)),
            Err(SnapshotRejection::InvalidLobbyId)
        );
    }

    #[test]
    fn each_required_field_is_enforced() {
        for field in ["owner", "me", "users"] {
            let mut lobby = full_lobby();
            lobby.as_object_mut().unwrap().remove(field);
            assert_eq!(
                extract_checked(&lobby_frame(lobby)),
                Err(SnapshotRejection::MissingField(field)),
                "missing {field}"
            );
        }
        let mut lobby = full_lobby();
        lobby["owner"] = Value::Null;
        assert_eq!(
            extract_checked(&lobby_frame(lobby)),
            Err(SnapshotRejection::MissingField("owner"))
        );
    }

    #[test]
    fn unrelated_traffic_is_not_a_validation_failure() {
        let cases = [
            (decode("2").unwrap(), SnapshotRejection::NotMessage),
            (decode("40").unwrap(), SnapshotRejection::NotEvent),
            (
                DecodedFrame::event("/", "chat", vec![json!("hello")]),
                SnapshotRejection::UnrecognizedEvent,
            ),
        ];
        for (frame, expected) in cases {
            let rejection = extract_checked(&frame).unwrap_err();
            assert_eq!(rejection, expected);
            assert!(!rejection.is_validation_failure());
        }
    }

    #[test]
    fn data_event_without_object_is_missing_data() {
        let frame = DecodedFrame::event("/", LOBBY_EVENT, vec![json!(5)]);
        assert_eq!(extract_checked(&frame), Err(SnapshotRejection::MissingData));
        let frame = DecodedFrame::event("/", LOBBY_EVENT, vec![]);
        assert_eq!(extract_checked(&frame), Err(SnapshotRejection::MissingData));
    }

    #[test]
    fn users_as_keyed_object() {
        let mut lobby = full_lobby();
        lobby["users"] = json!({ "7": { "name": "Dana", "score": 5 } });
        let snapshot = extract(&lobby_frame(lobby)).unwrap();
        assert_eq!(snapshot.players["7"].name, "Dana");
    }

    #[test]
    fn tracker_keeps_previous_snapshot_on_rejection() {
        let mut tracker = LobbyTracker::new();
        assert!(tracker.offer(&lobby_frame(full_lobby())).is_some());
        let before = tracker.current().cloned();

        let mut broken = full_lobby();
        broken["id"] = json!("SHORT");
        assert!(tracker.offer(&lobby_frame(broken)).is_none());
        assert!(tracker
            .offer(&DecodedFrame::event("/", "chat", vec![json!("hi")]))
            .is_none());

        assert_eq!(tracker.current().cloned(), before);

        tracker.clear();
        assert!(tracker.current().is_none());
    }
}
