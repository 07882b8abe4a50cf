#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Integration tests for the synchronous half of the pipeline:
//! decode → extract → observe → hash → sync.
//!
//! Everything here runs without the session loop, the way an embedder
//! driving the pieces by hand would use them.

mod common;

use serde_json::{json, Value};
use skribbl_presence::frame::{EngineType, SocketType};
use skribbl_presence::hash::content_hash;
use skribbl_presence::lobby::{extract_checked, LobbyTracker, SnapshotRejection};
use skribbl_presence::presence::PresenceKind;
use skribbl_presence::{
    decode, extract, ChannelMessage, DecodedFrame, DomPatch, GameStateObserver, PresenceSyncEngine,
    Transport, TransportTap,
};

use common::{chat_frame, lobby_frame, MockTransport, RecordingPresence};

// ════════════════════════════════════════════════════════════════════
// Decoding
// ════════════════════════════════════════════════════════════════════

#[test]
fn ping_decodes_to_engine_type_only() {
    let frame = decode("2").unwrap();
    assert_eq!(frame, DecodedFrame::engine_only(EngineType::Ping));
}

#[test]
fn leading_character_outside_zero_to_six_is_rejected() {
    for raw in ["", "7", "9[]", "x42", " 42", "-1", "é"] {
        assert!(decode(raw).is_none(), "{raw:?} should be rejected");
    }
}

#[test]
fn non_message_engine_frames_carry_no_socket_fields() {
    for (raw, expected) in [
        ("0{\"sid\":\"abc\"}", EngineType::Open),
        ("1", EngineType::Close),
        ("2", EngineType::Ping),
        ("3ok", EngineType::Pong),
        ("5", EngineType::Upgrade),
        ("6", EngineType::Noop),
    ] {
        let frame = decode(raw).unwrap();
        assert_eq!(frame.engine_type, expected);
        assert!(frame.socket_type.is_none());
        assert!(frame.payload.is_none());
        assert!(frame.ack_id.is_none());
    }
}

#[test]
fn synthetic_event_survives_encode_and_decode() {
    let args = vec![json!({ "id": 3, "data": { "nested": [1, 2, 3] } }), json!("x")];
    let frame = DecodedFrame::event("/", "data", args.clone());
    let decoded = decode(&frame.encode()).unwrap();
    assert_eq!(decoded.event_name(), Some("data"));
    assert_eq!(decoded.payload.unwrap().args, args);
}

#[test]
fn array_without_leading_string_is_raw() {
    let frame = decode("42[1,\"data\"]").unwrap();
    let payload = frame.payload.unwrap();
    assert!(payload.event_name.is_none());
    assert_eq!(payload.raw, Some(json!([1, "data"])));
}

#[test]
fn namespace_and_ack_are_split_off() {
    let frame = decode("43/lobby,17[\"ok\"]").unwrap();
    assert_eq!(frame.socket_type, Some(SocketType::Ack));
    assert_eq!(frame.namespace, "/lobby");
    assert_eq!(frame.ack_id, Some(17));
    assert_eq!(frame.event_name(), Some("ok"));
}

// ════════════════════════════════════════════════════════════════════
// Extraction
// ════════════════════════════════════════════════════════════════════

const FLAT_LOBBY: &str =
    r#"42/,["data",{"owner":"p1","me":"p1","users":[],"id":"ABCD1234"}]"#;

#[test]
fn flat_lobby_frame_yields_snapshot() {
    let snapshot = extract(&decode(FLAT_LOBBY).unwrap()).unwrap();
    assert_eq!(snapshot.lobby_id.as_str(), "ABCD1234");
    assert_eq!(snapshot.owner_id, "p1");
    assert!(snapshot.is_owner());
    assert_eq!(snapshot.player_count(), 0);
}

#[test]
fn seven_character_id_is_not_a_snapshot() {
    let raw = FLAT_LOBBY.replace("ABCD1234", "ABCD123");
    let frame = decode(&raw).unwrap();
    assert!(extract(&frame).is_none());
    assert_eq!(
        extract_checked(&frame),
        Err(SnapshotRejection::InvalidLobbyId)
    );
}

#[test]
fn nested_game_frame_yields_ranked_players() {
    let snapshot = extract(&decode(&lobby_frame("Zx81Qm0p")).unwrap()).unwrap();
    assert_eq!(snapshot.lobby_id.as_str(), "Zx81Qm0p");
    assert_eq!(snapshot.max_players, Some(8));
    let me = snapshot.me().unwrap();
    assert_eq!(me.name, "Bob");
    assert_eq!(me.rank, 2);
}

#[test]
fn missing_required_field_keeps_previous_snapshot() {
    let mut tracker = LobbyTracker::new();
    tracker.offer(&decode(&lobby_frame("ABCD1234")).unwrap());

    for field in ["owner", "me", "users", "id"] {
        let mut lobby = decode(FLAT_LOBBY).unwrap().payload.unwrap().args[0].clone();
        lobby.as_object_mut().unwrap().remove(field);
        let frame = DecodedFrame::event("/", "data", vec![lobby]);
        assert!(tracker.offer(&frame).is_none(), "missing {field}");
        assert_eq!(tracker.current().unwrap().lobby_id.as_str(), "ABCD1234");
    }
}

#[test]
fn chat_traffic_is_ignored_quietly() {
    let frame = decode(&chat_frame("hello")).unwrap();
    let rejection = extract_checked(&frame).unwrap_err();
    assert_eq!(rejection, SnapshotRejection::UnrecognizedEvent);
    assert!(!rejection.is_validation_failure());
}

// ════════════════════════════════════════════════════════════════════
// Hashing and sync
// ════════════════════════════════════════════════════════════════════

#[test]
fn hash_ignores_key_order() {
    let a: Value = serde_json::from_str(r#"{"a":1,"b":{"y":2,"x":[3,{"q":1,"p":2}]}}"#).unwrap();
    let b: Value = serde_json::from_str(r#"{"b":{"x":[3,{"p":2,"q":1}],"y":2},"a":1}"#).unwrap();
    assert_eq!(content_hash(&a), content_hash(&b));
    assert_ne!(content_hash(&a), content_hash(&json!({"a": 2})));
}

#[test]
fn observer_and_engine_forward_only_changes() {
    let sink = RecordingPresence::default();
    let mut engine = PresenceSyncEngine::default();
    let mut observer = GameStateObserver::new();

    observer.apply_frame(&decode(&lobby_frame("ABCD1234")).unwrap());
    observer.apply_dom(DomPatch::default().with_game_visible(true), 1_000);

    tokio_test::block_on(async {
        for now in 0..4 {
            engine.tick(observer.state(), &sink, now).await;
        }
        // Visible again: the start stamp must not move, so nothing changes.
        observer.apply_dom(DomPatch::default().with_game_visible(true), 9_000);
        engine.tick(observer.state(), &sink, 5).await;

        observer.apply_dom(DomPatch::default().with_round_label("Round 2 of 3"), 10_000);
        let update = engine.tick(observer.state(), &sink, 6).await.unwrap();
        let PresenceKind::Set(activity) = update.kind else {
            panic!("expected Set");
        };
        assert_eq!(activity.details.as_deref(), Some("Round 2 of 3"));
        assert_eq!(activity.start_timestamp, Some(1_000));
    });

    let sets = sink.sets();
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[0].state.as_deref(), Some("#2 with 120 points"));
    assert_eq!(sets[0].party_id.as_deref(), Some("ABCD1234"));
    assert_eq!(sets[0].party_size, Some(2));
    assert_eq!(sets[0].party_max, Some(8));
}

#[test]
fn dom_fields_override_lobby_fields() {
    let mut observer = GameStateObserver::new();
    observer.apply_frame(&decode(&lobby_frame("ABCD1234")).unwrap());
    observer.apply_dom(
        DomPatch::default()
            .with_player_name("  Bobby  ")
            .with_points(999)
            .with_players(5, 12),
        0,
    );

    let state = observer.state();
    assert_eq!(state.effective_player_name(), Some("Bobby"));
    assert_eq!(state.effective_points(), Some(999));
    assert_eq!(state.effective_rank(), Some(2));
    assert_eq!(state.effective_player_count(), Some(5));
    assert_eq!(state.effective_max_slots(), Some(12));
}

// ════════════════════════════════════════════════════════════════════
// Tap → channel
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn tapped_frames_decode_into_a_snapshot() {
    common::init_tracing();
    let lobby = lobby_frame("ABCD1234");
    let transport = MockTransport::scripted(&["40", &chat_frame("hi"), &lobby, "2"]);
    let (mut tap, mut frames) = TransportTap::new(transport);

    let mut delivered = Vec::new();
    while let Some(Ok(frame)) = tap.recv().await {
        delivered.push(frame);
    }
    assert_eq!(delivered.len(), 4);

    let mut tracker = LobbyTracker::new();
    let mut mirrored = Vec::new();
    while let Ok(msg) = frames.try_recv() {
        let text = msg.frame_text().unwrap().to_string();
        if let Some(frame) = decode(&text) {
            tracker.offer(&frame);
        }
        mirrored.push(text);
    }
    assert_eq!(mirrored, delivered);
    assert_eq!(tracker.current().unwrap().lobby_id.as_str(), "ABCD1234");
}

#[test]
fn unknown_channel_messages_parse() {
    let msg = ChannelMessage::parse(r#"{"type":"SOMETHING_NEW","data":1}"#).unwrap();
    assert_eq!(msg, ChannelMessage::Unknown);
    assert!(msg.frame_text().is_none());
}
