#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! End-to-end session tests: tap → channel → session loop → sinks.
//!
//! All tests run on a paused clock, so settle ticks, debounce windows and the
//! game-loaded fallback fire deterministically as the test sleeps.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use skribbl_presence::{
    ChannelMessage, DomPatch, PresenceSession, SessionConfig, SessionEvent, Transport,
    TransportTap,
};

use common::{chat_frame, lobby_frame, MockTransport, RecordingNotifications, RecordingPresence};

struct Harness {
    session: PresenceSession,
    events: mpsc::Receiver<SessionEvent>,
    frames: mpsc::UnboundedSender<ChannelMessage>,
    dom: mpsc::UnboundedSender<DomPatch>,
    presence: Arc<RecordingPresence>,
    notifications: Arc<RecordingNotifications>,
}

fn start_session() -> Harness {
    common::init_tracing();
    let (frames, frames_rx) = mpsc::unbounded_channel();
    let (dom, dom_rx) = mpsc::unbounded_channel();
    let presence = Arc::new(RecordingPresence::default());
    let notifications = Arc::new(RecordingNotifications::default());
    let (session, events) = PresenceSession::start(
        frames_rx,
        dom_rx,
        Arc::clone(&presence),
        Arc::clone(&notifications),
        SessionConfig::new(),
    );
    Harness {
        session,
        events,
        frames,
        dom,
        presence,
        notifications,
    }
}

/// Receive events until one matches, returning it.
async fn next_matching(
    events: &mut mpsc::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = events.recv().await.expect("event channel closed early");
        if pred(&event) {
            return event;
        }
    }
}

fn visible_bob() -> DomPatch {
    DomPatch::default()
        .with_game_visible(true)
        .with_player_name("Bob")
        .with_round_label("Round 1 of 3")
        .with_language("English")
}

async fn settle_ticks(n: u32) {
    tokio::time::sleep(Duration::from_secs(5) * n + Duration::from_millis(500)).await;
}

// ════════════════════════════════════════════════════════════════════
// End to end
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn tapped_lobby_reaches_presence_sink() {
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (dom, dom_rx) = mpsc::unbounded_channel();
    let presence = Arc::new(RecordingPresence::default());
    let (mut session, mut events) = PresenceSession::start(
        frames_rx,
        dom_rx,
        Arc::clone(&presence),
        Arc::new(RecordingNotifications::default()),
        SessionConfig::new(),
    );

    let lobby = lobby_frame("ABCD1234");
    let transport = MockTransport::scripted(&["40", &chat_frame("hi"), &lobby, "2"]);
    let mut tap = TransportTap::with_channel(transport, frames_tx);
    while let Some(Ok(_)) = tap.recv().await {}

    dom.send(visible_bob()).unwrap();

    assert_eq!(events.recv().await.unwrap(), SessionEvent::Started);
    let lobby_id = match events.recv().await.unwrap() {
        SessionEvent::SnapshotAccepted { lobby_id } => lobby_id,
        other => panic!("expected SnapshotAccepted, got {other:?}"),
    };
    assert_eq!(lobby_id.as_str(), "ABCD1234");
    assert_eq!(
        session.current_lobby().await.unwrap().lobby_id.as_str(),
        "ABCD1234"
    );

    next_matching(&mut events, |e| {
        matches!(e, SessionEvent::PresenceForwarded { .. })
    })
    .await;

    let sets = presence.sets();
    assert_eq!(sets.len(), 1);
    let activity = &sets[0];
    assert_eq!(activity.details.as_deref(), Some("Round 1 of 3"));
    assert_eq!(activity.state.as_deref(), Some("#2 with 120 points"));
    assert_eq!(activity.party_id.as_deref(), Some("ABCD1234"));
    assert_eq!(activity.party_size, Some(2));
    assert_eq!(activity.party_max, Some(8));
    assert_eq!(activity.large_image_key.as_deref(), Some("skribbl"));
    assert!(activity.start_timestamp.is_some());

    session.shutdown().await;
    assert_eq!(presence.clears(), 1);
    let last = next_matching(&mut events, |e| matches!(e, SessionEvent::Stopped { .. })).await;
    assert_eq!(
        last,
        SessionEvent::Stopped {
            reason: Some("session shut down".into())
        }
    );
    assert!(events.recv().await.is_none());
    assert!(session.current_lobby().await.is_none());
}

// ════════════════════════════════════════════════════════════════════
// De-duplication
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn repeated_identical_reports_forward_once() {
    let mut h = start_session();

    for _ in 0..3 {
        h.dom.send(visible_bob()).unwrap();
    }
    settle_ticks(4).await;
    h.dom.send(visible_bob()).unwrap();
    settle_ticks(2).await;
    assert_eq!(h.presence.sets().len(), 1);

    h.dom.send(DomPatch::default().with_points(500)).unwrap();
    settle_ticks(1).await;
    let sets = h.presence.sets();
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[1].state.as_deref(), Some("500 points"));

    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_forward_is_retried_on_next_tick() {
    let mut h = start_session();
    h.presence.set_failing(true);

    h.dom.send(visible_bob()).unwrap();
    settle_ticks(2).await;
    assert!(h.presence.sets().is_empty());

    h.presence.set_failing(false);
    settle_ticks(1).await;
    assert_eq!(h.presence.sets().len(), 1);

    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn leaving_the_game_clears_presence_once() {
    let mut h = start_session();

    h.dom.send(visible_bob()).unwrap();
    settle_ticks(1).await;
    assert_eq!(h.presence.sets().len(), 1);

    h.dom.send(DomPatch::default().with_game_visible(false)).unwrap();
    settle_ticks(1).await;
    assert_eq!(h.presence.clears(), 1);

    // Already cleared: teardown has nothing to undo.
    h.session.shutdown().await;
    assert_eq!(h.presence.clears(), 1);
}

#[tokio::test(start_paused = true)]
async fn waiting_room_churn_does_not_repeat_clears() {
    let mut h = start_session();

    for count in 1..=4 {
        h.dom
            .send(DomPatch::default().with_players(count, 8))
            .unwrap();
        h.frames
            .send(ChannelMessage::intercepted(lobby_frame(&format!("ABCD123{count}"))))
            .unwrap();
        settle_ticks(1).await;
    }
    assert_eq!(h.presence.clears(), 1);
    assert!(h.presence.sets().is_empty());

    h.session.shutdown().await;
    assert_eq!(h.presence.clears(), 1);
}

// ════════════════════════════════════════════════════════════════════
// Lobby tracking
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn invalid_snapshot_keeps_previous_lobby() {
    let mut h = start_session();

    h.frames
        .send(ChannelMessage::intercepted(lobby_frame("ABCD1234")))
        .unwrap();
    h.frames
        .send(ChannelMessage::intercepted(lobby_frame("ABC1234")))
        .unwrap();
    h.frames
        .send(ChannelMessage::intercepted("not a frame"))
        .unwrap();
    h.frames
        .send(ChannelMessage::InterceptedData {
            data: serde_json::json!([1, 2, 3]),
        })
        .unwrap();
    h.frames.send(ChannelMessage::Unknown).unwrap();
    h.frames.send(ChannelMessage::GameLoaded).unwrap();

    let mut accepted = 0;
    loop {
        match h.events.recv().await.unwrap() {
            SessionEvent::SnapshotAccepted { .. } => accepted += 1,
            SessionEvent::GameLoaded { timed_out } => {
                assert!(!timed_out);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(
        h.session.current_lobby().await.unwrap().lobby_id.as_str(),
        "ABCD1234"
    );

    h.session.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Game-loaded race
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn game_loaded_falls_back_after_timeout() {
    let mut h = start_session();
    assert!(!h.session.is_game_loaded());

    let event = next_matching(&mut h.events, |e| {
        matches!(e, SessionEvent::GameLoaded { .. })
    })
    .await;
    assert_eq!(event, SessionEvent::GameLoaded { timed_out: true });
    assert!(h.session.is_game_loaded());

    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn page_signal_wins_the_race_once() {
    let mut h = start_session();
    h.dom
        .send(DomPatch::default().with_typo_loaded(true))
        .unwrap();

    let event = next_matching(&mut h.events, |e| {
        matches!(e, SessionEvent::GameLoaded { .. })
    })
    .await;
    assert_eq!(event, SessionEvent::GameLoaded { timed_out: false });

    // Neither a repeated signal nor the fallback fires again.
    h.frames.send(ChannelMessage::GameLoaded).unwrap();
    tokio::time::sleep(Duration::from_secs(15)).await;
    while let Ok(event) = h.events.try_recv() {
        assert!(
            !matches!(event, SessionEvent::GameLoaded { .. }),
            "second GameLoaded: {event:?}"
        );
    }

    h.session.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Notifications
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn overlay_messages_notify_once_each() {
    let mut h = start_session();

    for text in [
        "Alice is choosing a word!",
        "Alice is choosing a word!",
        "Round 2",
        "The word was 'tree'",
    ] {
        h.dom
            .send(DomPatch::default().with_overlay_text(text))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    assert_eq!(
        h.notifications.bodies(),
        vec![
            "Alice is choosing a word!".to_string(),
            "The word was 'tree'".to_string()
        ]
    );
    assert!(h
        .notifications
        .sent
        .lock()
        .unwrap()
        .iter()
        .all(|(title, _)| title == "skribbl.io"));

    h.session.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn closing_the_page_inputs_stops_the_session() {
    let Harness {
        mut session,
        mut events,
        frames,
        dom,
        ..
    } = start_session();

    drop(frames);
    drop(dom);

    let event = next_matching(&mut events, |e| matches!(e, SessionEvent::Stopped { .. })).await;
    assert_eq!(
        event,
        SessionEvent::Stopped {
            reason: Some("page inputs closed".into())
        }
    );
    assert!(!session.is_running());
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_aborts_without_clearing() {
    let h = start_session();
    h.dom.send(visible_bob()).unwrap();
    settle_ticks(1).await;
    assert_eq!(h.presence.sets().len(), 1);

    let presence = Arc::clone(&h.presence);
    drop(h);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(presence.clears(), 0);
}
