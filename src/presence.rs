//! Rich-presence payloads and the de-duplicating sync engine.
//!
//! On every settle tick [`PresenceSyncEngine::tick`] turns the current
//! [`CombinedGameState`] into a [`PresenceUpdate`] and forwards it to the
//! [`PresenceSink`] only when its content hash differs from the last one
//! that was forwarded successfully. A failed sink call leaves the stored
//! hash untouched, so the next tick simply tries again.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::PresenceError;
use crate::hash::content_hash;
use crate::observer::CombinedGameState;

/// Image key used when none is configured.
pub const DEFAULT_LARGE_IMAGE_KEY: &str = "skribbl";

/// The activity payload understood by the external presence client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_image_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_image_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party_max: Option<u32>,
}

/// What to do with the external presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceKind {
    Set(Activity),
    Clear,
}

/// A content-addressed presence update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    /// Hash over the fields that matter; equal hashes are never re-sent.
    pub hash: String,
    /// Unix milliseconds at which the update was computed.
    pub timestamp_ms: u64,
    pub kind: PresenceKind,
}

/// The external rich-presence client.
///
/// Calls must be idempotent. Errors are logged by the caller and never
/// propagated further.
#[async_trait]
pub trait PresenceSink: Send + Sync + 'static {
    async fn set_activity(&self, activity: &Activity) -> Result<(), PresenceError>;

    async fn clear_activity(&self) -> Result<(), PresenceError>;
}

/// The subset of state whose change warrants a new presence update.
///
/// Every inactive state maps to the same fingerprint: the external result
/// is a cleared activity regardless of what the waiting room shows.
pub fn fingerprint(state: &CombinedGameState) -> Value {
    if !state.active {
        return json!({ "active": false });
    }
    json!({
        "player": state.effective_player_name(),
        "round": state.round_label,
        "rank": state.effective_rank(),
        "score": state.effective_points(),
        "language": state.language,
        "partySize": state.effective_player_count(),
        "partyMax": state.effective_max_slots(),
        "lobbyId": state.lobby_id(),
        "active": state.active,
    })
}

/// Build the activity shown while a game is active.
pub fn activity_for(state: &CombinedGameState, large_image_key: &str) -> Activity {
    let details = state
        .round_label
        .clone()
        .unwrap_or_else(|| "In lobby".to_string());
    let standing = match (state.effective_rank(), state.effective_points()) {
        (Some(rank), Some(points)) => Some(format!("#{rank} with {points} points")),
        (None, Some(points)) => Some(format!("{points} points")),
        _ => None,
    };

    Activity {
        details: Some(details),
        state: standing,
        start_timestamp: state.started_at_ms,
        end_timestamp: None,
        large_image_key: Some(large_image_key.to_string()),
        large_image_text: state.language.clone(),
        small_image_key: None,
        small_image_text: state.effective_player_name().map(str::to_string),
        party_id: state.lobby_id().map(str::to_string),
        party_size: state.effective_player_count(),
        party_max: state.effective_max_slots(),
    }
}

/// Compares each computed update against the last forwarded one.
#[derive(Debug)]
pub struct PresenceSyncEngine {
    large_image_key: String,
    last_hash: Option<String>,
    last_kind_was_set: bool,
}

impl Default for PresenceSyncEngine {
    fn default() -> Self {
        Self::new(DEFAULT_LARGE_IMAGE_KEY)
    }
}

impl PresenceSyncEngine {
    pub fn new(large_image_key: impl Into<String>) -> Self {
        Self {
            large_image_key: large_image_key.into(),
            last_hash: None,
            last_kind_was_set: false,
        }
    }

    /// Compute the update for `state` without forwarding it.
    pub fn compute(&self, state: &CombinedGameState, now_ms: u64) -> PresenceUpdate {
        let kind = if state.active {
            PresenceKind::Set(activity_for(state, &self.large_image_key))
        } else {
            PresenceKind::Clear
        };
        PresenceUpdate {
            hash: content_hash(&fingerprint(state)),
            timestamp_ms: now_ms,
            kind,
        }
    }

    /// Hash of the last update the sink accepted.
    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    /// Settle tick: forward the current state if it changed.
    ///
    /// Returns the forwarded update, or `None` when nothing changed or the
    /// sink call failed.
    pub async fn tick<S>(
        &mut self,
        state: &CombinedGameState,
        sink: &S,
        now_ms: u64,
    ) -> Option<PresenceUpdate>
    where
        S: PresenceSink + ?Sized,
    {
        let update = self.compute(state, now_ms);
        if self.last_hash.as_deref() == Some(update.hash.as_str()) {
            return None;
        }

        let result = match &update.kind {
            PresenceKind::Set(activity) => sink.set_activity(activity).await,
            PresenceKind::Clear => sink.clear_activity().await,
        };
        match result {
            Ok(()) => {
                debug!(hash = %update.hash, "presence forwarded");
                self.last_hash = Some(update.hash.clone());
                self.last_kind_was_set = matches!(update.kind, PresenceKind::Set(_));
                Some(update)
            }
            Err(e) => {
                warn!("presence sink rejected update: {e}");
                None
            }
        }
    }

    /// Clear the external presence if we last set it (teardown).
    pub async fn clear<S>(&mut self, sink: &S)
    where
        S: PresenceSink + ?Sized,
    {
        if !self.last_kind_was_set {
            return;
        }
        match sink.clear_activity().await {
            Ok(()) => {
                self.last_hash = None;
                self.last_kind_was_set = false;
            }
            Err(e) => warn!("failed to clear presence: {e}"),
        }
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
    use crate::observer::{DomPatch, GameStateObserver};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        sets: AtomicUsize,
        clears: AtomicUsize,
        failing: AtomicBool,
    }

    #[async_trait]
    impl PresenceSink for CountingSink {
        async fn set_activity(&self, _activity: &Activity) -> Result<(), PresenceError> {
            if self.failing.load(Ordering::Relaxed) {
                return Err(PresenceError::Sink("rpc not ready".into()));
            }
            self.sets.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn clear_activity(&self) -> Result<(), PresenceError> {
            self.clears.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn active_state() -> CombinedGameState {
        let mut observer = GameStateObserver::new();
        observer.apply_dom(
            DomPatch::default()
                .with_game_visible(true)
                .with_player_name("Bob")
                .with_round_label("Round 1 of 3")
                .with_language("English")
                .with_rank(2)
                .with_points(120)
                .with_players(4, 8),
            1_700_000_000_000,
        );
        observer.state().clone()
    }

    #[tokio::test]
    async fn identical_states_forward_once() {
        let sink = CountingSink::default();
        let mut engine = PresenceSyncEngine::default();
        let state = active_state();

        for tick in 0..5 {
            engine.tick(&state, &sink, tick).await;
        }
        assert_eq!(sink.sets.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn one_changed_field_forwards_twice() {
        let sink = CountingSink::default();
        let mut engine = PresenceSyncEngine::default();
        let mut state = active_state();

        engine.tick(&state, &sink, 0).await;
        engine.tick(&state, &sink, 1).await;
        state.points = Some(300);
        engine.tick(&state, &sink, 2).await;
        engine.tick(&state, &sink, 3).await;
        assert_eq!(sink.sets.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn failed_forward_is_retried_next_tick() {
        let sink = CountingSink::default();
        sink.failing.store(true, Ordering::Relaxed);
        let mut engine = PresenceSyncEngine::default();
        let state = active_state();

        assert!(engine.tick(&state, &sink, 0).await.is_none());
        assert!(engine.last_hash().is_none());

        sink.failing.store(false, Ordering::Relaxed);
        assert!(engine.tick(&state, &sink, 1).await.is_some());
        assert_eq!(sink.sets.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn inactive_state_clears_then_teardown_is_noop() {
        let sink = CountingSink::default();
        let mut engine = PresenceSyncEngine::default();
        let mut state = active_state();

        engine.tick(&state, &sink, 0).await;
        state.active = false;
        state.started_at_ms = None;
        let update = engine.tick(&state, &sink, 1).await.unwrap();
        assert_eq!(update.kind, PresenceKind::Clear);
        assert_eq!(sink.clears.load(Ordering::Relaxed), 1);

        engine.clear(&sink).await;
        assert_eq!(sink.clears.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn waiting_room_churn_clears_once() {
        let sink = CountingSink::default();
        let mut engine = PresenceSyncEngine::default();
        let mut observer = GameStateObserver::new();

        for (tick, count) in (1..=5).enumerate() {
            observer.apply_dom(
                DomPatch::default()
                    .with_players(count, 8)
                    .with_round_label(format!("Waiting for {count} players")),
                0,
            );
            engine.tick(observer.state(), &sink, tick as u64).await;
        }
        assert_eq!(sink.clears.load(Ordering::Relaxed), 1);
        assert_eq!(sink.sets.load(Ordering::Relaxed), 0);

        // Entering the game still forwards.
        observer.apply_dom(DomPatch::default().with_game_visible(true), 10);
        assert!(engine.tick(observer.state(), &sink, 10).await.is_some());
        assert_eq!(sink.sets.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn teardown_clears_active_presence() {
        let sink = CountingSink::default();
        let mut engine = PresenceSyncEngine::default();
        engine.tick(&active_state(), &sink, 0).await;
        engine.clear(&sink).await;
        assert_eq!(sink.clears.load(Ordering::Relaxed), 1);
        assert!(engine.last_hash().is_none());
    }

    #[test]
    fn timestamp_does_not_affect_hash() {
        let engine = PresenceSyncEngine::default();
        let state = active_state();
        assert_eq!(engine.compute(&state, 1).hash, engine.compute(&state, 2).hash);
    }

    #[test]
    fn activity_payload_shape() {
        let engine = PresenceSyncEngine::new("logo");
        let PresenceKind::Set(activity) = engine.compute(&active_state(), 0).kind else {
            panic!("expected Set");
        };
        assert_eq!(activity.details.as_deref(), Some("Round 1 of 3"));
        assert_eq!(activity.state.as_deref(), Some("#2 with 120 points"));
        assert_eq!(activity.start_timestamp, Some(1_700_000_000_000));
        assert_eq!(activity.large_image_key.as_deref(), Some("logo"));
        assert_eq!(activity.party_size, Some(4));
        assert_eq!(activity.party_max, Some(8));

        let json = serde_json::to_value(&activity).unwrap();
        assert_eq!(json["largeImageText"], "English");
        assert!(json.get("partyId").is_none());
    }
}
