//! Combined game state, fed by DOM observations and lobby snapshots.
//!
//! The host environment reports what it sees in the page as [`DomPatch`]es:
//! partial updates where `None` means "not observed this time" and an empty
//! string means "the element is gone". Patches arriving in a burst are
//! merged (later wins) and applied once the burst settles.
//!
//! [`GameStateObserver`] owns the single [`CombinedGameState`] and is the
//! only thing that mutates it. It performs no I/O.

use serde::Serialize;
use tracing::debug;

use crate::frame::DecodedFrame;
use crate::lobby::{LobbySnapshot, LobbyTracker};

/// A partial set of DOM-observed fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomPatch {
    pub player_name: Option<String>,
    /// Round label as shown in the header, e.g. `"Round 2 of 3"`.
    pub round_label: Option<String>,
    pub language: Option<String>,
    pub rank: Option<u32>,
    pub points: Option<i64>,
    pub player_count: Option<u32>,
    pub max_slots: Option<u32>,
    /// Whether the game container is visible.
    pub game_visible: Option<bool>,
    /// Text of the game overlay (turn results, "X is choosing a word", ...).
    pub overlay_text: Option<String>,
    /// The userscript's `data-typo_loaded` marker on the body.
    pub typo_loaded: Option<bool>,
}

impl DomPatch {
    /// Fold a newer patch into this one; fields set in `newer` win.
    pub fn merge(&mut self, newer: DomPatch) {
        fn take<T>(slot: &mut Option<T>, newer: Option<T>) {
            if newer.is_some() {
                *slot = newer;
            }
        }
        take(&mut self.player_name, newer.player_name);
        take(&mut self.round_label, newer.round_label);
        take(&mut self.language, newer.language);
        take(&mut self.rank, newer.rank);
        take(&mut self.points, newer.points);
        take(&mut self.player_count, newer.player_count);
        take(&mut self.max_slots, newer.max_slots);
        take(&mut self.game_visible, newer.game_visible);
        take(&mut self.overlay_text, newer.overlay_text);
        take(&mut self.typo_loaded, newer.typo_loaded);
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    #[must_use]
    pub fn with_player_name(mut self, name: impl Into<String>) -> Self {
        self.player_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_round_label(mut self, label: impl Into<String>) -> Self {
        self.round_label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    #[must_use]
    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = Some(rank);
        self
    }

    #[must_use]
    pub fn with_points(mut self, points: i64) -> Self {
        self.points = Some(points);
        self
    }

    #[must_use]
    pub fn with_players(mut self, count: u32, max_slots: u32) -> Self {
        self.player_count = Some(count);
        self.max_slots = Some(max_slots);
        self
    }

    #[must_use]
    pub fn with_game_visible(mut self, visible: bool) -> Self {
        self.game_visible = Some(visible);
        self
    }

    #[must_use]
    pub fn with_overlay_text(mut self, text: impl Into<String>) -> Self {
        self.overlay_text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_typo_loaded(mut self, loaded: bool) -> Self {
        self.typo_loaded = Some(loaded);
        self
    }
}

/// Everything presence sync looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CombinedGameState {
    pub lobby: Option<LobbySnapshot>,
    pub player_name: Option<String>,
    pub round_label: Option<String>,
    pub language: Option<String>,
    pub rank: Option<u32>,
    pub points: Option<i64>,
    pub player_count: Option<u32>,
    pub max_slots: Option<u32>,
    pub active: bool,
    /// Unix milliseconds at which the current game became active.
    pub started_at_ms: Option<u64>,
}

impl CombinedGameState {
    /// DOM name, falling back to our entry in the lobby snapshot.
    pub fn effective_player_name(&self) -> Option<&str> {
        self.player_name
            .as_deref()
            .or_else(|| Some(self.lobby.as_ref()?.me()?.name.as_str()))
            .filter(|name| !name.is_empty())
    }

    pub fn effective_rank(&self) -> Option<u32> {
        self.rank
            .or_else(|| Some(self.lobby.as_ref()?.me()?.rank))
    }

    pub fn effective_points(&self) -> Option<i64> {
        self.points
            .or_else(|| Some(self.lobby.as_ref()?.me()?.score))
    }

    pub fn effective_player_count(&self) -> Option<u32> {
        self.player_count.or_else(|| {
            let count = self.lobby.as_ref()?.player_count();
            u32::try_from(count).ok()
        })
    }

    pub fn effective_max_slots(&self) -> Option<u32> {
        self.max_slots
            .or_else(|| self.lobby.as_ref()?.max_players)
    }

    pub fn lobby_id(&self) -> Option<&str> {
        self.lobby.as_ref().map(|lobby| lobby.lobby_id.as_str())
    }
}

/// Owner of the [`CombinedGameState`].
#[derive(Debug, Default)]
pub struct GameStateObserver {
    state: CombinedGameState,
    tracker: LobbyTracker,
}

impl GameStateObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &CombinedGameState {
        &self.state
    }

    /// Apply a settled DOM patch. Returns `true` if the state changed.
    ///
    /// `now_ms` stamps the start time on an inactive → active transition.
    pub fn apply_dom(&mut self, patch: DomPatch, now_ms: u64) -> bool {
        let before = self.state.clone();

        set_text(&mut self.state.player_name, patch.player_name);
        set_text(&mut self.state.round_label, patch.round_label);
        set_text(&mut self.state.language, patch.language);
        set_value(&mut self.state.rank, patch.rank);
        set_value(&mut self.state.points, patch.points);
        set_value(&mut self.state.player_count, patch.player_count);
        set_value(&mut self.state.max_slots, patch.max_slots);
        if let Some(visible) = patch.game_visible {
            self.set_active(visible, now_ms);
        }

        self.state != before
    }

    /// Drive the active flag.
    ///
    /// The start time is stamped once on entering the active state and
    /// cleared on leaving it; repeated "visible" reports keep the original
    /// stamp.
    pub fn set_active(&mut self, visible: bool, now_ms: u64) {
        match (self.state.active, visible) {
            (false, true) => {
                self.state.active = true;
                if self.state.started_at_ms.is_none() {
                    self.state.started_at_ms = Some(now_ms);
                }
                debug!(started_at_ms = now_ms, "game became active");
            }
            (true, false) => {
                self.state.active = false;
                self.state.started_at_ms = None;
                debug!("game became inactive");
            }
            _ => {}
        }
    }

    /// Run a decoded frame through lobby extraction.
    ///
    /// Returns the snapshot when the frame was accepted; otherwise the held
    /// snapshot is left alone.
    pub fn apply_frame(&mut self, frame: &DecodedFrame) -> Option<&LobbySnapshot> {
        let snapshot = self.tracker.offer(frame)?.clone();
        self.on_lobby_snapshot(snapshot);
        self.state.lobby.as_ref()
    }

    /// Install a validated snapshot.
    pub fn on_lobby_snapshot(&mut self, snapshot: LobbySnapshot) {
        self.state.lobby = Some(snapshot);
    }

    /// Drop all state (page navigated away).
    pub fn reset(&mut self) {
        self.state = CombinedGameState::default();
        self.tracker.clear();
    }
}

fn set_text(slot: &mut Option<String>, observed: Option<String>) {
    if let Some(text) = observed {
        let text = text.trim();
        *slot = (!text.is_empty()).then(|| text.to_string());
    }
}

fn set_value<T>(slot: &mut Option<T>, observed: Option<T>) {
    if observed.is_some() {
        *slot = observed;
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
    use crate::frame::decode;

    const LOBBY_FRAME: &str = r#"42/,["data",{"owner":"1","me":"2","users":[{"id":"1","name":"Alice","score":50},{"id":"2","name":"Bob","score":10}],"id":"ABCD1234","settings":["en",8]}]"#;

    #[test]
    fn merge_prefers_newer_fields() {
        let mut patch = DomPatch::default().with_player_name("old").with_rank(3);
        patch.merge(DomPatch::default().with_player_name("new").with_points(10));
        assert_eq!(patch.player_name.as_deref(), Some("new"));
        assert_eq!(patch.rank, Some(3));
        assert_eq!(patch.points, Some(10));
        assert!(!patch.is_empty());
        assert!(DomPatch::default().is_empty());
    }

    #[test]
    fn start_time_is_stamped_once() {
        let mut observer = GameStateObserver::new();
        observer.apply_dom(DomPatch::default().with_game_visible(true), 1_000);
        assert_eq!(observer.state().started_at_ms, Some(1_000));

        observer.apply_dom(DomPatch::default().with_game_visible(true), 5_000);
        assert_eq!(observer.state().started_at_ms, Some(1_000));

        observer.apply_dom(DomPatch::default().with_game_visible(false), 6_000);
        assert!(!observer.state().active);
        assert!(observer.state().started_at_ms.is_none());

        observer.apply_dom(DomPatch::default().with_game_visible(true), 9_000);
        assert_eq!(observer.state().started_at_ms, Some(9_000));
    }

    #[test]
    fn apply_dom_reports_changes() {
        let mut observer = GameStateObserver::new();
        let patch = DomPatch::default().with_round_label("Round 1 of 3");
        assert!(observer.apply_dom(patch.clone(), 0));
        assert!(!observer.apply_dom(patch, 0));
        assert!(!observer.apply_dom(DomPatch::default(), 0));
    }

    #[test]
    fn empty_text_clears_field() {
        let mut observer = GameStateObserver::new();
        observer.apply_dom(DomPatch::default().with_round_label(" Round 2 "), 0);
        assert_eq!(observer.state().round_label.as_deref(), Some("Round 2"));
        observer.apply_dom(DomPatch::default().with_round_label("  "), 0);
        assert!(observer.state().round_label.is_none());
    }

    #[test]
    fn lobby_snapshot_fills_in_missing_dom_fields() {
        let mut observer = GameStateObserver::new();
        let snapshot = observer.apply_frame(&decode(LOBBY_FRAME).unwrap()).cloned();
        assert_eq!(snapshot.unwrap().lobby_id.as_str(), "ABCD1234");

        let state = observer.state();
        assert_eq!(state.lobby_id(), Some("ABCD1234"));
        assert_eq!(state.effective_player_name(), Some("Bob"));
        assert_eq!(state.effective_rank(), Some(2));
        assert_eq!(state.effective_points(), Some(10));
        assert_eq!(state.effective_player_count(), Some(2));
        assert_eq!(state.effective_max_slots(), Some(8));

        observer.apply_dom(DomPatch::default().with_rank(1).with_players(5, 12), 0);
        let state = observer.state();
        assert_eq!(state.effective_rank(), Some(1));
        assert_eq!(state.effective_player_count(), Some(5));
        assert_eq!(state.effective_max_slots(), Some(12));
    }

    #[test]
    fn rejected_frame_keeps_previous_lobby() {
        let mut observer = GameStateObserver::new();
        observer.apply_frame(&decode(LOBBY_FRAME).unwrap());
        let bad = LOBBY_FRAME.replace("ABCD1234", "ABCD123");
        assert!(observer.apply_frame(&decode(&bad).unwrap()).is_none());
        assert_eq!(observer.state().lobby_id(), Some("ABCD1234"));
    }

    #[test]
    fn reset_clears_everything() {
        let mut observer = GameStateObserver::new();
        observer.apply_frame(&decode(LOBBY_FRAME).unwrap());
        observer.apply_dom(DomPatch::default().with_game_visible(true), 1);
        observer.reset();
        assert_eq!(*observer.state(), CombinedGameState::default());
    }
}
