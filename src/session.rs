//! The presence session: one background task that runs the whole pipeline.
//!
//! [`PresenceSession::start`] spawns a loop that consumes the cross-context
//! channel (tapped frames, game-loaded signals) and DOM patches, and drives
//! presence sync on a fixed settle interval:
//!
//! ```text
//! tap ─► ChannelMessage ─► decode ─► extract ─┐
//!                                             ├─► CombinedGameState ─► settle tick ─► PresenceSink
//! host ─► DomPatch ─► debounce ───────────────┘
//! ```
//!
//! The loop owns every piece of mutable pipeline state, so nothing is
//! locked on the hot path. The returned handle only exposes read-only
//! status and teardown.
//!
//! # Example
//!
//! ```rust,ignore
//! let (tap, frames) = TransportTap::new(WebSocketTransport::connect(&url).await?);
//! let (dom_tx, dom_rx) = tokio::sync::mpsc::unbounded_channel();
//! let (mut session, mut events) = PresenceSession::start(
//!     frames,
//!     dom_rx,
//!     Arc::new(discord),
//!     Arc::new(notifier),
//!     SessionConfig::new(),
//! );
//!
//! dom_tx.send(DomPatch::default().with_game_visible(true))?;
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::Stopped { .. } = event {
//!         break;
//!     }
//! }
//! ```

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{Instant, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use crate::channel::{self, ChannelMessage, GameLoaded, LoadLatch};
use crate::event::SessionEvent;
use crate::frame;
use crate::lobby::LobbySnapshot;
use crate::notify::{NotificationSink, OverlayNotifier, NOTIFICATION_TITLE};
use crate::observer::{DomPatch, GameStateObserver};
use crate::presence::{PresenceKind, PresenceSink, PresenceSyncEngine, DEFAULT_LARGE_IMAGE_KEY};

/// Default settle interval between presence evaluations.
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5);

/// Default quiet period before a burst of DOM patches is applied.
const DEFAULT_DOM_DEBOUNCE: Duration = Duration::from_millis(250);

/// Default wait for the game-loaded signal before assuming it.
const DEFAULT_GAME_LOADED_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`PresenceSession`].
///
/// # Example
///
/// ```
/// use skribbl_presence::session::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::new()
///     .with_sync_interval(Duration::from_secs(15))
///     .with_large_image_key("logo");
/// assert_eq!(config.sync_interval, Duration::from_secs(15));
/// assert_eq!(config.game_loaded_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between settle ticks. Presence is evaluated, and possibly
    /// forwarded, once per tick regardless of how many DOM changes arrived.
    ///
    /// Defaults to **5 seconds**. Values below 1 ms are clamped to 1 ms.
    pub sync_interval: Duration,
    /// Quiet period after the last DOM patch before the merged patch is
    /// applied. A settle tick always applies whatever is pending first.
    ///
    /// Defaults to **250 ms**.
    pub dom_debounce: Duration,
    /// How long to wait for the page's game-loaded signal before assuming
    /// the game loaded anyway.
    ///
    /// Defaults to **10 seconds**.
    pub game_loaded_timeout: Duration,
    /// Capacity of the bounded event channel.
    ///
    /// Events are dropped (with a warning) when the consumer falls behind;
    /// `Stopped` is always delivered. Defaults to **256**, clamped to ≥ 1.
    pub event_channel_capacity: usize,
    /// Time allowed for a graceful shutdown before the task is aborted.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Image key put on every activity.
    pub large_image_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL,
            dom_debounce: DEFAULT_DOM_DEBOUNCE,
            game_loaded_timeout: DEFAULT_GAME_LOADED_TIMEOUT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            large_image_key: DEFAULT_LARGE_IMAGE_KEY.to_string(),
        }
    }

    #[must_use]
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval.max(Duration::from_millis(1));
        self
    }

    #[must_use]
    pub fn with_dom_debounce(mut self, debounce: Duration) -> Self {
        self.dom_debounce = debounce;
        self
    }

    #[must_use]
    pub fn with_game_loaded_timeout(mut self, timeout: Duration) -> Self {
        self.game_loaded_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_large_image_key(mut self, key: impl Into<String>) -> Self {
        self.large_image_key = key.into();
        self
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// Read-only status published by the loop for the handle.
struct SessionState {
    running: AtomicBool,
    game_loaded: AtomicBool,
    lobby: Mutex<Option<LobbySnapshot>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            game_loaded: AtomicBool::new(false),
            lobby: Mutex::new(None),
        }
    }
}

// ── Session handle ──────────────────────────────────────────────────

/// Handle to a running presence pipeline.
///
/// Tear it down with [`shutdown`](Self::shutdown) when the observed page
/// navigates away; dropping the handle aborts the loop without clearing
/// the external presence.
pub struct PresenceSession {
    state: Arc<SessionState>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl PresenceSession {
    /// Spawn the session loop and return a handle plus event receiver.
    ///
    /// # Arguments
    ///
    /// * `frames`: the cross-context channel, usually from a
    ///   [`TransportTap`](crate::tap::TransportTap).
    /// * `dom`: DOM patches reported by the host.
    /// * `presence`: the external rich-presence client.
    /// * `notifications`: the external notification client.
    /// * `config`: timings and payload settings.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start<P, N>(
        frames: mpsc::UnboundedReceiver<ChannelMessage>,
        dom: mpsc::UnboundedReceiver<DomPatch>,
        presence: Arc<P>,
        notifications: Arc<N>,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>)
    where
        P: PresenceSink,
        N: NotificationSink,
    {
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (loaded_tx, loaded_rx) = oneshot::channel::<()>();

        let state = Arc::new(SessionState::new());

        let pipeline = Pipeline {
            observer: GameStateObserver::new(),
            engine: PresenceSyncEngine::new(config.large_image_key.clone()),
            notifier: OverlayNotifier::new(),
            latch: LoadLatch::default(),
            loaded_tx: Some(loaded_tx),
            pending: DomPatch::default(),
            presence,
            notifications,
            event_tx,
            shared: Arc::clone(&state),
        };
        let timings = Timings {
            sync_interval: config.sync_interval.max(Duration::from_millis(1)),
            dom_debounce: config.dom_debounce,
            game_loaded_timeout: config.game_loaded_timeout,
        };

        let task = tokio::spawn(session_loop(
            pipeline,
            frames,
            dom,
            loaded_rx,
            timings,
            shutdown_rx,
        ));

        let session = Self {
            state,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };

        (session, event_rx)
    }

    /// Stop the loop, clearing the external presence if it was set.
    ///
    /// The event receiver yields `Stopped` and then `None`.
    pub async fn shutdown(&mut self) {
        debug!("PresenceSession: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.running.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Returns `true` once the game was signalled (or assumed) loaded.
    pub fn is_game_loaded(&self) -> bool {
        self.state.game_loaded.load(Ordering::Acquire)
    }

    /// The latest accepted lobby snapshot.
    pub async fn current_lobby(&self) -> Option<LobbySnapshot> {
        self.state.lobby.lock().await.clone()
    }
}

impl std::fmt::Debug for PresenceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceSession")
            .field("running", &self.is_running())
            .field("game_loaded", &self.is_game_loaded())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for PresenceSession {
    fn drop(&mut self) {
        // No executor here to drive a graceful shutdown; abort instead.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session loop ────────────────────────────────────────────────────

struct Timings {
    sync_interval: Duration,
    dom_debounce: Duration,
    game_loaded_timeout: Duration,
}

/// Everything the loop owns.
struct Pipeline<P, N> {
    observer: GameStateObserver,
    engine: PresenceSyncEngine,
    notifier: OverlayNotifier,
    latch: LoadLatch,
    /// Page side of the game-loaded race; taken on the first signal.
    loaded_tx: Option<oneshot::Sender<()>>,
    /// DOM patches received since the last apply.
    pending: DomPatch,
    presence: Arc<P>,
    notifications: Arc<N>,
    event_tx: mpsc::Sender<SessionEvent>,
    shared: Arc<SessionState>,
}

/// Background loop multiplexing inputs and timers via `tokio::select!`.
///
/// Exits on shutdown, when the handle is dropped, or when both input
/// channels have closed.
async fn session_loop<P, N>(
    mut pipeline: Pipeline<P, N>,
    mut frames: mpsc::UnboundedReceiver<ChannelMessage>,
    mut dom: mpsc::UnboundedReceiver<DomPatch>,
    loaded_rx: oneshot::Receiver<()>,
    timings: Timings,
    mut shutdown_rx: oneshot::Receiver<()>,
) where
    P: PresenceSink,
    N: NotificationSink,
{
    debug!("session loop started");
    emit_event(&pipeline.event_tx, SessionEvent::Started);

    let mut settle = tokio::time::interval_at(
        Instant::now() + timings.sync_interval,
        timings.sync_interval,
    );
    settle.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let load_race = channel::wait_for_game_loaded(loaded_rx, timings.game_loaded_timeout);
    tokio::pin!(load_race);

    let mut debounce: Option<Pin<Box<Sleep>>> = None;
    let mut frames_open = true;
    let mut dom_open = true;

    let reason = loop {
        if !frames_open && !dom_open {
            break "page inputs closed";
        }

        tokio::select! {
            _ = &mut shutdown_rx => break "session shut down",

            msg = frames.recv(), if frames_open => match msg {
                Some(msg) => pipeline.handle_message(msg).await,
                None => {
                    debug!("frame channel closed");
                    frames_open = false;
                }
            },

            patch = dom.recv(), if dom_open => match patch {
                Some(patch) => {
                    pipeline.pending.merge(patch);
                    debounce = Some(Box::pin(tokio::time::sleep(timings.dom_debounce)));
                }
                None => {
                    debug!("DOM channel closed");
                    dom_open = false;
                }
            },

            () = async {
                if let Some(deadline) = debounce.as_mut() {
                    deadline.await;
                }
            }, if debounce.is_some() => {
                debounce = None;
                pipeline.apply_pending();
            }

            how = &mut load_race, if !pipeline.latch.is_fired() => {
                pipeline.mark_loaded(how);
            }

            _ = settle.tick() => {
                debounce = None;
                pipeline.settle().await;
            }
        }
    };

    pipeline.teardown(reason).await;
    debug!("session loop exited");
}

impl<P, N> Pipeline<P, N>
where
    P: PresenceSink,
    N: NotificationSink,
{
    async fn handle_message(&mut self, msg: ChannelMessage) {
        match msg {
            ChannelMessage::InterceptedData { data } => {
                let Some(text) = data.as_str() else {
                    debug!("ignoring non-text intercepted frame");
                    return;
                };
                let Some(frame) = frame::decode(text) else {
                    debug!(len = text.len(), "dropping malformed frame");
                    return;
                };
                let accepted = self.observer.apply_frame(&frame).cloned();
                if let Some(snapshot) = accepted {
                    let lobby_id = snapshot.lobby_id.clone();
                    *self.shared.lobby.lock().await = Some(snapshot);
                    emit_event(&self.event_tx, SessionEvent::SnapshotAccepted { lobby_id });
                }
            }
            ChannelMessage::GameLoaded => self.signal_loaded(),
            ChannelMessage::Unknown => {}
        }
    }

    /// Apply the merged DOM patch, if any.
    fn apply_pending(&mut self) {
        let patch = std::mem::take(&mut self.pending);
        if patch.is_empty() {
            return;
        }

        if patch.typo_loaded == Some(true) {
            self.signal_loaded();
        }
        if let Some(body) = patch
            .overlay_text
            .as_deref()
            .and_then(|text| self.notifier.observe(text))
        {
            self.notify(body);
        }
        self.observer.apply_dom(patch, now_ms());
    }

    fn notify(&self, body: String) {
        let sink = Arc::clone(&self.notifications);
        tokio::spawn(async move {
            if let Err(e) = sink.notify(NOTIFICATION_TITLE, &body).await {
                warn!("notification sink rejected message: {e}");
            }
        });
    }

    /// Settle the game-loaded race in favour of the page.
    fn signal_loaded(&mut self) {
        if let Some(tx) = self.loaded_tx.take() {
            let _ = tx.send(());
        }
    }

    fn mark_loaded(&mut self, how: GameLoaded) {
        if !self.latch.fire(how) {
            return;
        }
        self.shared.game_loaded.store(true, Ordering::Release);
        info!(?how, "game loaded");
        emit_event(
            &self.event_tx,
            SessionEvent::GameLoaded {
                timed_out: how == GameLoaded::TimedOut,
            },
        );
    }

    /// Settle tick: pending DOM changes land before the diff.
    async fn settle(&mut self) {
        self.apply_pending();

        let update = self
            .engine
            .tick(self.observer.state(), self.presence.as_ref(), now_ms())
            .await;
        if let Some(update) = update {
            let event = match update.kind {
                PresenceKind::Set(_) => SessionEvent::PresenceForwarded { hash: update.hash },
                PresenceKind::Clear => SessionEvent::PresenceCleared,
            };
            emit_event(&self.event_tx, event);
        }
    }

    async fn teardown(mut self, reason: &str) {
        self.engine.clear(self.presence.as_ref()).await;
        self.observer.reset();
        *self.shared.lobby.lock().await = None;
        self.shared.running.store(false, Ordering::Release);
        emit_stopped(&self.event_tx, Some(reason.to_string())).await;
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Emit an event to the event channel. If the channel is full, log a warning
/// and drop the event to avoid blocking the loop.
fn emit_event(event_tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!("event channel full, dropping event: {dropped:?}");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit the final [`Stopped`](SessionEvent::Stopped) event.
///
/// Awaits channel capacity instead of using `try_send`: this event is always
/// last and must not be dropped.
async fn emit_stopped(event_tx: &mpsc::Sender<SessionEvent>, reason: Option<String>) {
    if event_tx.send(SessionEvent::Stopped { reason }).await.is_err() {
        debug!("event channel closed, receiver dropped");
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
    use crate::error::PresenceError;
    use crate::presence::Activity;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct NullPresence {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PresenceSink for NullPresence {
        async fn set_activity(&self, _activity: &Activity) -> Result<(), PresenceError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn clear_activity(&self) -> Result<(), PresenceError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct NullNotifications;

    #[async_trait]
    impl NotificationSink for NullNotifications {
        async fn notify(&self, _title: &str, _body: &str) -> Result<(), PresenceError> {
            Ok(())
        }
    }

    #[allow(clippy::type_complexity)]
    fn start(
        config: SessionConfig,
    ) -> (
        PresenceSession,
        mpsc::Receiver<SessionEvent>,
        mpsc::UnboundedSender<ChannelMessage>,
        mpsc::UnboundedSender<DomPatch>,
    ) {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (dom_tx, dom_rx) = mpsc::unbounded_channel();
        let (session, events) = PresenceSession::start(
            frames_rx,
            dom_rx,
            Arc::new(NullPresence::default()),
            Arc::new(NullNotifications),
            config,
        );
        (session, events, frames_tx, dom_tx)
    }

    #[test]
    fn config_defaults() {
        let config = SessionConfig::new();
        assert_eq!(config.sync_interval, Duration::from_secs(5));
        assert_eq!(config.dom_debounce, Duration::from_millis(250));
        assert_eq!(config.game_loaded_timeout, Duration::from_secs(10));
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.large_image_key, "skribbl");
    }

    #[test]
    fn config_clamps() {
        let config = SessionConfig::new()
            .with_event_channel_capacity(0)
            .with_sync_interval(Duration::ZERO);
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.sync_interval, Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn started_is_first_event() {
        let (mut session, mut events, _frames, _dom) = start(SessionConfig::new());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Started);
        assert!(session.is_running());
        session.shutdown().await;
        assert!(!session.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_emits_stopped_last() {
        let (mut session, mut events, _frames, _dom) = start(SessionConfig::new());
        let _ = events.recv().await; // Started
        session.shutdown().await;

        let event = events.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::Stopped { .. }));
        assert!(events.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn closing_both_inputs_stops_the_loop() {
        let (mut session, mut events, frames, dom) = start(SessionConfig::new());
        let _ = events.recv().await; // Started
        drop(frames);
        drop(dom);

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            SessionEvent::Stopped {
                reason: Some("page inputs closed".into())
            }
        );
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn page_signal_marks_game_loaded() {
        let (mut session, mut events, frames, _dom) = start(SessionConfig::new());
        frames.send(ChannelMessage::GameLoaded).unwrap();

        let _ = events.recv().await; // Started
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::GameLoaded { timed_out: false }
        );
        assert!(session.is_game_loaded());
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn late_signal_after_timeout_is_ignored() {
        let config = SessionConfig::new()
            .with_game_loaded_timeout(Duration::from_secs(2))
            .with_sync_interval(Duration::from_secs(60));
        let (mut session, mut events, frames, _dom) = start(config);
        let began = Instant::now();

        let _ = events.recv().await; // Started
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::GameLoaded { timed_out: true }
        );
        assert!(began.elapsed() >= Duration::from_secs(2));

        frames.send(ChannelMessage::GameLoaded).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(events.try_recv().is_err());
        session.shutdown().await;
    }
}
