//! Native notifications for game overlay messages.
//!
//! The game shows turn results and prompts ("Alice is choosing a word!",
//! "The word was ...") in an overlay. Each distinct message becomes one
//! desktop notification; round banners are skipped because they repeat
//! what presence already shows.

use async_trait::async_trait;

use crate::error::PresenceError;

/// Title used for every overlay notification.
pub const NOTIFICATION_TITLE: &str = "skribbl.io";

/// The external notification client. Fire-and-forget.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn notify(&self, title: &str, body: &str) -> Result<(), PresenceError>;
}

/// Filters overlay text down to notifications worth sending.
#[derive(Debug, Default)]
pub struct OverlayNotifier {
    last: Option<String>,
}

impl OverlayNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the notification body for `text`, or `None` if it should be
    /// suppressed (empty, a round banner, or the same as last time).
    pub fn observe(&mut self, text: &str) -> Option<String> {
        let text = text.trim();
        if text.is_empty() || text.starts_with("Round") {
            return None;
        }
        if self.last.as_deref() == Some(text) {
            return None;
        }
        self.last = Some(text.to_string());
        self.last.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn suppresses_repeats_banners_and_blanks() {
        let mut notifier = OverlayNotifier::new();
        assert_eq!(
            notifier.observe("  Alice is choosing a word! ").as_deref(),
            Some("Alice is choosing a word!")
        );
        assert!(notifier.observe("Alice is choosing a word!").is_none());
        assert!(notifier.observe("Round 2").is_none());
        assert!(notifier.observe("   ").is_none());
        assert_eq!(
            notifier.observe("The word was 'tree'").as_deref(),
            Some("The word was 'tree'")
        );
        // A banner in between does not reset the repeat filter.
        assert!(notifier.observe("The word was 'tree'").is_none());
    }
}
