//! Lobby codes and auto-join URLs.
//!
//! A skribbl.io lobby is addressed by an 8-character alphanumeric code that
//! shows up in invite URLs (`https://skribbl.io/?ABCD1234`), in
//! `skribbl://` deep links, and as the `id` of the lobby payload on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Base URL of the game.
pub const GAME_URL: &str = "https://skribbl.io/";

/// URL scheme registered for deep links.
pub const DEEP_LINK_SCHEME: &str = "skribbl://";

/// Length of every lobby code.
pub const LOBBY_CODE_LEN: usize = 8;

/// A validated lobby code: exactly 8 ASCII alphanumerics.
///
/// ```
/// use skribbl_presence::join::LobbyCode;
///
/// let code = LobbyCode::parse_input("https://skribbl.io/?ABCD1234").unwrap();
/// assert_eq!(code.as_str(), "ABCD1234");
/// assert_eq!(code.game_url(), "https://skribbl.io/?ABCD1234");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LobbyCode(String);

impl LobbyCode {
    /// Accept `code` only if it is exactly a lobby code, with no trimming.
    pub fn new(code: &str) -> Option<Self> {
        is_lobby_code(code).then(|| Self(code.to_string()))
    }

    /// Pull a lobby code out of user input.
    ///
    /// After trimming, the trailing 8 characters must be a lobby code. That
    /// covers a bare code and pasted invite URLs in any shape
    /// (`?CODE`, `&CODE`, `/CODE`).
    pub fn parse_input(input: &str) -> Option<Self> {
        let input = input.trim();
        let start = input.len().checked_sub(LOBBY_CODE_LEN)?;
        Self::new(input.get(start..)?)
    }

    /// Pull a lobby code out of a `skribbl://CODE[/?#...]` deep link.
    pub fn from_deep_link(url: &str) -> Option<Self> {
        let rest = url.trim().strip_prefix(DEEP_LINK_SCHEME)?;
        let code = rest.split(['/', '?', '#']).next()?;
        Self::new(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Invite URL that joins this lobby.
    pub fn game_url(&self) -> String {
        format!("{GAME_URL}?{}", self.0)
    }
}

/// URL to load: the lobby's invite URL, or the landing page.
pub fn game_url(code: Option<&LobbyCode>) -> String {
    code.map_or_else(|| GAME_URL.to_string(), LobbyCode::game_url)
}

/// Returns `true` if `s` is exactly 8 ASCII alphanumerics.
pub fn is_lobby_code(s: &str) -> bool {
    s.len() == LOBBY_CODE_LEN && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

impl fmt::Display for LobbyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LobbyCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if is_lobby_code(&value) {
            Ok(Self(value))
        } else {
            Err(format!("invalid lobby code: {value:?}"))
        }
    }
}

impl From<LobbyCode> for String {
    fn from(code: LobbyCode) -> Self {
        code.0
    }
}

impl AsRef<str> for LobbyCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn bare_code() {
        assert_eq!(LobbyCode::parse_input("  Ab3dEf9H \n").unwrap().as_str(), "Ab3dEf9H");
    }

    #[test]
    fn invite_urls() {
        for input in [
            "https://skribbl.io/?ABCD1234",
            "http://www.skribbl.io/?ABCD1234",
            "skribbl.io/?ABCD1234",
            "skribbl.io/ABCD1234",
            "?ABCD1234",
            "https://skribbl.io/?lang=en&ABCD1234",
            "join me: ABCD1234 ",
        ] {
            assert_eq!(
                LobbyCode::parse_input(input).map(String::from).as_deref(),
                Some("ABCD1234"),
                "input {input:?}"
            );
        }
    }

    #[test]
    fn rejects_wrong_length_and_symbols() {
        for input in ["", "ABC", "ABCD-234", "https://skribbl.io/", "ÄBCD123", "?ABCD123 "] {
            assert!(LobbyCode::parse_input(input).is_none(), "input {input:?}");
        }
    }

    #[test]
    fn longer_input_keeps_trailing_code() {
        assert_eq!(LobbyCode::parse_input("ABCD12345").unwrap().as_str(), "BCD12345");
        assert_eq!(
            LobbyCode::parse_input("https://skribbl.io/?ABCD1234é").map(String::from),
            None
        );
    }

    #[test]
    fn deep_links() {
        assert_eq!(
            LobbyCode::from_deep_link("skribbl://ABCD1234").unwrap().as_str(),
            "ABCD1234"
        );
        assert_eq!(
            LobbyCode::from_deep_link("skribbl://ABCD1234/?x=1#y").unwrap().as_str(),
            "ABCD1234"
        );
        assert!(LobbyCode::from_deep_link("skribbl://ABCD123").is_none());
        assert!(LobbyCode::from_deep_link("https://ABCD1234").is_none());
    }

    #[test]
    fn urls() {
        let code = LobbyCode::new("ABCD1234").unwrap();
        assert_eq!(game_url(Some(&code)), "https://skribbl.io/?ABCD1234");
        assert_eq!(game_url(None), "https://skribbl.io/");
    }

    #[test]
    fn serde_validates() {
        let code: LobbyCode = serde_json::from_str("\"ABCD1234\"").unwrap();
        assert_eq!(code.to_string(), "ABCD1234");
        assert!(serde_json::from_str::<LobbyCode>("\"short\"").is_err());
    }
}
