//! Defensive decoder for Engine.IO / Socket.IO text frames.
//!
//! The game's transport speaks the textual Engine.IO v4 encoding with
//! Socket.IO packets nested inside `message` frames:
//!
//! ```text
//! <engine digit>[<socket digit>[/<namespace>,][<ack id>][<json payload>]]
//! ```
//!
//! There is no schema and no version negotiation we can rely on, so
//! [`decode`] never fails loudly. Anything it cannot make sense of is either
//! rejected outright (`None`) or decoded with an opaque payload.
//!
//! # Example
//!
//! ```
//! use skribbl_presence::frame::{decode, EngineType, SocketType};
//!
//! let frame = decode(r#"42["chat","hi"]"#).unwrap();
//! assert_eq!(frame.engine_type, EngineType::Message);
//! assert_eq!(frame.socket_type, Some(SocketType::Event));
//!
//! let payload = frame.payload.unwrap();
//! assert_eq!(payload.event_name.as_deref(), Some("chat"));
//! assert_eq!(payload.args, vec![serde_json::json!("hi")]);
//!
//! assert!(decode("x").is_none());
//! ```

use serde_json::Value;

/// The namespace implied when a frame does not name one.
pub const DEFAULT_NAMESPACE: &str = "/";

// ── Packet types ────────────────────────────────────────────────────

/// Outer Engine.IO packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineType {
    Open,
    Close,
    Ping,
    Pong,
    Message,
    Upgrade,
    Noop,
}

impl EngineType {
    /// Map a wire digit (`'0'..='6'`) to its packet type.
    pub fn from_digit(byte: u8) -> Option<Self> {
        match byte {
            b'0' => Some(Self::Open),
            b'1' => Some(Self::Close),
            b'2' => Some(Self::Ping),
            b'3' => Some(Self::Pong),
            b'4' => Some(Self::Message),
            b'5' => Some(Self::Upgrade),
            b'6' => Some(Self::Noop),
            _ => None,
        }
    }

    /// The wire digit for this packet type.
    pub fn as_digit(self) -> char {
        match self {
            Self::Open => '0',
            Self::Close => '1',
            Self::Ping => '2',
            Self::Pong => '3',
            Self::Message => '4',
            Self::Upgrade => '5',
            Self::Noop => '6',
        }
    }
}

/// Inner Socket.IO packet type, present only inside Engine.IO messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
    Connect,
    Disconnect,
    Event,
    Ack,
    Error,
    BinaryEvent,
    BinaryAck,
}

impl SocketType {
    /// Map a wire digit (`'0'..='6'`) to its packet type.
    pub fn from_digit(byte: u8) -> Option<Self> {
        match byte {
            b'0' => Some(Self::Connect),
            b'1' => Some(Self::Disconnect),
            b'2' => Some(Self::Event),
            b'3' => Some(Self::Ack),
            b'4' => Some(Self::Error),
            b'5' => Some(Self::BinaryEvent),
            b'6' => Some(Self::BinaryAck),
            _ => None,
        }
    }

    /// The wire digit for this packet type.
    pub fn as_digit(self) -> char {
        match self {
            Self::Connect => '0',
            Self::Disconnect => '1',
            Self::Event => '2',
            Self::Ack => '3',
            Self::Error => '4',
            Self::BinaryEvent => '5',
            Self::BinaryAck => '6',
        }
    }

    /// Binary packets carry attachments we never decode.
    pub fn is_binary(self) -> bool {
        matches!(self, Self::BinaryEvent | Self::BinaryAck)
    }
}

// ── Decoded frame ───────────────────────────────────────────────────

/// The JSON tail of a Socket.IO packet.
///
/// For a well-formed payload exactly one of `event_name` and `raw` is set.
/// When the tail is not valid JSON both are `None` and the undecoded text
/// is kept in `opaque`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventPayload {
    /// Event name when the payload is an array starting with a string.
    pub event_name: Option<String>,
    /// Event arguments following the name. Empty for non-event payloads.
    pub args: Vec<Value>,
    /// The decoded JSON value when it is not a named event.
    pub raw: Option<Value>,
    /// The raw tail when it could not be parsed as JSON.
    pub opaque: Option<String>,
}

impl EventPayload {
    /// A named event with its arguments.
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            event_name: Some(name.into()),
            args,
            ..Self::default()
        }
    }

    /// Classify a decoded JSON value.
    fn from_value(value: Value) -> Self {
        match value {
            Value::Array(mut items)
                if matches!(items.first(), Some(Value::String(_))) =>
            {
                let rest = items.split_off(1);
                let name = match items.pop() {
                    Some(Value::String(name)) => name,
                    _ => return Self::default(),
                };
                Self::event(name, rest)
            }
            other => Self {
                raw: Some(other),
                ..Self::default()
            },
        }
    }

    /// Returns `true` when the tail could not be decoded as JSON.
    pub fn is_opaque(&self) -> bool {
        self.event_name.is_none() && self.raw.is_none()
    }
}

/// A structurally decoded Engine.IO frame.
///
/// Socket-level fields (`socket_type`, `payload`, a non-default `namespace`,
/// `ack_id`) only appear when `engine_type` is [`EngineType::Message`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub engine_type: EngineType,
    pub socket_type: Option<SocketType>,
    /// Always starts with `/`.
    pub namespace: String,
    pub ack_id: Option<u64>,
    pub payload: Option<EventPayload>,
    pub is_binary: bool,
}

impl DecodedFrame {
    /// A frame carrying nothing but its Engine.IO type.
    pub fn engine_only(engine_type: EngineType) -> Self {
        Self {
            engine_type,
            socket_type: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            ack_id: None,
            payload: None,
            is_binary: false,
        }
    }

    /// A Socket.IO event frame on the given namespace.
    pub fn event(namespace: impl Into<String>, name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            engine_type: EngineType::Message,
            socket_type: Some(SocketType::Event),
            namespace: namespace.into(),
            ack_id: None,
            payload: Some(EventPayload::event(name, args)),
            is_binary: false,
        }
    }

    /// The event name, if this frame is a named Socket.IO event.
    pub fn event_name(&self) -> Option<&str> {
        self.payload.as_ref()?.event_name.as_deref()
    }

    /// Encode the frame back into its textual wire form.
    ///
    /// Namespaces are always written explicitly (`/,` for the default one),
    /// which is what the game server itself sends.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.engine_type.as_digit());

        let Some(socket_type) = self.socket_type else {
            return out;
        };
        out.push(socket_type.as_digit());
        out.push_str(&self.namespace);
        out.push(',');
        if let Some(ack_id) = self.ack_id {
            out.push_str(&ack_id.to_string());
        }

        if let Some(payload) = &self.payload {
            if let Some(name) = &payload.event_name {
                let mut items = Vec::with_capacity(payload.args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(payload.args.iter().cloned());
                out.push_str(&Value::Array(items).to_string());
            } else if let Some(raw) = &payload.raw {
                out.push_str(&raw.to_string());
            } else if let Some(opaque) = &payload.opaque {
                out.push_str(opaque);
            }
        }
        out
    }
}

// ── Decoder ─────────────────────────────────────────────────────────

/// Decode one raw transport frame.
///
/// Returns `None` when the frame does not start with an Engine.IO type digit,
/// or when a `message` frame lacks a Socket.IO type digit or carries an ack
/// id that does not fit in a `u64`. Every other input yields a frame; a tail
/// that is not valid JSON is kept as an opaque payload.
///
/// Binary Socket.IO packets are flagged with `is_binary` and not decoded
/// past their type digit.
pub fn decode(raw: &str) -> Option<DecodedFrame> {
    let bytes = raw.as_bytes();
    let engine_type = EngineType::from_digit(*bytes.first()?)?;

    if engine_type != EngineType::Message {
        return Some(DecodedFrame::engine_only(engine_type));
    }

    let socket_type = SocketType::from_digit(*bytes.get(1)?)?;
    if socket_type.is_binary() {
        return Some(DecodedFrame {
            engine_type,
            socket_type: Some(socket_type),
            namespace: DEFAULT_NAMESPACE.to_string(),
            ack_id: None,
            payload: None,
            is_binary: true,
        });
    }

    let mut pos = 2;

    // Everything we step over is ASCII, so `pos` stays on a char boundary.
    let mut namespace = DEFAULT_NAMESPACE.to_string();
    if bytes.get(pos) == Some(&b'/') {
        let start = pos;
        while bytes.get(pos).is_some_and(|b| *b != b',') {
            pos += 1;
        }
        namespace = raw.get(start..pos)?.to_string();
        if bytes.get(pos) == Some(&b',') {
            pos += 1;
        }
    }

    let ack_start = pos;
    while bytes.get(pos).is_some_and(u8::is_ascii_digit) {
        pos += 1;
    }
    let ack_id = if pos > ack_start {
        Some(raw.get(ack_start..pos)?.parse::<u64>().ok()?)
    } else {
        None
    };

    let tail = raw.get(pos..).unwrap_or_default();
    let payload = if tail.is_empty() {
        None
    } else {
        Some(match serde_json::from_str::<Value>(tail) {
            Ok(value) => EventPayload::from_value(value),
            Err(_) => EventPayload {
                opaque: Some(tail.to_string()),
                ..EventPayload::default()
            },
        })
    };

    Some(DecodedFrame {
        engine_type,
        socket_type: Some(socket_type),
        namespace,
        ack_id,
        payload,
        is_binary: false,
    })
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
    use serde_json::json;

    #[test]
    fn rejects_empty_and_non_digit_prefixes() {
        for raw in ["", "a", " 4", "-1", "{}", "[\"x\"]", "7", "9abc", "é"] {
            assert!(decode(raw).is_none(), "expected rejection for {raw:?}");
        }
    }

    #[test]
    fn non_message_frames_carry_only_engine_type() {
        let cases = [
            ("0{\"sid\":\"abc\"}", EngineType::Open),
            ("1", EngineType::Close),
            ("2", EngineType::Ping),
            ("3ok", EngineType::Pong),
            ("5", EngineType::Upgrade),
            ("6", EngineType::Noop),
        ];
        for (raw, expected) in cases {
            let frame = decode(raw).unwrap();
            assert_eq!(frame, DecodedFrame::engine_only(expected), "frame {raw:?}");
        }
    }

    #[test]
    fn message_without_socket_digit_is_rejected() {
        assert!(decode("4").is_none());
        assert!(decode("4x").is_none());
        assert!(decode("47").is_none());
    }

    #[test]
    fn connect_frame_with_namespace_and_no_payload() {
        let frame = decode("40/admin,").unwrap();
        assert_eq!(frame.socket_type, Some(SocketType::Connect));
        assert_eq!(frame.namespace, "/admin");
        assert!(frame.payload.is_none());
        assert!(frame.ack_id.is_none());
    }

    #[test]
    fn namespace_without_comma_consumes_rest() {
        let frame = decode("40/chat").unwrap();
        assert_eq!(frame.namespace, "/chat");
        assert!(frame.payload.is_none());
    }

    #[test]
    fn default_namespace_when_absent() {
        let frame = decode(r#"42["data",1]"#).unwrap();
        assert_eq!(frame.namespace, "/");
        assert_eq!(frame.event_name(), Some("data"));
        assert_eq!(frame.payload.unwrap().args, vec![json!(1)]);
    }

    #[test]
    fn ack_id_is_parsed() {
        let frame = decode(r#"43/,17["ok"]"#).unwrap();
        assert_eq!(frame.socket_type, Some(SocketType::Ack));
        assert_eq!(frame.ack_id, Some(17));
        assert_eq!(frame.event_name(), Some("ok"));
    }

    #[test]
    fn oversized_ack_id_is_rejected() {
        assert!(decode("4299999999999999999999999[\"x\"]").is_none());
    }

    #[test]
    fn array_without_leading_string_is_raw() {
        let frame = decode("43/,5[1,\"two\"]").unwrap();
        let payload = frame.payload.unwrap();
        assert!(payload.event_name.is_none());
        assert!(payload.args.is_empty());
        assert_eq!(payload.raw, Some(json!([1, "two"])));
    }

    #[test]
    fn object_payload_is_raw() {
        let frame = decode(r#"44{"message":"nope"}"#).unwrap();
        let payload = frame.payload.unwrap();
        assert_eq!(payload.raw, Some(json!({"message": "nope"})));
        assert!(payload.event_name.is_none());
    }

    #[test]
    fn malformed_json_tail_is_kept_opaque() {
        let frame = decode(r#"42["data",{"trunc"#).unwrap();
        let payload = frame.payload.unwrap();
        assert!(payload.is_opaque());
        assert_eq!(payload.opaque.as_deref(), Some(r#"["data",{"trunc"#));
    }

    #[test]
    fn binary_frames_are_flagged_and_not_decoded() {
        let frame = decode(r#"451-["upload",{"_placeholder":true,"num":0}]"#).unwrap();
        assert!(frame.is_binary);
        assert_eq!(frame.socket_type, Some(SocketType::BinaryEvent));
        assert!(frame.payload.is_none());

        let frame = decode("46").unwrap();
        assert!(frame.is_binary);
    }

    #[test]
    fn multibyte_payload_is_preserved() {
        let frame = decode(r#"42["chat","héllo 🎨"]"#).unwrap();
        assert_eq!(frame.payload.unwrap().args, vec![json!("héllo 🎨")]);
    }

    #[test]
    fn encode_writes_explicit_namespace() {
        let frame = DecodedFrame::event("/", "data", vec![json!({"id": "ABCD1234"})]);
        assert_eq!(frame.encode(), r#"42/,["data",{"id":"ABCD1234"}]"#);
        assert_eq!(DecodedFrame::engine_only(EngineType::Ping).encode(), "2");
    }

    #[test]
    fn encoded_event_decodes_to_same_frame() {
        let frame = DecodedFrame::event(
            "/",
            "data",
            vec![json!({"id": 4, "data": {"owner": 0}}), json!([1, 2])],
        );
        assert_eq!(decode(&frame.encode()).unwrap(), frame);
    }
}
