//! Message envelope: one JSON object per WebSocket frame.
//!
//! ```json
//! { "sender": "...", "recipient": "...", "content": "...", "type": "message",
//!   "id": "...", "iat": 1718000000000 }
//! ```
//!
//! Every field is optional. Absent fields are omitted on the wire (never
//! `null`) and unknown fields are ignored when parsing.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sender name used on envelopes the hub emits itself.
pub const SERVER_SENDER: &str = "Server";

const JOIN_CONTENT: &str = "A new user has joined";
const LEAVE_CONTENT: &str = "A user has left";

/// Errors produced when encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The frame was not a JSON object matching the envelope shape.
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    /// The envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

/// The `type` field of an envelope.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnvelopeKind {
    /// A connection joined the hub.
    Join,
    /// A connection left the hub.
    Leave,
    /// Regular peer traffic.
    Message,
    /// Any other type string, passed through untouched.
    Other(String),
}

impl EnvelopeKind {
    /// Wire representation of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Message => "message",
            Self::Other(s) => s,
        }
    }

    /// This kind with aliases folded in. Some peers announce departures as
    /// `"left"`; the wire string itself is left alone.
    pub fn normalized(&self) -> Self {
        match self {
            Self::Other(s) if s == "left" => Self::Leave,
            other => other.clone(),
        }
    }
}

/// The `iat` field: Unix milliseconds, or an RFC 3339 string kept as sent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum IssuedAt {
    /// Unix milliseconds.
    Millis(i64),
    /// RFC 3339 timestamp, e.g. `2024-06-10T12:00:00.123456789Z`.
    Rfc3339(String),
}

impl IssuedAt {
    /// The current time in milliseconds.
    pub fn now() -> Self {
        Self::Millis(now_millis())
    }

    /// Unix milliseconds, whichever form was sent.
    pub fn as_millis(&self) -> Option<i64> {
        match self {
            Self::Millis(ms) => Some(*ms),
            Self::Rfc3339(text) => chrono::DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|t| t.timestamp_millis()),
        }
    }
}

impl From<String> for EnvelopeKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "join" => Self::Join,
            "leave" => Self::Leave,
            "message" => Self::Message,
            _ => Self::Other(value),
        }
    }
}

impl From<EnvelopeKind> for String {
    fn from(kind: EnvelopeKind) -> Self {
        match kind {
            EnvelopeKind::Other(s) => s,
            other => other.as_str().to_owned(),
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message unit exchanged between peers and the hub.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Who sent the envelope. `"Server"` for lifecycle notices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Intended recipient. Carried through but unused by broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    /// Payload text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Envelope type; absent means [`EnvelopeKind::Message`].
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EnvelopeKind>,
    /// Unique message id. A non-string id is dropped on parse.
    #[serde(
        default,
        deserialize_with = "lenient::id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    /// Issue time. A value that is neither an integer nor an RFC 3339 string
    /// is dropped on parse.
    #[serde(
        default,
        deserialize_with = "lenient::issued_at",
        skip_serializing_if = "Option::is_none"
    )]
    pub iat: Option<IssuedAt>,
}

/// Decoders for the fields peers fill in inconsistently. They never fail, so
/// an odd `id` or `iat` cannot get a connection torn down.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use super::IssuedAt;

    pub(super) fn id<'de, D>(de: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(de)? {
            Value::String(id) => Some(id),
            _ => None,
        })
    }

    pub(super) fn issued_at<'de, D>(de: D) -> Result<Option<IssuedAt>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(de)? {
            Value::Number(n) => n.as_i64().map(IssuedAt::Millis),
            Value::String(text) if chrono::DateTime::parse_from_rfc3339(&text).is_ok() => {
                Some(IssuedAt::Rfc3339(text))
            }
            _ => None,
        })
    }
}

impl Envelope {
    /// Synthetic notice announcing a new connection.
    pub fn join() -> Self {
        Self::notice(EnvelopeKind::Join, JOIN_CONTENT)
    }

    /// Synthetic notice announcing a departed connection.
    pub fn leave() -> Self {
        Self::notice(EnvelopeKind::Leave, LEAVE_CONTENT)
    }

    /// A regular peer message with a fresh id and timestamp.
    pub fn message(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: Some(sender.into()),
            content: Some(content.into()),
            kind: Some(EnvelopeKind::Message),
            id: Some(new_message_id()),
            iat: Some(IssuedAt::now()),
            ..Self::default()
        }
    }

    fn notice(kind: EnvelopeKind, content: &str) -> Self {
        Self {
            sender: Some(SERVER_SENDER.to_owned()),
            content: Some(content.to_owned()),
            kind: Some(kind),
            id: Some(new_message_id()),
            iat: Some(IssuedAt::now()),
            ..Self::default()
        }
    }

    /// Copy of this envelope attributed to `sender`.
    #[must_use]
    pub fn with_sender(self, sender: impl Into<String>) -> Self {
        Self {
            sender: Some(sender.into()),
            ..self
        }
    }

    /// Effective kind, defaulting to [`EnvelopeKind::Message`].
    pub fn kind(&self) -> EnvelopeKind {
        self.kind
            .as_ref()
            .map_or(EnvelopeKind::Message, EnvelopeKind::normalized)
    }

    /// Whether this is a join or leave notice.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self.kind(), EnvelopeKind::Join | EnvelopeKind::Leave)
    }

    /// Whether the hub itself emitted this envelope.
    pub fn is_from_server(&self) -> bool {
        self.sender.as_deref() == Some(SERVER_SENDER)
    }

    /// Serialize to a JSON text frame.
    pub fn to_frame(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(EnvelopeError::Encode)
    }

    /// Parse a JSON text frame.
    pub fn from_frame(frame: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(frame).map_err(EnvelopeError::Malformed)
    }
}

fn new_message_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
