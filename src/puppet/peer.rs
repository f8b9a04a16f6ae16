//! Conversation targets and their raw protocol encodings.

use serde::Serialize;
use serde_json::{json, Value};

/// Errors from peer normalization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    /// The raw peer has no `_` kind tag.
    #[error("peer has no kind tag: {0}")]
    MissingKind(String),

    /// The raw peer kind is not one this crate understands.
    #[error("unsupported peer encoding: {0}")]
    UnsupportedEncoding(String),

    /// The id field for the peer kind is missing or not an integer.
    #[error("peer {kind} is missing integer field {field}")]
    MissingId {
        /// Raw peer kind.
        kind: String,
        /// Field that should hold the id.
        field: &'static str,
    },
}

/// A remote conversation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Peer {
    /// One-to-one conversation with a user.
    User(i64),
    /// Group conversation.
    Chat(i64),
}

impl Peer {
    /// Normalize a raw protocol peer.
    ///
    /// Accepts `peerUser`/`inputPeerUser` for individuals, and both the
    /// `peerChat` and `peerChannel` encodings (plus their `inputPeer*`
    /// forms) for groups.
    ///
    /// # Errors
    ///
    /// Returns [`PeerError`] for unknown encodings or missing ids.
    pub fn from_raw(raw: &Value) -> Result<Self, PeerError> {
        let kind = raw
            .get("_")
            .and_then(Value::as_str)
            .ok_or_else(|| PeerError::MissingKind(raw.to_string()))?;

        let (field, make): (&'static str, fn(i64) -> Peer) = match kind {
            "peerUser" | "inputPeerUser" => ("user_id", Peer::User),
            "peerChat" | "inputPeerChat" => ("chat_id", Peer::Chat),
            "peerChannel" | "inputPeerChannel" => ("channel_id", Peer::Chat),
            other => return Err(PeerError::UnsupportedEncoding(other.to_owned())),
        };

        raw.get(field)
            .and_then(Value::as_i64)
            .map(make)
            .ok_or_else(|| PeerError::MissingId {
                kind: kind.to_owned(),
                field,
            })
    }

    /// Numeric id of the target.
    pub fn id(&self) -> i64 {
        match self {
            Self::User(id) | Self::Chat(id) => *id,
        }
    }

    /// Encoding used when addressing this peer in outbound calls.
    pub fn to_input_peer(&self) -> Value {
        match self {
            Self::User(id) => json!({ "_": "inputPeerUser", "user_id": id }),
            Self::Chat(id) => json!({ "_": "inputPeerChat", "chat_id": id }),
        }
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Chat(id) => write!(f, "chat:{id}"),
        }
    }
}
