//! Update dispatch: raw push envelopes in, canonical events out.
//!
//! The transport delivers loosely shaped JSON envelopes. They are parsed
//! into closed variant types ([`Envelope`], [`InnerUpdate`]) with explicit
//! unknown cases, classified into [`CanonicalEvent`]s, and forwarded to the
//! bridge. Nothing raised while handling one envelope escapes
//! [`Dispatcher::handle_envelope`]; the stream must outlive bad input.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::bridge::{Bridge, BridgeError};
use super::peer::{Peer, PeerError};

/// Prefix of raw user-status tags (`userStatusOnline`, `userStatusOffline`, ...).
const USER_STATUS_PREFIX: &str = "userStatus";

/// Errors raised while handling a single update.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The envelope or update was `null`.
    #[error("empty update")]
    Empty,

    /// The payload has no `_` kind tag.
    #[error("update has no kind tag: {0}")]
    MissingKind(String),

    /// A known kind did not have the expected fields.
    #[error("malformed {kind}: {source}")]
    Malformed {
        /// Kind tag of the payload.
        kind: String,
        /// Deserialization failure.
        source: serde_json::Error,
    },

    /// A message target could not be normalized.
    #[error(transparent)]
    Peer(#[from] PeerError),

    /// The bridge could not resolve the sender account.
    #[error("sender lookup failed: {0}")]
    SenderLookup(#[source] BridgeError),

    /// The bridge rejected the canonical event.
    #[error("event delivery failed: {0}")]
    Delivery(#[source] BridgeError),
}

/// Identity of a message author as seen by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Remote account id.
    pub account_id: i64,
    /// Name to show for the author, when the bridge knows one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Sender {
    /// Sender known only by account id.
    pub fn from_id(account_id: i64) -> Self {
        Self {
            account_id,
            display_name: None,
        }
    }
}

/// Protocol-agnostic event handed to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalEvent {
    /// A message arrived.
    Message {
        /// Author.
        sender: Sender,
        /// Conversation the message belongs to.
        target: Peer,
        /// Message text.
        text: String,
    },
    /// An account's presence changed.
    Presence {
        /// Account whose status changed.
        account_id: i64,
        /// New status, e.g. `Online`, `Offline`, `Recently`.
        status: String,
    },
    /// An account is typing.
    Typing {
        /// Account that is typing.
        account_id: i64,
        /// Conversation being typed in.
        target: Peer,
    },
}

/// Outer shape of a pushed update.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// `updateShort`: exactly one wrapped inner update.
    Short(Value),
    /// `updates`: a batch of inner updates in arrival order.
    Batch(Vec<Value>),
    /// `updateShortMessage` / `updateShortChatMessage`: already inner-shaped.
    Direct(Value),
    /// Any other envelope kind.
    Unknown {
        /// Raw kind tag.
        kind: String,
    },
}

#[derive(Deserialize)]
struct ShortRaw {
    update: Value,
}

#[derive(Deserialize)]
struct BatchRaw {
    updates: Vec<Value>,
}

impl Envelope {
    /// Parse a raw envelope.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] for `null`, untagged or malformed envelopes.
    pub fn from_value(raw: Value) -> Result<Self, DispatchError> {
        let kind = kind_of(&raw)?;
        match kind.as_str() {
            "updateShort" => Ok(Self::Short(parse::<ShortRaw>(&kind, raw)?.update)),
            "updates" => Ok(Self::Batch(parse::<BatchRaw>(&kind, raw)?.updates)),
            "updateShortMessage" | "updateShortChatMessage" => Ok(Self::Direct(raw)),
            _ => Ok(Self::Unknown { kind }),
        }
    }
}

/// Individual update, keyed by its own kind tag.
#[derive(Debug, Clone, PartialEq)]
pub enum InnerUpdate {
    /// `updateUserStatus`.
    UserStatus {
        /// Account whose status changed.
        user_id: i64,
        /// Raw status tag, e.g. `userStatusOnline`.
        status: String,
    },
    /// `updateUserTyping`: typing in a one-to-one conversation.
    UserTyping {
        /// Account that is typing.
        user_id: i64,
    },
    /// `updateChatUserTyping`: typing in a group.
    ChatUserTyping {
        /// Account that is typing.
        user_id: i64,
        /// Group being typed in.
        chat_id: i64,
    },
    /// `updateShortMessage`: one-to-one message shorthand.
    ShortMessage {
        /// The other party of the conversation.
        user_id: i64,
        /// Message text.
        message: String,
    },
    /// `updateShortChatMessage`: group message shorthand.
    ShortChatMessage {
        /// Author account id.
        from_id: i64,
        /// Group the message was posted in.
        chat_id: i64,
        /// Message text.
        message: String,
    },
    /// `updateNewMessage`: full message object.
    NewMessage {
        /// Author account id.
        from_id: i64,
        /// Raw target peer, in any supported encoding.
        to_id: Value,
        /// Message text.
        message: String,
    },
    /// Any other kind, kept whole for logging.
    Unknown {
        /// Raw kind tag.
        kind: String,
        /// Full payload.
        raw: Value,
    },
}

#[derive(Deserialize)]
struct StatusTag {
    #[serde(rename = "_")]
    kind: String,
}

#[derive(Deserialize)]
struct UserStatusRaw {
    user_id: i64,
    status: StatusTag,
}

#[derive(Deserialize)]
struct UserTypingRaw {
    user_id: i64,
}

#[derive(Deserialize)]
struct ChatUserTypingRaw {
    user_id: i64,
    chat_id: i64,
}

#[derive(Deserialize)]
struct ShortMessageRaw {
    user_id: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ShortChatMessageRaw {
    #[serde(alias = "user_id")]
    from_id: i64,
    chat_id: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct NewMessageRaw {
    message: MessageRaw,
}

#[derive(Deserialize)]
struct MessageRaw {
    from_id: i64,
    to_id: Value,
    #[serde(default)]
    message: String,
}

impl InnerUpdate {
    /// Parse a raw inner update.
    ///
    /// Unknown kinds parse successfully into [`InnerUpdate::Unknown`].
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] for `null` or untagged payloads, and for
    /// known kinds missing required fields.
    pub fn from_value(raw: Value) -> Result<Self, DispatchError> {
        let kind = kind_of(&raw)?;
        let update = match kind.as_str() {
            "updateUserStatus" => {
                let r: UserStatusRaw = parse(&kind, raw)?;
                Self::UserStatus {
                    user_id: r.user_id,
                    status: r.status.kind,
                }
            }
            "updateUserTyping" => {
                let r: UserTypingRaw = parse(&kind, raw)?;
                Self::UserTyping { user_id: r.user_id }
            }
            "updateChatUserTyping" => {
                let r: ChatUserTypingRaw = parse(&kind, raw)?;
                Self::ChatUserTyping {
                    user_id: r.user_id,
                    chat_id: r.chat_id,
                }
            }
            "updateShortMessage" => {
                let r: ShortMessageRaw = parse(&kind, raw)?;
                Self::ShortMessage {
                    user_id: r.user_id,
                    message: r.message,
                }
            }
            "updateShortChatMessage" => {
                let r: ShortChatMessageRaw = parse(&kind, raw)?;
                Self::ShortChatMessage {
                    from_id: r.from_id,
                    chat_id: r.chat_id,
                    message: r.message,
                }
            }
            "updateNewMessage" => {
                let r: NewMessageRaw = parse(&kind, raw)?;
                Self::NewMessage {
                    from_id: r.message.from_id,
                    to_id: r.message.to_id,
                    message: r.message.message,
                }
            }
            _ => Self::Unknown { kind, raw },
        };
        Ok(update)
    }
}

/// Read the `_` kind tag of a raw payload.
fn kind_of(raw: &Value) -> Result<String, DispatchError> {
    if raw.is_null() {
        return Err(DispatchError::Empty);
    }
    raw.get("_")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| DispatchError::MissingKind(raw.to_string()))
}

fn parse<T: DeserializeOwned>(kind: &str, raw: Value) -> Result<T, DispatchError> {
    serde_json::from_value(raw).map_err(|source| DispatchError::Malformed {
        kind: kind.to_owned(),
        source,
    })
}

/// Status text for a raw status tag.
pub fn status_text(tag: &str) -> &str {
    tag.strip_prefix(USER_STATUS_PREFIX).unwrap_or(tag)
}

/// Classifies updates and forwards canonical events to the bridge.
#[derive(Clone)]
pub struct Dispatcher {
    bridge: Arc<dyn Bridge>,
}

impl Dispatcher {
    /// Create a dispatcher delivering to `bridge`.
    pub fn new(bridge: Arc<dyn Bridge>) -> Self {
        Self { bridge }
    }

    /// Handle one raw envelope. Never fails; problems are logged.
    pub async fn handle_envelope(&self, raw: Value) {
        if let Err(e) = self.try_handle_envelope(raw).await {
            warn!(error = %e, "error handling update");
        }
    }

    async fn try_handle_envelope(&self, raw: Value) -> Result<(), DispatchError> {
        match Envelope::from_value(raw)? {
            Envelope::Short(inner) | Envelope::Direct(inner) => self.handle_update(inner).await,
            Envelope::Batch(updates) => {
                for (index, inner) in updates.into_iter().enumerate() {
                    if let Err(e) = self.handle_update(inner).await {
                        warn!(index, error = %e, "error handling update in batch");
                    }
                }
                Ok(())
            }
            Envelope::Unknown { kind } => {
                info!(kind, "unrecognized update envelope");
                Ok(())
            }
        }
    }

    /// Parse, classify and deliver one inner update.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the update is malformed, its target
    /// cannot be normalized, or the bridge fails.
    pub async fn handle_update(&self, raw: Value) -> Result<(), DispatchError> {
        let update = InnerUpdate::from_value(raw)?;
        let Some(event) = self.classify(update).await? else {
            return Ok(());
        };
        debug!(?event, "delivering canonical event");
        self.bridge
            .handle_event(event)
            .await
            .map_err(DispatchError::Delivery)
    }

    /// Turn an inner update into a canonical event, if it maps to one.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] when sender lookup or peer normalization fails.
    pub async fn classify(
        &self,
        update: InnerUpdate,
    ) -> Result<Option<CanonicalEvent>, DispatchError> {
        let event = match update {
            InnerUpdate::UserStatus { user_id, status } => CanonicalEvent::Presence {
                account_id: user_id,
                status: status_text(&status).to_owned(),
            },
            InnerUpdate::UserTyping { user_id } => CanonicalEvent::Typing {
                account_id: user_id,
                target: Peer::User(user_id),
            },
            InnerUpdate::ChatUserTyping { user_id, chat_id } => CanonicalEvent::Typing {
                account_id: user_id,
                target: Peer::Chat(chat_id),
            },
            InnerUpdate::ShortMessage { user_id, message } => CanonicalEvent::Message {
                sender: self.resolve_sender(user_id).await?,
                target: Peer::User(user_id),
                text: message,
            },
            InnerUpdate::ShortChatMessage {
                from_id,
                chat_id,
                message,
            } => CanonicalEvent::Message {
                sender: self.resolve_sender(from_id).await?,
                target: Peer::Chat(chat_id),
                text: message,
            },
            // Full messages carry the author id directly; no bridge lookup.
            InnerUpdate::NewMessage {
                from_id,
                to_id,
                message,
            } => CanonicalEvent::Message {
                sender: Sender::from_id(from_id),
                target: Peer::from_raw(&to_id)?,
                text: message,
            },
            InnerUpdate::Unknown { kind, raw } => {
                info!(kind, payload = %raw, "unhandled update kind");
                return Ok(None);
            }
        };
        Ok(Some(event))
    }

    async fn resolve_sender(&self, account_id: i64) -> Result<Sender, DispatchError> {
        self.bridge
            .resolve_account(account_id)
            .await
            .map_err(DispatchError::SenderLookup)
    }
}

/// Drain the push-update stream into `dispatcher` until the stream closes
/// or shutdown is signalled.
///
/// Envelopes are handled one at a time, so arrival order is preserved.
pub async fn run_update_listener(
    mut updates: mpsc::Receiver<Value>,
    dispatcher: Dispatcher,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("update listener started");
    loop {
        tokio::select! {
            received = updates.recv() => match received {
                Some(raw) => dispatcher.handle_envelope(raw).await,
                None => {
                    info!("update stream closed");
                    break;
                }
            },
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    info!("update listener shutting down");
                    break;
                }
            }
        }
    }
}
