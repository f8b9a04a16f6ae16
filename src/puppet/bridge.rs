//! Seams to the collaborators that own a puppet: the bridging layer that
//! consumes canonical events, and the owning record that persists state.

use async_trait::async_trait;

use super::storage::PuppetRecord;
use super::updates::{CanonicalEvent, Sender};

/// Error reported by the bridging layer.
#[derive(Debug, thiserror::Error)]
#[error("bridge error: {reason}")]
pub struct BridgeError {
    /// Human-readable failure description.
    pub reason: String,
}

impl BridgeError {
    /// Build a bridge error from any displayable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Error reported when the owning record cannot be persisted.
#[derive(Debug, thiserror::Error)]
#[error("failed to persist owning record: {reason}")]
pub struct PersistError {
    /// Human-readable failure description.
    pub reason: String,
}

impl PersistError {
    /// Build a persistence error from any displayable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Consumer of canonical events and target of synchronization triggers.
///
/// One bridge instance may serve many puppets; it must be `Send + Sync`
/// because the update listener and the refresh loop call it from their own
/// tasks.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Receive one canonical event. Events arrive in transport order.
    async fn handle_event(&self, event: CanonicalEvent) -> Result<(), BridgeError>;

    /// Resolve a remote account id into the identity used as message sender.
    async fn resolve_account(&self, account_id: i64) -> Result<Sender, BridgeError>;

    /// Synchronize the contact list. Returns whether anything changed.
    async fn sync_contacts(&self) -> Result<bool, BridgeError>;

    /// Synchronize dialogs (rooms) with the target chat system.
    async fn sync_dialogs(&self) -> Result<(), BridgeError>;
}

/// Externally owned record the puppet's state is persisted through.
#[async_trait]
pub trait OwningRecord: Send + Sync {
    /// Persist the current serialized puppet state.
    ///
    /// Must not return before the write is durable.
    async fn persist(&self, record: &PuppetRecord) -> Result<(), PersistError>;
}
