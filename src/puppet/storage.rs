//! Credential store adapter over the owning record.
//!
//! The protocol engine keeps its auth keys and data-center bookkeeping in a
//! flat key/value blob. Every mutation is written through to the owning
//! record before the call returns; reads are served from memory.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::bridge::{OwningRecord, PersistError};

/// Flat key/value blob holding credentials and profile fields.
pub type CredentialBlob = serde_json::Map<String, Value>;

/// Blob key for the account handle.
pub const KEY_USERNAME: &str = "username";
/// Blob key for the first name.
pub const KEY_FIRST_NAME: &str = "firstName";
/// Blob key for the last name.
pub const KEY_LAST_NAME: &str = "lastName";
/// Blob key for the phone number.
pub const KEY_PHONE_NUMBER: &str = "phoneNumber";

/// Persisted layout of a puppet: the account id merged into the blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PuppetRecord {
    /// Remote account identifier, absent until sign-in completes.
    #[serde(rename = "userID", default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<i64>,
    /// Everything else: auth keys, data-center ids, profile fields.
    #[serde(flatten)]
    pub data: CredentialBlob,
}

impl PuppetRecord {
    /// Human-readable name for the account.
    ///
    /// `"first last"` when either name part is set, otherwise the handle,
    /// otherwise the phone number.
    pub fn display_name(&self) -> Option<String> {
        let first = self.text(KEY_FIRST_NAME);
        let last = self.text(KEY_LAST_NAME);
        if first.is_some() || last.is_some() {
            return Some(format!(
                "{} {}",
                first.unwrap_or_default(),
                last.unwrap_or_default()
            ));
        }
        if let Some(username) = self.text(KEY_USERNAME) {
            return Some(username.to_owned());
        }
        self.text(KEY_PHONE_NUMBER).map(str::to_owned)
    }

    /// Non-empty string value stored under `key`.
    fn text(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Profile fields captured when sign-in completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountProfile {
    /// Remote account identifier.
    pub account_id: i64,
    /// Account handle.
    pub username: Option<String>,
    /// First name.
    pub first_name: Option<String>,
    /// Last name.
    pub last_name: Option<String>,
    /// Phone number.
    pub phone_number: Option<String>,
}

/// Write-through key/value store backed by an [`OwningRecord`].
///
/// Cloning yields another handle to the same state; the protocol engine and
/// the puppet share one instance.
#[derive(Clone)]
pub struct PuppetStorage {
    inner: Arc<StorageInner>,
}

struct StorageInner {
    /// Held across the persist call so writes reach the record in order.
    state: Mutex<PuppetRecord>,
    record: Arc<dyn OwningRecord>,
}

impl std::fmt::Debug for PuppetStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PuppetStorage")
            .field("values", &"[REDACTED]")
            .finish()
    }
}

impl PuppetStorage {
    /// Wrap a loaded record.
    pub fn new(record: Arc<dyn OwningRecord>, initial: PuppetRecord) -> Self {
        Self {
            inner: Arc::new(StorageInner {
                state: Mutex::new(initial),
                record,
            }),
        }
    }

    /// Value stored under `key`, if any.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().await.data.get(key).cloned()
    }

    /// Store `value` under `key` and persist.
    ///
    /// Does nothing, and skips the persist call, when the stored value is
    /// already equal.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`] if the owning record fails to persist. The
    /// in-memory value stays updated.
    pub async fn set(&self, key: &str, value: Value) -> Result<(), PersistError> {
        let mut state = self.inner.state.lock().await;
        if state.data.get(key) == Some(&value) {
            return Ok(());
        }
        state.data.insert(key.to_owned(), value);
        debug!(key, "credential blob updated");
        self.inner.record.persist(&state).await
    }

    /// Delete every key in `keys` and persist once.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`] if the owning record fails to persist.
    pub async fn remove(&self, keys: &[&str]) -> Result<(), PersistError> {
        let mut state = self.inner.state.lock().await;
        for key in keys {
            state.data.remove(*key);
        }
        debug!(count = keys.len(), "credential blob keys removed");
        self.inner.record.persist(&state).await
    }

    /// Reset the blob to empty and persist.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`] if the owning record fails to persist.
    pub async fn clear(&self) -> Result<(), PersistError> {
        let mut state = self.inner.state.lock().await;
        state.data = CredentialBlob::new();
        debug!("credential blob cleared");
        self.inner.record.persist(&state).await
    }

    /// Account id currently recorded.
    pub async fn account_id(&self) -> Option<i64> {
        self.inner.state.lock().await.account_id
    }

    /// Copy of the full persisted layout.
    pub async fn snapshot(&self) -> PuppetRecord {
        self.inner.state.lock().await.clone()
    }

    /// Record the signed-in account and persist once.
    ///
    /// Absent profile fields are removed from the blob.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`] if the owning record fails to persist.
    pub async fn record_profile(&self, profile: &AccountProfile) -> Result<(), PersistError> {
        let mut state = self.inner.state.lock().await;
        state.account_id = Some(profile.account_id);
        for (key, value) in [
            (KEY_USERNAME, &profile.username),
            (KEY_FIRST_NAME, &profile.first_name),
            (KEY_LAST_NAME, &profile.last_name),
            (KEY_PHONE_NUMBER, &profile.phone_number),
        ] {
            match value {
                Some(v) => {
                    state.data.insert(key.to_owned(), Value::String(v.clone()));
                }
                None => {
                    state.data.remove(key);
                }
            }
        }
        self.inner.record.persist(&state).await
    }
}
