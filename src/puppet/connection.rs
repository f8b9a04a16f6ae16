//! Protocol transport seam and the per-puppet connection holder.
//!
//! The transport engine itself (encryption, framing, data-center routing)
//! lives outside this crate. It is reached through [`Transport`] for calls
//! and push updates, and built through a [`Connector`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, OnceCell};
use tracing::info;

use super::session::SessionConfig;
use super::storage::PuppetStorage;

/// Errors surfaced by the protocol engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The server rejected a call with a named error kind.
    #[error("rpc error {code}: {kind}")]
    Rpc {
        /// Numeric error class.
        code: i32,
        /// Error kind string, e.g. `PHONE_NUMBER_INVALID`.
        kind: String,
    },

    /// The connection could not be established or was lost.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The server answered with a shape the caller could not read.
    #[error("malformed response to {method}: {reason}")]
    Malformed {
        /// Method whose response was unreadable.
        method: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl TransportError {
    /// Build an RPC error with the given kind.
    pub fn rpc(code: i32, kind: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            kind: kind.into(),
        }
    }

    /// Error kind for RPC errors.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Rpc { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Whether this is an RPC error of exactly `kind`.
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind() == Some(kind)
    }
}

/// A live protocol connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Invoke a remote method with JSON parameters.
    async fn invoke(&self, method: &str, params: Value) -> Result<Value, TransportError>;

    /// Take the push-update stream.
    ///
    /// Every raw envelope the engine receives, from any internal source, is
    /// delivered on this one channel in arrival order. Returns `None` once
    /// the stream has already been taken.
    fn subscribe(&self) -> Option<mpsc::Receiver<Value>>;
}

/// Builds transports for puppets.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Construct a connection from the session configuration, backed by
    /// `storage` for auth keys and data-center state.
    async fn connect(
        &self,
        config: &SessionConfig,
        storage: PuppetStorage,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Lazily constructed, memoized connection for one puppet.
///
/// The first caller of [`ConnectionManager::connection`] builds the
/// transport; concurrent first callers wait on the same initialization and
/// all observe the one instance.
pub struct ConnectionManager {
    config: SessionConfig,
    storage: PuppetStorage,
    connector: Arc<dyn Connector>,
    cell: OnceCell<Arc<dyn Transport>>,
}

impl ConnectionManager {
    /// Create a holder; nothing is connected until first access.
    pub fn new(config: SessionConfig, storage: PuppetStorage, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            storage,
            connector,
            cell: OnceCell::new(),
        }
    }

    /// The live connection, constructing it on first access.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if construction fails. A later call
    /// retries construction.
    pub async fn connection(&self) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = self
            .cell
            .get_or_try_init(|| async {
                info!(
                    api_id = self.config.api.api_id,
                    layer = self.config.api.layer,
                    dev = self.config.server.dev,
                    "constructing protocol connection"
                );
                self.connector
                    .connect(&self.config, self.storage.clone())
                    .await
            })
            .await?;
        Ok(Arc::clone(transport))
    }

    /// Whether a connection has been constructed.
    pub fn is_connected(&self) -> bool {
        self.cell.initialized()
    }

    /// Configuration connections are built from.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}
