//! Puppet sessions: one remote account under bridge control.
//!
//! A [`Puppet`] owns the account's credential blob, its lazily built
//! protocol connection, and the authentication state machine. Once sign-in
//! completes it enters the listening phase: a task draining push updates
//! through the [`updates::Dispatcher`], and the [`refresh`] loop.

pub mod auth;
pub mod bridge;
pub mod connection;
pub mod peer;
pub mod refresh;
pub mod session;
pub mod storage;
pub mod updates;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

use crate::credentials::SecretValue;

use self::auth::AuthState;
use self::bridge::{Bridge, OwningRecord, PersistError};
use self::connection::{ConnectionManager, Connector, TransportError};
use self::peer::Peer;
use self::session::{ApiOverrides, ServerConfig, SessionConfig};
use self::storage::{CredentialBlob, PuppetRecord, PuppetStorage};
use self::updates::Dispatcher;

/// Errors from puppet operations.
#[derive(Debug, thiserror::Error)]
pub enum PuppetError {
    /// The protocol engine rejected or failed the call.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The owning record could not be persisted.
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Account-independent settings shared by every puppet of a bridge.
#[derive(Debug, Clone)]
pub struct PuppetSettings {
    /// Application id issued by the protocol operator.
    pub api_id: i32,
    /// Application secret paired with `api_id`.
    pub api_hash: SecretValue,
    /// Server endpoint descriptor.
    pub server: ServerConfig,
    /// Protocol-version overrides.
    pub api_overrides: ApiOverrides,
    /// Period of the background state poll.
    pub refresh_interval: Duration,
}

/// Inputs for constructing a [`Puppet`].
pub struct PuppetOptions {
    /// Remote account id, if already known.
    pub account_id: Option<i64>,
    /// Record the puppet's state is persisted through.
    pub record: Arc<dyn OwningRecord>,
    /// Loaded credential blob.
    pub data: CredentialBlob,
    /// Shared bridge settings.
    pub settings: PuppetSettings,
}

/// Background tasks of the listening phase.
///
/// Dropping the handle signals both tasks to stop.
pub struct ListenerHandle {
    shutdown_tx: watch::Sender<bool>,
    updates_task: Option<JoinHandle<()>>,
    refresh_task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Signal the update listener and the refresh loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Whether both tasks have exited.
    pub fn is_finished(&self) -> bool {
        self.refresh_task.is_finished()
            && self
                .updates_task
                .as_ref()
                .map_or(true, JoinHandle::is_finished)
    }
}

/// One remote account under bridge control.
pub struct Puppet {
    storage: PuppetStorage,
    connection: ConnectionManager,
    bridge: Arc<dyn Bridge>,
    refresh_interval: Duration,
    state: Mutex<AuthState>,
    listener: OnceCell<ListenerHandle>,
}

impl Puppet {
    /// Create a puppet. No connection is made until first use.
    pub fn new(bridge: Arc<dyn Bridge>, connector: Arc<dyn Connector>, options: PuppetOptions) -> Self {
        let PuppetOptions {
            account_id,
            record,
            data,
            settings,
        } = options;
        let storage = PuppetStorage::new(record, PuppetRecord { account_id, data });
        let config = SessionConfig::new(
            settings.api_id,
            settings.api_hash,
            settings.server,
            &settings.api_overrides,
        );
        Self {
            connection: ConnectionManager::new(config, storage.clone(), connector),
            storage,
            bridge,
            refresh_interval: settings.refresh_interval,
            state: Mutex::new(AuthState::Unauthenticated),
            listener: OnceCell::new(),
        }
    }

    /// Rebuild a puppet from its persisted record, splitting the account id
    /// back out of the blob.
    pub fn from_record(
        bridge: Arc<dyn Bridge>,
        connector: Arc<dyn Connector>,
        owner: Arc<dyn OwningRecord>,
        record: PuppetRecord,
        settings: PuppetSettings,
    ) -> Self {
        Self::new(
            bridge,
            connector,
            PuppetOptions {
                account_id: record.account_id,
                record: owner,
                data: record.data,
                settings,
            },
        )
    }

    /// Persisted layout: account id merged with the credential blob.
    pub async fn to_record(&self) -> PuppetRecord {
        self.storage.snapshot().await
    }

    /// Remote account id, once authenticated.
    pub async fn account_id(&self) -> Option<i64> {
        self.storage.account_id().await
    }

    /// Human-readable account name; see [`PuppetRecord::display_name`].
    pub async fn display_name(&self) -> Option<String> {
        self.storage.snapshot().await.display_name()
    }

    /// Current authentication state.
    pub async fn auth_state(&self) -> AuthState {
        *self.state.lock().await
    }

    /// Credential store backing the connection.
    pub fn storage(&self) -> &PuppetStorage {
        &self.storage
    }

    /// Lazily constructed connection holder.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Whether the listening phase has started.
    pub fn is_listening(&self) -> bool {
        self.listener.initialized()
    }

    /// Listening-phase tasks, once started.
    pub fn listener(&self) -> Option<&ListenerHandle> {
        self.listener.get()
    }

    /// Send a text message to `peer`.
    ///
    /// # Errors
    ///
    /// Returns [`PuppetError::Transport`] if the call fails.
    pub async fn send_message(&self, peer: Peer, message: &str) -> Result<Value, PuppetError> {
        let transport = self.connection.connection().await?;
        let random_id: i64 = rand::thread_rng().gen_range(0..1_i64 << 30);
        let result = transport
            .invoke(
                "messages.sendMessage",
                json!({
                    "peer": peer.to_input_peer(),
                    "message": message,
                    "random_id": random_id,
                }),
            )
            .await?;
        Ok(result)
    }

    async fn set_state(&self, next: AuthState) {
        let mut state = self.state.lock().await;
        if *state != next {
            info!(from = ?*state, to = ?next, "auth state changed");
            *state = next;
        }
    }

    /// Enter the listening phase: attach the update listener and start the
    /// refresh loop. Runs at most once per puppet.
    async fn begin_listening(&self) -> Result<(), PuppetError> {
        let account_id = self.storage.account_id().await;
        self.listener
            .get_or_try_init(|| async {
                let transport = self.connection.connection().await?;
                let span = info_span!("puppet", account_id = ?account_id);
                let (shutdown_tx, shutdown_rx) = watch::channel(false);

                let updates_task = match transport.subscribe() {
                    Some(updates) => Some(tokio::spawn(
                        updates::run_update_listener(
                            updates,
                            Dispatcher::new(Arc::clone(&self.bridge)),
                            shutdown_rx.clone(),
                        )
                        .instrument(span.clone()),
                    )),
                    None => {
                        warn!(account_id = ?account_id, "update stream already taken, not attaching listener");
                        None
                    }
                };

                let refresh_task = tokio::spawn(
                    refresh::run_refresh_loop(
                        transport,
                        Arc::clone(&self.bridge),
                        self.refresh_interval,
                        shutdown_rx,
                    )
                    .instrument(span),
                );

                info!(account_id = ?account_id, "listening for updates");
                Ok::<_, PuppetError>(ListenerHandle {
                    shutdown_tx,
                    updates_task,
                    refresh_task,
                })
            })
            .await?;
        Ok(())
    }
}
