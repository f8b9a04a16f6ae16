//! Background refresh: one startup synchronization pass, then a periodic
//! protocol-state poll that runs alongside the push stream.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::bridge::Bridge;
use super::connection::Transport;

/// Period between protocol-state polls.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Shortest accepted poll period; shorter ones are raised to this.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(1);

/// Method polled for protocol state.
const GET_STATE: &str = "updates.getState";

/// Run the startup sequence: fetch state, sync contacts, sync dialogs.
///
/// Each step's failure is logged and does not stop the next step.
pub async fn run_startup_sync(transport: &dyn Transport, bridge: &dyn Bridge) {
    info!("fetching initial state");
    match transport.invoke(GET_STATE, json!({})).await {
        Ok(state) => info!(%state, "initial state"),
        Err(e) => error!(error = %e, "error getting initial state"),
    }

    info!("updating contact list");
    match bridge.sync_contacts().await {
        Ok(true) => info!("contacts updated"),
        Ok(false) => info!("contacts were up-to-date"),
        Err(e) => error!(error = %e, "failed to update contacts"),
    }

    info!("syncing dialogs");
    if let Err(e) = bridge.sync_dialogs().await {
        error!(error = %e, "failed to sync dialogs");
    }
}

/// Run the startup sequence, then poll protocol state every `period` until
/// shutdown is signalled.
///
/// Tick failures are logged; the timer keeps running. A `period` below
/// [`MIN_REFRESH_INTERVAL`] is raised to it.
pub async fn run_refresh_loop(
    transport: Arc<dyn Transport>,
    bridge: Arc<dyn Bridge>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    run_startup_sync(transport.as_ref(), bridge.as_ref()).await;

    if period < MIN_REFRESH_INTERVAL {
        warn!(?period, "refresh period too short, using minimum");
    }
    let period = period.max(MIN_REFRESH_INTERVAL);
    let mut interval = tokio::time::interval(period);
    // Skip the first immediate tick.
    interval.tick().await;
    info!(period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX), "refresh loop started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                // TODO: feed the polled state into gap recovery once the bridge exposes difference fetching.
                match transport.invoke(GET_STATE, json!({})).await {
                    Ok(_) => debug!("protocol state refreshed"),
                    Err(e) => error!(error = %e, "error updating state"),
                }
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    info!("refresh loop shutting down");
                    break;
                }
            }
        }
    }
}
