//! Lazy, single-instance connection construction.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use telepuppet::credentials::SecretValue;
use telepuppet::puppet::connection::ConnectionManager;
use telepuppet::puppet::session::{ApiOverrides, ServerConfig, SessionConfig};
use telepuppet::puppet::storage::{PuppetRecord, PuppetStorage};

use crate::support::{fixture, CountingRecord, ScriptedConnector, ScriptedTransport};

fn manager(connector: Arc<ScriptedConnector>) -> ConnectionManager {
    let config = SessionConfig::new(
        1,
        SecretValue::new("hash"),
        ServerConfig::default(),
        &ApiOverrides::default(),
    );
    let storage = PuppetStorage::new(CountingRecord::new(), PuppetRecord::default());
    ConnectionManager::new(config, storage, connector)
}

#[tokio::test]
async fn nothing_connects_before_first_access() {
    let connector = ScriptedConnector::new(ScriptedTransport::new());
    let manager = manager(connector.clone());

    assert!(!manager.is_connected());
    assert_eq!(connector.connect_count(), 0);
}

#[tokio::test]
async fn repeated_access_returns_same_instance() {
    let connector = ScriptedConnector::new(ScriptedTransport::new());
    let manager = manager(connector.clone());

    let first = manager.connection().await.expect("should connect");
    let second = manager.connection().await.expect("should connect");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(connector.connect_count(), 1);
    assert!(manager.is_connected());
}

#[tokio::test]
async fn concurrent_first_access_builds_one_connection() {
    let connector =
        ScriptedConnector::with_delay(ScriptedTransport::new(), Duration::from_millis(50));
    let manager = Arc::new(manager(connector.clone()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connection().await })
        })
        .collect();

    let mut transports = Vec::new();
    for handle in handles {
        let transport = handle
            .await
            .expect("task should join")
            .expect("should connect");
        transports.push(transport);
    }

    assert_eq!(connector.connect_count(), 1);
    for transport in &transports[1..] {
        assert!(Arc::ptr_eq(&transports[0], transport));
    }
}

#[tokio::test]
async fn puppet_operations_share_the_connection() {
    let fx = fixture();
    for _ in 0..2 {
        fx.transport
            .respond("auth.checkPhone", Ok(json!({ "phone_registered": true })));
    }

    let (a, b) = tokio::join!(fx.puppet.check_phone("+1"), fx.puppet.check_phone("+2"));
    assert!(a.is_ok());
    assert!(b.is_ok());

    assert_eq!(fx.connector.connect_count(), 1);
    assert_eq!(fx.transport.calls_to("auth.checkPhone"), 2);
}
