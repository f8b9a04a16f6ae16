//! Listening phase entered by the completion step.

use std::time::Duration;

use serde_json::json;

use telepuppet::puppet::peer::Peer;
use telepuppet::puppet::updates::CanonicalEvent;

use crate::support::{authorization, fixture, fixture_with, settings, wait_until};

#[tokio::test]
async fn pushed_updates_reach_bridge_after_sign_in() {
    let fx = fixture();
    fx.transport.respond("auth.signIn", Ok(authorization(1)));
    fx.puppet
        .sign_in("+1555", "hash", "1")
        .await
        .expect("should sign in");

    fx.transport
        .push(json!({ "_": "updateShortMessage", "user_id": 42, "message": "hi" }))
        .await;
    fx.transport
        .push(json!({ "_": "updateShortChatMessage", "from_id": 43, "chat_id": 7, "message": "yo" }))
        .await;

    let bridge = fx.bridge.clone();
    assert!(wait_until(|| bridge.events().len() == 2).await);

    let targets: Vec<Peer> = fx
        .bridge
        .events()
        .into_iter()
        .filter_map(|event| match event {
            CanonicalEvent::Message { target, .. } => Some(target),
            _ => None,
        })
        .collect();
    assert_eq!(targets, vec![Peer::User(42), Peer::Chat(7)]);
}

#[tokio::test]
async fn nothing_is_listened_to_before_sign_in() {
    let fx = fixture();

    fx.transport
        .push(json!({ "_": "updateShortMessage", "user_id": 42, "message": "hi" }))
        .await;
    tokio::task::yield_now().await;

    assert!(!fx.puppet.is_listening());
    assert!(fx.bridge.events().is_empty());
    assert_eq!(fx.connector.connect_count(), 0);
}

#[tokio::test]
async fn repeated_completion_does_not_attach_twice() {
    let fx = fixture();
    fx.transport
        .respond("auth.checkPassword", Ok(authorization(9)));
    fx.transport
        .respond("auth.checkPassword", Ok(authorization(9)));

    fx.puppet
        .check_password(&[1])
        .await
        .expect("should complete");
    fx.puppet
        .check_password(&[1])
        .await
        .expect("should complete again");

    fx.transport
        .push(json!({ "_": "updateUserTyping", "user_id": 2 }))
        .await;
    fx.transport
        .push(json!({ "_": "updateUserTyping", "user_id": 3 }))
        .await;

    let bridge = fx.bridge.clone();
    assert!(wait_until(|| bridge.events().len() >= 2).await);
    tokio::task::yield_now().await;
    assert_eq!(fx.bridge.events().len(), 2);

    let contact_syncs = fx.bridge.clone();
    assert!(
        wait_until(|| {
            contact_syncs
                .contact_syncs
                .load(std::sync::atomic::Ordering::SeqCst)
                == 1
        })
        .await
    );
}

#[tokio::test]
async fn shutdown_stops_background_tasks() {
    let fx = fixture();
    fx.transport.respond("auth.signIn", Ok(authorization(1)));
    fx.puppet
        .sign_in("+1555", "hash", "1")
        .await
        .expect("should sign in");

    let listener = fx.puppet.listener().expect("listener should be running");
    listener.shutdown();

    assert!(wait_until(|| listener.is_finished()).await);
}

#[tokio::test]
async fn zero_refresh_period_keeps_polling() {
    let mut zero = settings();
    zero.refresh_interval = Duration::ZERO;
    let fx = fixture_with(zero);
    fx.transport.respond("auth.signIn", Ok(authorization(1)));
    fx.puppet
        .sign_in("+1555", "hash", "1")
        .await
        .expect("should sign in");

    let transport = fx.transport.clone();
    assert!(wait_until(|| transport.calls_to("updates.getState") >= 3).await);

    let listener = fx.puppet.listener().expect("listener should be running");
    assert!(!listener.is_finished());
    listener.shutdown();
    assert!(wait_until(|| listener.is_finished()).await);
}
