//! Update envelope dispatch and normalization.

use std::sync::atomic::Ordering;

use serde_json::json;

use telepuppet::puppet::peer::Peer;
use telepuppet::puppet::updates::{CanonicalEvent, Dispatcher, Sender};

use crate::support::RecordingBridge;

fn named(account_id: i64) -> Sender {
    Sender {
        account_id,
        display_name: Some(format!("user {account_id}")),
    }
}

#[tokio::test]
async fn short_message_resolves_sender_and_targets_user() {
    let bridge = RecordingBridge::new();
    let dispatcher = Dispatcher::new(bridge.clone());

    dispatcher
        .handle_envelope(json!({ "_": "updateShortMessage", "user_id": 42, "message": "hi" }))
        .await;

    assert_eq!(
        bridge.events(),
        vec![CanonicalEvent::Message {
            sender: named(42),
            target: Peer::User(42),
            text: "hi".to_owned(),
        }]
    );
    assert_eq!(bridge.lookups(), vec![42]);
}

#[tokio::test]
async fn short_chat_message_targets_group() {
    let bridge = RecordingBridge::new();
    let dispatcher = Dispatcher::new(bridge.clone());

    dispatcher
        .handle_envelope(json!({
            "_": "updateShortChatMessage",
            "from_id": 5,
            "chat_id": 600,
            "message": "hello all"
        }))
        .await;

    assert_eq!(
        bridge.events(),
        vec![CanonicalEvent::Message {
            sender: named(5),
            target: Peer::Chat(600),
            text: "hello all".to_owned(),
        }]
    );
}

#[tokio::test]
async fn update_short_unwraps_single_inner_update() {
    let bridge = RecordingBridge::new();
    let dispatcher = Dispatcher::new(bridge.clone());

    dispatcher
        .handle_envelope(json!({
            "_": "updateShort",
            "update": {
                "_": "updateUserStatus",
                "user_id": 8,
                "status": { "_": "userStatusOnline", "expires": 1_500_000_000 }
            },
            "date": 1_500_000_000
        }))
        .await;

    assert_eq!(
        bridge.events(),
        vec![CanonicalEvent::Presence {
            account_id: 8,
            status: "Online".to_owned(),
        }]
    );
}

#[tokio::test]
async fn typing_indicators_target_user_or_group() {
    let bridge = RecordingBridge::new();
    let dispatcher = Dispatcher::new(bridge.clone());

    dispatcher
        .handle_envelope(json!({
            "_": "updates",
            "updates": [
                { "_": "updateUserTyping", "user_id": 3, "action": { "_": "sendMessageTypingAction" } },
                { "_": "updateChatUserTyping", "user_id": 4, "chat_id": 70, "action": {} }
            ]
        }))
        .await;

    assert_eq!(
        bridge.events(),
        vec![
            CanonicalEvent::Typing {
                account_id: 3,
                target: Peer::User(3),
            },
            CanonicalEvent::Typing {
                account_id: 4,
                target: Peer::Chat(70),
            },
        ]
    );
}

#[tokio::test]
async fn batch_survives_malformed_member_in_order() {
    let bridge = RecordingBridge::new();
    let dispatcher = Dispatcher::new(bridge.clone());

    dispatcher
        .handle_envelope(json!({
            "_": "updates",
            "updates": [
                { "_": "updateShortMessage", "user_id": 1, "message": "first" },
                { "_": "updateUserTyping" },
                { "_": "updateShortMessage", "user_id": 3, "message": "third" }
            ]
        }))
        .await;

    let texts: Vec<String> = bridge
        .events()
        .into_iter()
        .filter_map(|event| match event {
            CanonicalEvent::Message { text, .. } => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec!["first", "third"]);
}

#[tokio::test]
async fn batch_survives_unrecognized_and_null_members() {
    let bridge = RecordingBridge::new();
    let dispatcher = Dispatcher::new(bridge.clone());

    dispatcher
        .handle_envelope(json!({
            "_": "updates",
            "updates": [
                { "_": "updateUserStatus", "user_id": 1, "status": { "_": "userStatusOffline" } },
                { "_": "updateReadHistoryInbox", "peer": {}, "max_id": 10 },
                null,
                { "_": "updateUserStatus", "user_id": 2, "status": { "_": "userStatusRecently" } }
            ]
        }))
        .await;

    assert_eq!(
        bridge.events(),
        vec![
            CanonicalEvent::Presence {
                account_id: 1,
                status: "Offline".to_owned(),
            },
            CanonicalEvent::Presence {
                account_id: 2,
                status: "Recently".to_owned(),
            },
        ]
    );
}

#[tokio::test]
async fn new_message_uses_from_id_without_lookup() {
    let bridge = RecordingBridge::new();
    let dispatcher = Dispatcher::new(bridge.clone());

    dispatcher
        .handle_envelope(json!({
            "_": "updates",
            "updates": [
                {
                    "_": "updateNewMessage",
                    "message": {
                        "_": "message",
                        "from_id": 11,
                        "to_id": { "_": "peerChannel", "channel_id": 900 },
                        "message": "channel post"
                    }
                },
                {
                    "_": "updateNewMessage",
                    "message": {
                        "_": "message",
                        "from_id": 12,
                        "to_id": { "_": "peerUser", "user_id": 13 },
                        "message": "direct"
                    }
                }
            ]
        }))
        .await;

    assert_eq!(
        bridge.events(),
        vec![
            CanonicalEvent::Message {
                sender: Sender::from_id(11),
                target: Peer::Chat(900),
                text: "channel post".to_owned(),
            },
            CanonicalEvent::Message {
                sender: Sender::from_id(12),
                target: Peer::User(13),
                text: "direct".to_owned(),
            },
        ]
    );
    assert!(bridge.lookups().is_empty());
}

#[tokio::test]
async fn new_message_with_unknown_peer_is_dropped() {
    let bridge = RecordingBridge::new();
    let dispatcher = Dispatcher::new(bridge.clone());

    dispatcher
        .handle_envelope(json!({
            "_": "updateShort",
            "update": {
                "_": "updateNewMessage",
                "message": { "from_id": 1, "to_id": { "_": "peerHologram" }, "message": "?" }
            }
        }))
        .await;

    assert!(bridge.events().is_empty());
}

#[tokio::test]
async fn failed_sender_lookup_is_contained() {
    let bridge = RecordingBridge::new();
    bridge.fail_lookups.store(true, Ordering::SeqCst);
    let dispatcher = Dispatcher::new(bridge.clone());

    dispatcher
        .handle_envelope(json!({
            "_": "updates",
            "updates": [
                { "_": "updateShortMessage", "user_id": 1, "message": "lost" },
                { "_": "updateUserTyping", "user_id": 2 }
            ]
        }))
        .await;

    assert_eq!(
        bridge.events(),
        vec![CanonicalEvent::Typing {
            account_id: 2,
            target: Peer::User(2),
        }]
    );
}

#[tokio::test]
async fn unrecognized_envelope_produces_nothing() {
    let bridge = RecordingBridge::new();
    let dispatcher = Dispatcher::new(bridge.clone());

    dispatcher
        .handle_envelope(json!({ "_": "updatesTooLong" }))
        .await;
    dispatcher.handle_envelope(json!(null)).await;
    dispatcher.handle_envelope(json!({ "no_kind": true })).await;
    dispatcher
        .handle_envelope(json!({ "_": "updates", "updates": "not a list" }))
        .await;

    assert!(bridge.events().is_empty());
}

#[test]
fn canonical_events_serialize_for_the_bridge() {
    let event = CanonicalEvent::Typing {
        account_id: 4,
        target: Peer::Chat(70),
    };
    assert_eq!(
        serde_json::to_value(&event).expect("should serialize"),
        json!({ "type": "typing", "account_id": 4, "target": { "type": "chat", "id": 70 } })
    );
}
