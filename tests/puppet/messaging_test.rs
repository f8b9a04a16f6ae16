//! Outbound messaging through the puppet facade.

use serde_json::json;

use telepuppet::puppet::peer::Peer;

use crate::support::fixture;

#[tokio::test]
async fn send_message_addresses_input_peer() {
    let fx = fixture();

    fx.puppet
        .send_message(Peer::Chat(12), "hello")
        .await
        .expect("should send");

    let calls = fx.transport.calls();
    assert_eq!(calls[0].0, "messages.sendMessage");
    let params = &calls[0].1;
    assert_eq!(params["peer"], json!({ "_": "inputPeerChat", "chat_id": 12 }));
    assert_eq!(params["message"], json!("hello"));
    let random_id = params["random_id"].as_i64().expect("random_id should be an integer");
    assert!((0..1 << 30).contains(&random_id));
}

#[tokio::test]
async fn send_message_to_user_uses_user_peer() {
    let fx = fixture();

    fx.puppet
        .send_message(Peer::User(7), "hi")
        .await
        .expect("should send");

    let calls = fx.transport.calls();
    assert_eq!(
        calls[0].1["peer"],
        json!({ "_": "inputPeerUser", "user_id": 7 })
    );
}
