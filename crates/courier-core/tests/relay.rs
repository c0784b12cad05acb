//! End-to-end relay behavior over in-memory transports.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use courier_core::auth::DEFAULT_TOKEN_TTL;
use courier_core::{
    Gateway, GatewayConfig, HmacTokenValidator, Hub, HubConfig, HubHandle, Identity, SessionTasks,
};
use courier_protocol::{codec, Frame, WireFormat, WireMessage};
use async_trait::async_trait;
use courier_transport::memory::{self, MemoryPeer, PeerEvent};
use courier_transport::{FrameWriter, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const SECRET: &str = "relay-test-secret";

struct Relay {
    hub: HubHandle,
    gateway: Gateway,
    issuer: HmacTokenValidator,
}

impl Relay {
    fn start() -> Self {
        Self::with_config(GatewayConfig::default())
    }

    fn with_config(config: GatewayConfig) -> Self {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let issuer = HmacTokenValidator::new(SECRET);
        let gateway = Gateway::new(hub.clone(), Arc::new(issuer.clone()), config);
        Self {
            hub,
            gateway,
            issuer,
        }
    }

    async fn connect(&self, name: &str, format: WireFormat) -> (MemoryPeer, SessionTasks) {
        let (reader, writer, peer) = memory::pair();
        let token = self
            .issuer
            .issue(&Identity::from(name), DEFAULT_TOKEN_TTL)
            .unwrap();
        let admission = self.gateway.admit(Some(&token)).unwrap();
        let tasks = self
            .gateway
            .attach(admission, reader, writer, format)
            .await
            .unwrap();
        (peer, tasks)
    }

    /// Connect a client that never reads: every write blocks forever.
    async fn connect_stalled(&self, name: &str) -> (MemoryPeer, SessionTasks) {
        let (reader, _writer, peer) = memory::pair();
        let token = self
            .issuer
            .issue(&Identity::from(name), DEFAULT_TOKEN_TTL)
            .unwrap();
        let admission = self.gateway.admit(Some(&token)).unwrap();
        let tasks = self
            .gateway
            .attach(admission, reader, StalledWriter, WireFormat::Json)
            .await
            .unwrap();
        (peer, tasks)
    }
}

struct StalledWriter;

#[async_trait]
impl FrameWriter for StalledWriter {
    async fn send(&mut self, _message: WireMessage) -> Result<(), TransportError> {
        std::future::pending().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        std::future::pending().await
    }
}

async fn next_frame(peer: &mut MemoryPeer) -> Frame {
    match timeout(Duration::from_secs(1), peer.recv()).await {
        Ok(Some(PeerEvent::Message(message))) => match message {
            WireMessage::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                Frame::new(
                    value["recipient"].as_str().unwrap(),
                    value["sender"].as_str().unwrap(),
                    STANDARD.decode(value["content"].as_str().unwrap()).unwrap(),
                )
            }
            binary => codec::decode(&binary).unwrap(),
        },
        other => panic!("expected a message, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sender_is_stamped_with_authenticated_identity() {
    let relay = Relay::start();
    let (alice, _alice_tasks) = relay.connect("alice", WireFormat::Json).await;
    let (mut bob, _bob_tasks) = relay.connect("bob", WireFormat::Json).await;

    alice
        .send_text(r#"{"recipient":"bob","sender":"mallory","content":"hi"}"#)
        .unwrap();

    let frame = next_frame(&mut bob).await;
    assert_eq!(frame, Frame::new("bob", "alice", b"hi".to_vec()));

    // exactly one
    tokio::task::yield_now().await;
    assert!(bob.try_recv().is_none());
}

#[tokio::test]
async fn test_binary_payload_is_relayed_byte_for_byte() {
    let relay = Relay::start();
    let (alice, _alice_tasks) = relay.connect("alice", WireFormat::MessagePack).await;
    let (mut bob, _bob_tasks) = relay.connect("bob", WireFormat::MessagePack).await;

    let payload: Vec<u8> = (0..=255).collect();
    let message = codec::encode(&Frame::to("bob", payload.clone()), WireFormat::MessagePack).unwrap();
    alice.send(message).unwrap();

    let frame = next_frame(&mut bob).await;
    assert_eq!(frame.sender, "alice");
    assert_eq!(frame.content, payload);
}

#[tokio::test]
async fn test_offline_recipient_is_silently_dropped() {
    let relay = Relay::start();
    let (mut alice, _tasks) = relay.connect("alice", WireFormat::Json).await;

    alice
        .send_text(r#"{"recipient":"bob","content":"anyone there?"}"#)
        .unwrap();
    // A message to self sequences after the offline one.
    alice
        .send_text(r#"{"recipient":"alice","content":"echo"}"#)
        .unwrap();

    let frame = next_frame(&mut alice).await;
    assert_eq!(frame.content, b"echo");

    let stats = relay.hub.snapshot().await.unwrap();
    assert_eq!(stats.sessions, 1);
    assert_eq!(stats.dropped_offline, 1);
    assert_eq!(stats.forwarded, 1);
}

#[tokio::test]
async fn test_malformed_frame_is_dropped_and_session_survives() {
    let relay = Relay::start();
    let (alice, _alice_tasks) = relay.connect("alice", WireFormat::Json).await;
    let (mut bob, _bob_tasks) = relay.connect("bob", WireFormat::Json).await;

    alice.send_text("{not json").unwrap();
    alice.send_text(r#"{"recipient":"","content":"x"}"#).unwrap();
    alice
        .send(WireMessage::Binary(bytes::Bytes::from_static(&[0, 0])))
        .unwrap();
    alice
        .send_text(r#"{"recipient":"bob","content":"still here"}"#)
        .unwrap();

    let frame = next_frame(&mut bob).await;
    assert_eq!(frame.content, b"still here");

    let stats = relay.hub.snapshot().await.unwrap();
    assert_eq!(stats.sessions, 2);
    assert_eq!(stats.forwarded, 1);
}

#[tokio::test]
async fn test_hang_up_unregisters_and_closes() {
    let relay = Relay::start();
    let (mut alice, alice_tasks) = relay.connect("alice", WireFormat::Json).await;
    let (_bob, _bob_tasks) = relay.connect("bob", WireFormat::Json).await;

    alice.hang_up();
    timeout(Duration::from_secs(1), alice_tasks.join())
        .await
        .unwrap();

    assert_eq!(alice.recv().await, Some(PeerEvent::Close));

    let stats = relay.hub.snapshot().await.unwrap();
    assert_eq!(stats.sessions, 1);
    assert_eq!(stats.unregistered, 1);
}

#[tokio::test]
async fn test_reconnect_replaces_previous_session() {
    let relay = Relay::start();
    let (mut first, first_tasks) = relay.connect("alice", WireFormat::Json).await;
    let (mut second, _second_tasks) = relay.connect("alice", WireFormat::Json).await;
    let (bob, _bob_tasks) = relay.connect("bob", WireFormat::Json).await;

    timeout(Duration::from_secs(1), first_tasks.join())
        .await
        .unwrap();
    assert_eq!(first.recv().await, Some(PeerEvent::Close));

    bob.send_text(r#"{"recipient":"alice","content":"new you"}"#)
        .unwrap();
    let frame = next_frame(&mut second).await;
    assert_eq!(frame.content, b"new you");

    // The displaced session's late unregister must not remove the new one.
    let stats = relay.hub.snapshot().await.unwrap();
    assert_eq!(stats.sessions, 2);
    assert_eq!(stats.replaced, 1);
}

#[tokio::test]
async fn test_rejected_credential_leaves_no_session() {
    let relay = Relay::start();
    let forged = HmacTokenValidator::new("not-the-secret")
        .issue(&Identity::from("alice"), DEFAULT_TOKEN_TTL)
        .unwrap();

    assert!(relay.gateway.admit(Some(&forged)).is_err());
    assert!(relay.gateway.admit(None).is_err());

    let stats = relay.hub.snapshot().await.unwrap();
    assert_eq!(stats.sessions, 0);
    assert_eq!(stats.registered, 0);
}

#[tokio::test]
async fn test_stalled_recipient_is_evicted_and_released() {
    let relay = Relay::with_config(GatewayConfig {
        session_queue_capacity: 2,
    });
    let (mut alice, _alice_tasks) = relay.connect("alice", WireFormat::Json).await;
    let (_bob, bob_tasks) = relay.connect_stalled("bob").await;

    for _ in 0..5 {
        alice
            .send_text(r#"{"recipient":"bob","content":"are you there?"}"#)
            .unwrap();
    }
    alice
        .send_text(r#"{"recipient":"alice","content":"echo"}"#)
        .unwrap();
    assert_eq!(next_frame(&mut alice).await.content, b"echo");

    let stats = relay.hub.snapshot().await.unwrap();
    assert_eq!(stats.evicted, 1);
    assert_eq!(stats.sessions, 1);

    // Both pumps exit even though the transport never accepts the close frame
    timeout(Duration::from_secs(5), bob_tasks.join())
        .await
        .unwrap();

    alice
        .send_text(r#"{"recipient":"alice","content":"still here"}"#)
        .unwrap();
    assert_eq!(next_frame(&mut alice).await.content, b"still here");
}
