//! Request router integration tests
//!
//! These tests run the full dispatch → worker → relay chain over the
//! in-memory bus with a real gateway registry, without any network or
//! server startup.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::sync::mpsc::Receiver;

use roomcast_gateway::auth::Subject;
use roomcast_gateway::bus::{MemoryBus, MessageBus};
use roomcast_gateway::config::{DeliveryPolicy, GatewayConfig};
use roomcast_gateway::gateway::{Gateway, Outbound};
use roomcast_gateway::protocol::{
    ClientRequest, DeliveryTarget, RoutedRequest, RoutedResponse, ServerEnvelope,
};
use roomcast_gateway::router::{
    BusRequester, Channels, RequestDispatcher, RequestError, RequestWorker, ResponseRelay,
};

/// Create the shared bus, gateway, and dispatcher used by every test
fn create_router_environment() -> TestEnvironment {
    let bus = Arc::new(MemoryBus::new());
    let channels = Channels::new("roomcast-test");
    let gateway_config = GatewayConfig {
        sweep_interval_secs: 30,
        send_buffer: 16,
        delivery_policy: DeliveryPolicy::FirstMatch,
    };
    let (shutdown, _) = broadcast::channel(1);
    let gateway = Arc::new(Gateway::new(&gateway_config, shutdown.clone()));
    let dispatcher = RequestDispatcher::new(bus.clone(), channels.clone());

    TestEnvironment {
        bus,
        channels,
        gateway,
        dispatcher,
        shutdown,
    }
}

struct TestEnvironment {
    bus: Arc<MemoryBus>,
    channels: Channels,
    gateway: Arc<Gateway>,
    dispatcher: RequestDispatcher,
    shutdown: broadcast::Sender<()>,
}

impl TestEnvironment {
    /// Spawn the relay that writes worker responses back to connections
    fn spawn_relay(&self) {
        let relay = ResponseRelay::new(
            self.bus.clone(),
            self.channels.clone(),
            self.gateway.clone(),
            16,
            self.shutdown.clone(),
        );
        tokio::spawn(relay.run());
    }

    /// Spawn a chat worker that rejects room 666666
    fn spawn_chat_worker(&self) {
        let worker = RequestWorker::new(self.bus.clone(), self.channels.clone(), self.shutdown.clone())
            .register_fn("send-chat-message", |request: RoutedRequest| async move {
                let chatroom_id = request.args["chatroomId"].as_u64().unwrap_or_default();
                if chatroom_id == 666666 {
                    Err("That chatroom does not exist.".to_string())
                } else {
                    Ok(json!({"delivered": true}))
                }
            });
        tokio::spawn(worker.run());
    }

    async fn wait_for_subscribers(&self, expected: usize) {
        for _ in 0..100 {
            if self.bus.subscriber_count() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("bus never reached {} subscribers", expected);
    }
}

fn subject(id: &str) -> Subject {
    Subject {
        id: id.to_string(),
        name: id.to_string(),
        roles: vec![],
    }
}

async fn recv_envelope(rx: &mut Receiver<Outbound>) -> ServerEnvelope {
    loop {
        let out = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("expected an envelope")
            .expect("channel open");
        if let Outbound::Envelope(envelope) = out {
            return envelope;
        }
    }
}

async fn assert_silent(rx: &mut Receiver<Outbound>) {
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(rx.try_recv().is_err(), "connection received an unexpected frame");
}

// =============================================================================
// Dispatch → Worker → Relay Round Trips
// =============================================================================

mod round_trip_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_chatroom_error_reaches_only_the_sender() {
        let env = create_router_environment();
        env.spawn_chat_worker();
        env.spawn_relay();
        env.wait_for_subscribers(2).await;

        let (sender, mut sender_rx) = env.gateway.admit(subject("alice")).await;
        let (_bystander, mut bystander_rx) = env.gateway.admit(subject("bob")).await;

        let request = ClientRequest::parse(
            &json!({
                "kind": "send-chat-message",
                "args": {"chatroomId": 666666, "message": "Hello"}
            })
            .to_string(),
        )
        .unwrap();
        env.dispatcher.dispatch(&request, &sender).await.unwrap();

        let envelope = recv_envelope(&mut sender_rx).await;
        assert_eq!(envelope.kind, "send-chat-message");
        assert_eq!(envelope.error.as_deref(), Some("That chatroom does not exist."));
        assert!(envelope.data.is_none());

        assert_silent(&mut bystander_rx).await;
    }

    #[tokio::test]
    async fn test_successful_chat_message_returns_data() {
        let env = create_router_environment();
        env.spawn_chat_worker();
        env.spawn_relay();
        env.wait_for_subscribers(2).await;

        let (sender, mut sender_rx) = env.gateway.admit(subject("alice")).await;
        let request = ClientRequest::parse(
            &json!({
                "kind": "send-chat-message",
                "args": {"chatroomId": 7, "message": "Hello"}
            })
            .to_string(),
        )
        .unwrap();
        env.dispatcher.dispatch(&request, &sender).await.unwrap();

        let envelope = recv_envelope(&mut sender_rx).await;
        assert_eq!(envelope.kind, "send-chat-message");
        assert!(envelope.error.is_none());
        assert_eq!(envelope.data.unwrap()["delivered"], true);
    }

    #[tokio::test]
    async fn test_user_targeted_response_reaches_identity() {
        let env = create_router_environment();
        env.spawn_relay();
        env.wait_for_subscribers(1).await;

        let (_conn, mut rx) = env.gateway.admit(subject("alice")).await;

        // A backend push addressed to the identity instead of a connection
        let response = RoutedResponse {
            request_id: uuid::Uuid::new_v4(),
            to: DeliveryTarget::User("alice".to_string()),
            kind: "get-user".to_string(),
            data: Some(json!({"userId": "alice"})),
            error: None,
        };
        env.bus
            .publish(
                &env.channels.success(),
                &serde_json::to_string(&response).unwrap(),
            )
            .await
            .unwrap();

        let envelope = recv_envelope(&mut rx).await;
        assert_eq!(envelope.kind, "get-user");
    }
}

// =============================================================================
// Duplicate Response Handling
// =============================================================================

mod dedup_tests {
    use super::*;

    #[tokio::test]
    async fn test_two_workers_one_delivery() {
        let env = create_router_environment();

        // Two identical workers race on the same kind channel
        for _ in 0..2 {
            let worker = RequestWorker::new(
                env.bus.clone(),
                env.channels.clone(),
                env.shutdown.clone(),
            )
            .register_fn("get-room", |request: RoutedRequest| async move {
                Ok(json!({"roomId": request.args["roomId"]}))
            });
            tokio::spawn(worker.run());
        }
        env.spawn_relay();
        env.wait_for_subscribers(3).await;

        let (sender, mut sender_rx) = env.gateway.admit(subject("alice")).await;
        let request =
            ClientRequest::parse(&json!({"kind": "get-room", "args": {"roomId": 4}}).to_string())
                .unwrap();
        env.dispatcher.dispatch(&request, &sender).await.unwrap();

        let envelope = recv_envelope(&mut sender_rx).await;
        assert_eq!(envelope.kind, "get-room");
        assert_eq!(envelope.data.unwrap()["roomId"], 4);

        // The second worker's response was deduplicated away
        assert_silent(&mut sender_rx).await;
    }
}

// =============================================================================
// Synchronous-Style Helper
// =============================================================================

mod requester_tests {
    use super::*;

    #[tokio::test]
    async fn test_helper_resolves_against_real_worker() {
        let env = create_router_environment();
        env.spawn_chat_worker();
        env.wait_for_subscribers(1).await;

        let requester = BusRequester::new(
            env.bus.clone(),
            env.channels.clone(),
            Duration::from_secs(2),
        );
        let response = requester
            .request(
                "ops",
                "send-chat-message",
                json!({"chatroomId": 666666, "message": "Hello"}),
            )
            .await
            .unwrap();

        assert!(response.is_error());
        assert_eq!(response.error.as_deref(), Some("That chatroom does not exist."));
    }

    #[tokio::test]
    async fn test_helper_timeout_restores_subscriber_baseline() {
        let env = create_router_environment();
        env.spawn_chat_worker();
        env.wait_for_subscribers(1).await;

        let requester = BusRequester::new(
            env.bus.clone(),
            env.channels.clone(),
            Duration::from_millis(100),
        );
        // Nobody serves this kind, so the call must time out
        let result = requester.request("ops", "get-room", json!({"roomId": 1})).await;
        assert!(matches!(result, Err(RequestError::TimedOut(_))));

        // The helper's temporary subscription is gone again
        env.wait_for_subscribers(1).await;
    }
}
