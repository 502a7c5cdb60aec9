use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::protocol::Topic;

use super::socket::SocketError;

/// Consumer callback for one topic subscription. Failures are reported
/// back as messages so the multiplexer can log them without letting one
/// consumer break the others.
pub type UpdateCallback = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// The physical subscribe/unsubscribe operations, usually frames on a
/// gateway socket. Split out so the multiplexer can be tested without a
/// live connection.
#[async_trait]
pub trait SubscriptionTransport: Send + Sync {
    async fn subscribe(&self, topic: &Topic) -> Result<(), SocketError>;
    async fn unsubscribe(&self, topic: &Topic) -> Result<(), SocketError>;
}

struct Registration {
    owner_id: String,
    callback: UpdateCallback,
}

/// Many independent consumers of one physical socket.
///
/// Each topic is physically subscribed exactly once no matter how many
/// owners register for it; the physical unsubscribe goes out when the
/// last owner releases it. Incoming pushes invoke every callback for
/// the topic in registration order. Owners are expected to pair every
/// `subscribe` with an `unsubscribe` under a fresh owner id per mount;
/// an unpaired subscribe keeps the physical subscription alive.
pub struct SubscriptionMultiplexer {
    transport: Arc<dyn SubscriptionTransport>,
    topics: tokio::sync::Mutex<HashMap<String, Vec<Registration>>>,
}

impl SubscriptionMultiplexer {
    pub fn new(transport: Arc<dyn SubscriptionTransport>) -> Self {
        Self {
            transport,
            topics: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Register a callback under `(owner_id, topic)`. The first owner of
    /// a topic triggers the physical subscribe; if that fails the
    /// registration is rolled back.
    pub async fn subscribe(
        &self,
        owner_id: &str,
        topic: &Topic,
        callback: UpdateCallback,
    ) -> Result<(), SocketError> {
        let first = {
            let mut topics = self.topics.lock().await;
            let registrations = topics.entry(topic.as_str().to_string()).or_default();
            let first = registrations.is_empty();
            registrations.push(Registration {
                owner_id: owner_id.to_string(),
                callback,
            });
            first
        };

        if first {
            if let Err(e) = self.transport.subscribe(topic).await {
                let mut topics = self.topics.lock().await;
                if let Some(registrations) = topics.get_mut(topic.as_str()) {
                    registrations.retain(|r| r.owner_id != owner_id);
                    if registrations.is_empty() {
                        topics.remove(topic.as_str());
                    }
                }
                return Err(e);
            }
            tracing::debug!(topic = %topic, "Physically subscribed");
        }
        Ok(())
    }

    /// Drop `owner_id`'s registrations for the topic. Returns whether
    /// anything was removed. The last removal issues the physical
    /// unsubscribe; if that frame fails, the logical state is already
    /// cleared and later pushes simply find no callbacks.
    pub async fn unsubscribe(&self, owner_id: &str, topic: &Topic) -> Result<bool, SocketError> {
        let (removed, last) = {
            let mut topics = self.topics.lock().await;
            match topics.get_mut(topic.as_str()) {
                Some(registrations) => {
                    let before = registrations.len();
                    registrations.retain(|r| r.owner_id != owner_id);
                    let removed = registrations.len() < before;
                    let last = removed && registrations.is_empty();
                    if registrations.is_empty() {
                        topics.remove(topic.as_str());
                    }
                    (removed, last)
                }
                None => (false, false),
            }
        };

        if last {
            self.transport.unsubscribe(topic).await?;
            tracing::debug!(topic = %topic, "Physically unsubscribed");
        }
        Ok(removed)
    }

    /// Deliver a push to every callback registered for its topic, in
    /// registration order. A failing callback is logged and the rest
    /// still run. Returns how many callbacks were invoked.
    pub async fn dispatch(&self, topic: &str, data: &Value) -> usize {
        let callbacks: Vec<(String, UpdateCallback)> = {
            let topics = self.topics.lock().await;
            match topics.get(topic) {
                Some(registrations) => registrations
                    .iter()
                    .map(|r| (r.owner_id.clone(), r.callback.clone()))
                    .collect(),
                None => Vec::new(),
            }
        };

        let total = callbacks.len();
        for (owner_id, callback) in callbacks {
            if let Err(e) = callback(data) {
                tracing::warn!(
                    owner_id = %owner_id,
                    topic = %topic,
                    error = %e,
                    "Subscriber callback failed"
                );
            }
        }
        total
    }

    pub async fn topic_count(&self) -> usize {
        self.topics.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NS_ROOM;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        events: Mutex<Vec<String>>,
    }

    impl RecordingTransport {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SubscriptionTransport for RecordingTransport {
        async fn subscribe(&self, topic: &Topic) -> Result<(), SocketError> {
            self.events.lock().unwrap().push(format!("subscribe:{}", topic));
            Ok(())
        }

        async fn unsubscribe(&self, topic: &Topic) -> Result<(), SocketError> {
            self.events.lock().unwrap().push(format!("unsubscribe:{}", topic));
            Ok(())
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl SubscriptionTransport for FailingTransport {
        async fn subscribe(&self, _topic: &Topic) -> Result<(), SocketError> {
            Err(SocketError::Closed)
        }

        async fn unsubscribe(&self, _topic: &Topic) -> Result<(), SocketError> {
            Err(SocketError::Closed)
        }
    }

    fn topic() -> Topic {
        Topic::new(NS_ROOM, 1, "Updated").unwrap()
    }

    fn recording(seen: &Arc<Mutex<Vec<String>>>, label: &str) -> UpdateCallback {
        let seen = seen.clone();
        let label = label.to_string();
        Arc::new(move |_data: &Value| {
            seen.lock().unwrap().push(label.clone());
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_two_owners_share_one_physical_subscription() {
        let transport = Arc::new(RecordingTransport::default());
        let mux = SubscriptionMultiplexer::new(transport.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));

        mux.subscribe("owner-1", &topic(), recording(&seen, "one")).await.unwrap();
        mux.subscribe("owner-2", &topic(), recording(&seen, "two")).await.unwrap();
        assert_eq!(transport.events(), vec!["subscribe:Room/1/Updated"]);

        let invoked = mux.dispatch("Room/1/Updated", &json!({"players": 2})).await;
        assert_eq!(invoked, 2);
        assert_eq!(seen.lock().unwrap().clone(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_leaves_other_owner_firing() {
        let transport = Arc::new(RecordingTransport::default());
        let mux = SubscriptionMultiplexer::new(transport.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));

        mux.subscribe("owner-1", &topic(), recording(&seen, "one")).await.unwrap();
        mux.subscribe("owner-2", &topic(), recording(&seen, "two")).await.unwrap();

        assert!(mux.unsubscribe("owner-1", &topic()).await.unwrap());
        // Still one physical subscription, no unsubscribe yet
        assert_eq!(transport.events(), vec!["subscribe:Room/1/Updated"]);

        let invoked = mux.dispatch("Room/1/Updated", &json!({})).await;
        assert_eq!(invoked, 1);
        assert_eq!(seen.lock().unwrap().clone(), vec!["two"]);

        assert!(mux.unsubscribe("owner-2", &topic()).await.unwrap());
        assert_eq!(
            transport.events(),
            vec!["subscribe:Room/1/Updated", "unsubscribe:Room/1/Updated"]
        );
        assert_eq!(mux.topic_count().await, 0);
    }

    #[tokio::test]
    async fn test_callback_failure_does_not_stop_the_rest() {
        let transport = Arc::new(RecordingTransport::default());
        let mux = SubscriptionMultiplexer::new(transport);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let failing: UpdateCallback = Arc::new(|_data: &Value| Err("consumer exploded".into()));
        mux.subscribe("owner-1", &topic(), failing).await.unwrap();
        mux.subscribe("owner-2", &topic(), recording(&seen, "survivor")).await.unwrap();

        let invoked = mux.dispatch("Room/1/Updated", &json!({})).await;
        assert_eq!(invoked, 2);
        assert_eq!(seen.lock().unwrap().clone(), vec!["survivor"]);
    }

    #[tokio::test]
    async fn test_failed_physical_subscribe_rolls_back() {
        let mux = SubscriptionMultiplexer::new(Arc::new(FailingTransport));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let result = mux.subscribe("owner-1", &topic(), recording(&seen, "one")).await;
        assert!(matches!(result, Err(SocketError::Closed)));
        assert_eq!(mux.topic_count().await, 0);
        assert_eq!(mux.dispatch("Room/1/Updated", &json!({})).await, 0);
    }

    #[tokio::test]
    async fn test_unknown_owner_unsubscribe_is_a_noop() {
        let transport = Arc::new(RecordingTransport::default());
        let mux = SubscriptionMultiplexer::new(transport.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));

        mux.subscribe("owner-1", &topic(), recording(&seen, "one")).await.unwrap();
        assert!(!mux.unsubscribe("owner-9", &topic()).await.unwrap());
        assert_eq!(transport.events(), vec!["subscribe:Room/1/Updated"]);
        assert_eq!(mux.dispatch("Room/1/Updated", &json!({})).await, 1);
    }

    #[tokio::test]
    async fn test_dispatch_without_subscribers_is_empty() {
        let mux = SubscriptionMultiplexer::new(Arc::new(RecordingTransport::default()));
        assert_eq!(mux.dispatch("Room/1/Updated", &json!({})).await, 0);
    }
}
