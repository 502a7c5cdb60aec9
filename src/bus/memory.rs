use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::{BusError, BusMessage, BusSubscription, MessageBus};

/// In-process bus. Publish walks the subscriber table and pushes into
/// each matching subscriber's channel; a dropped subscription removes
/// itself from the table.
pub struct MemoryBus {
    subscribers: Arc<DashMap<u64, MemorySubscriber>>,
    next_id: AtomicU64,
}

struct MemorySubscriber {
    channels: HashSet<String>,
    patterns: Vec<String>,
    sender: mpsc::UnboundedSender<BusMessage>,
}

impl MemorySubscriber {
    fn matches(&self, channel: &str) -> bool {
        self.channels.contains(channel)
            || self.patterns.iter().any(|p| glob_match(p, channel))
    }
}

/// Removes the subscriber entry when the subscription is dropped.
struct MemoryGuard {
    subscribers: Arc<DashMap<u64, MemorySubscriber>>,
    id: u64,
}

impl Drop for MemoryGuard {
    fn drop(&mut self) {
        self.subscribers.remove(&self.id);
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of live subscriptions. Lets tests assert that temporary
    /// subscriptions really get torn down.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        for entry in self.subscribers.iter() {
            if entry.matches(channel) {
                // A closed receiver just means the guard has not run yet
                let _ = entry.sender.send(BusMessage {
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        channels: &[String],
        patterns: &[String],
    ) -> Result<BusSubscription, BusError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.insert(
            id,
            MemorySubscriber {
                channels: channels.iter().cloned().collect(),
                patterns: patterns.to_vec(),
                sender,
            },
        );
        let guard = MemoryGuard {
            subscribers: self.subscribers.clone(),
            id,
        };
        Ok(BusSubscription::new(receiver, Box::new(guard)))
    }
}

/// Redis-style glob match: `*` spans any run, `?` one character.
fn glob_match(pattern: &str, input: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = input.chars().collect();
    let (mut pi, mut si) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while si < s.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == s[si]) {
            pi += 1;
            si += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, si));
            pi += 1;
        } else if let Some((star_pi, star_si)) = star {
            // Backtrack: let the last `*` absorb one more character
            pi = star_pi + 1;
            si = star_si + 1;
            star = Some((star_pi, star_si + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("roomcast:topic:*", "roomcast:topic:Room/1/Updated"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(!glob_match("roomcast:topic:*", "roomcast:request:get-room"));
        assert!(glob_match("*:success-response", "roomcast:success-response"));
    }

    #[tokio::test]
    async fn test_publish_reaches_exact_and_pattern_subscribers() {
        let bus = MemoryBus::new();
        let mut exact = bus
            .subscribe(&["alpha".to_string()], &[])
            .await
            .unwrap();
        let mut pattern = bus.subscribe(&[], &["al*".to_string()]).await.unwrap();
        let mut other = bus.subscribe(&["beta".to_string()], &[]).await.unwrap();

        bus.publish("alpha", "one").await.unwrap();

        let msg = exact.next().await.unwrap();
        assert_eq!(msg.channel, "alpha");
        assert_eq!(msg.payload, "one");
        assert_eq!(pattern.next().await.unwrap().payload, "one");

        // The beta subscriber saw nothing
        bus.publish("beta", "two").await.unwrap();
        assert_eq!(other.next().await.unwrap().payload, "two");
    }

    #[tokio::test]
    async fn test_drop_removes_subscriber() {
        let bus = MemoryBus::new();
        let sub = bus.subscribe(&["alpha".to_string()], &[]).await.unwrap();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
        // Publishing into the void is fine
        bus.publish("alpha", "nobody-home").await.unwrap();
    }
}
