use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Which connections are subscribed to which topics.
///
/// Kept separate from the connection registry so that registry stays a
/// pure identity/liveness map. Entries for a topic are dropped as soon
/// as its last subscriber leaves.
#[derive(Default)]
pub struct TopicIndex {
    /// topic -> Set<connection_id>
    topics: DashMap<String, HashSet<Uuid>>,
}

impl TopicIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the connection was not already subscribed.
    pub fn subscribe(&self, topic: &str, connection_id: Uuid) -> bool {
        let added = self
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(connection_id);
        if added {
            tracing::debug!(connection_id = %connection_id, topic = %topic, "Subscribed to topic");
        }
        added
    }

    pub fn unsubscribe(&self, topic: &str, connection_id: Uuid) -> bool {
        let Some(mut subscribers) = self.topics.get_mut(topic) else {
            return false;
        };
        let removed = subscribers.remove(&connection_id);
        if subscribers.is_empty() {
            drop(subscribers);
            self.topics.remove(topic);
        }
        if removed {
            tracing::debug!(connection_id = %connection_id, topic = %topic, "Unsubscribed from topic");
        }
        removed
    }

    /// Drop a departing connection from every topic it was subscribed to.
    pub fn purge(&self, connection_id: Uuid) {
        for mut entry in self.topics.iter_mut() {
            entry.value_mut().remove(&connection_id);
        }
        self.topics.retain(|_, subscribers| !subscribers.is_empty());
    }

    pub fn members(&self, topic: &str) -> Vec<Uuid> {
        self.topics
            .get(topic)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn counts(&self) -> HashMap<String, usize> {
        self.topics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_is_idempotent() {
        let index = TopicIndex::new();
        let conn = Uuid::new_v4();

        assert!(index.subscribe("Room/1/Updated", conn));
        assert!(!index.subscribe("Room/1/Updated", conn));
        assert_eq!(index.members("Room/1/Updated"), vec![conn]);
    }

    #[test]
    fn test_last_unsubscribe_drops_the_topic() {
        let index = TopicIndex::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        index.subscribe("Room/1/Updated", first);
        index.subscribe("Room/1/Updated", second);
        assert_eq!(index.topic_count(), 1);

        assert!(index.unsubscribe("Room/1/Updated", first));
        assert_eq!(index.topic_count(), 1);
        assert!(index.unsubscribe("Room/1/Updated", second));
        assert_eq!(index.topic_count(), 0);
        assert!(!index.unsubscribe("Room/1/Updated", second));
    }

    #[test]
    fn test_purge_sweeps_every_topic() {
        let index = TopicIndex::new();
        let leaving = Uuid::new_v4();
        let staying = Uuid::new_v4();

        index.subscribe("Room/1/Updated", leaving);
        index.subscribe("Room/2/Updated", leaving);
        index.subscribe("Room/2/Updated", staying);

        index.purge(leaving);
        assert_eq!(index.topic_count(), 1);
        assert_eq!(index.members("Room/2/Updated"), vec![staying]);
        assert!(index.members("Room/1/Updated").is_empty());
    }
}
