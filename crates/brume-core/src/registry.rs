//! Topic registry for the brume relay.
//!
//! The registry owns the mapping from topic name to the set of subscribed
//! session IDs and answers fan-out lookups on publish. It performs no I/O:
//! delivery is the broker's job.

use crate::message::Message;
use crate::topic::TopicId;
use dashmap::{DashMap, DashSet};
use std::collections::HashSet;
use tracing::{debug, trace};

/// A session identifier, issued by the broker at handshake.
pub type SessionId = String;

/// Per-topic state: the subscriber set and the last retained message.
#[derive(Debug, Default)]
struct TopicEntry {
    subscribers: HashSet<SessionId>,
    retained: Option<Message>,
}

impl TopicEntry {
    fn is_empty(&self) -> bool {
        self.subscribers.is_empty() && self.retained.is_none()
    }
}

/// The topic registry.
///
/// Topics are created implicitly on first subscribe or retained publish
/// and removed once they have no subscribers and no retained message.
/// All operations are atomic per topic bucket: a concurrent publish sees
/// a session either fully present or fully absent, never half-removed.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    /// Topic entries indexed by exact topic name.
    topics: DashMap<TopicId, TopicEntry>,
    /// Reverse index: session ID -> topics it is subscribed to.
    subscriptions: DashMap<SessionId, DashSet<TopicId>>,
}

impl TopicRegistry {
    /// Create a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a session to a topic.
    ///
    /// Idempotent: re-subscribing an existing (topic, session) pair is a
    /// no-op. Returns the topic's retained message, if any, so the caller
    /// can deliver it to the new subscriber.
    pub fn subscribe(&self, session_id: &str, topic: &str) -> Option<Message> {
        self.subscriptions
            .entry(session_id.to_string())
            .or_default()
            .insert(topic.to_string());

        let mut entry = self.topics.entry(topic.to_string()).or_default();
        if entry.subscribers.insert(session_id.to_string()) {
            debug!(
                topic = %topic,
                session = %session_id,
                subscribers = entry.subscribers.len(),
                "Subscribed"
            );
        }

        entry.retained.clone()
    }

    /// Unsubscribe a session from a topic.
    ///
    /// Idempotent: removing a non-existent pair is a no-op.
    pub fn unsubscribe(&self, session_id: &str, topic: &str) {
        if let Some(session_topics) = self.subscriptions.get(session_id) {
            session_topics.remove(topic);
        }

        if let Some(mut entry) = self.topics.get_mut(topic) {
            if entry.subscribers.remove(session_id) {
                debug!(
                    topic = %topic,
                    session = %session_id,
                    subscribers = entry.subscribers.len(),
                    "Unsubscribed"
                );
            }
            let empty = entry.is_empty();
            drop(entry);
            if empty {
                self.topics.remove_if(topic, |_, e| e.is_empty());
            }
        }
    }

    /// Remove a session from every topic it is subscribed to.
    ///
    /// Used on disconnect. Each topic bucket is updated under its own
    /// lock, so a concurrent publish never observes a partially-cleaned
    /// subscriber set for that topic.
    pub fn remove_session(&self, session_id: &str) {
        if let Some((_, session_topics)) = self.subscriptions.remove(session_id) {
            for topic in session_topics.iter() {
                if let Some(mut entry) = self.topics.get_mut(topic.as_str()) {
                    entry.subscribers.remove(session_id);
                    let empty = entry.is_empty();
                    drop(entry);
                    if empty {
                        self.topics.remove_if(topic.as_str(), |_, e| e.is_empty());
                    }
                }
            }
            debug!(session = %session_id, "Removed session from registry");
        }
    }

    /// Look up the subscribers for a message's topic.
    ///
    /// Returns the exact subscriber set at the instant of the call; the
    /// registry itself performs no delivery. When the message's retain
    /// flag is set, the payload is stored as the topic's retained message
    /// (an empty retained payload clears it).
    pub fn publish(&self, message: &Message) -> Vec<SessionId> {
        if message.retain {
            let mut entry = self.topics.entry(message.topic.clone()).or_default();
            if message.payload.is_empty() {
                entry.retained = None;
                trace!(topic = %message.topic, "Cleared retained message");
            } else {
                entry.retained = Some(message.clone());
                trace!(topic = %message.topic, "Stored retained message");
            }
            let subscribers: Vec<SessionId> = entry.subscribers.iter().cloned().collect();
            let empty = entry.is_empty();
            drop(entry);
            if empty {
                self.topics.remove_if(&message.topic, |_, e| e.is_empty());
            }
            return subscribers;
        }

        match self.topics.get(&message.topic) {
            Some(entry) => entry.subscribers.iter().cloned().collect(),
            None => {
                trace!(topic = %message.topic, "Publish to topic with no subscribers");
                Vec::new()
            }
        }
    }

    /// Check if a topic currently exists in the registry.
    #[must_use]
    pub fn topic_exists(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Get the subscriber count for a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|e| e.subscribers.len())
            .unwrap_or(0)
    }

    /// Get the retained message for a topic, if any.
    #[must_use]
    pub fn retained(&self, topic: &str) -> Option<Message> {
        self.topics.get(topic).and_then(|e| e.retained.clone())
    }

    /// Get the topics a session is subscribed to.
    #[must_use]
    pub fn session_topics(&self, session_id: &str) -> Vec<TopicId> {
        self.subscriptions
            .get(session_id)
            .map(|s| s.iter().map(|t| t.clone()).collect())
            .unwrap_or_default()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            topic_count: self.topics.len(),
            session_count: self.subscriptions.len(),
            total_subscriptions: self.subscriptions.iter().map(|s| s.len()).sum(),
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone)]
pub struct RegistryStats {
    /// Number of live topics.
    pub topic_count: usize,
    /// Number of sessions with at least one subscription.
    pub session_count: usize,
    /// Total number of (topic, session) pairs.
    pub total_subscriptions: usize,
}
