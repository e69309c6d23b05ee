//! The relay broker: topic registry + session table + fan-out.
//!
//! The broker performs no transport I/O. Delivery means enqueueing a
//! frame into a subscriber's outbound queue; the session's writer drains
//! the queue to the wire. That keeps fan-out non-blocking and gives each
//! subscriber FIFO delivery independent of every other subscriber.

use crate::message::{now_millis, Message};
use crate::registry::{RegistryStats, SessionId, TopicRegistry};
use crate::session::{SessionHandle, SessionTable};
use brume_protocol::Frame;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// The central relay broker.
#[derive(Debug, Default)]
pub struct Broker {
    registry: TopicRegistry,
    sessions: SessionTable,
}

impl Broker {
    /// Create a new broker with an empty registry and session table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session after a successful handshake.
    ///
    /// Returns the session handle and the receiving end of its outbound
    /// queue. `window_ms` is the effective keepalive window (0 disables
    /// expiry for this session).
    pub fn register(
        &self,
        client_id: impl Into<String>,
        window_ms: u64,
    ) -> (Arc<SessionHandle>, mpsc::UnboundedReceiver<Frame>) {
        let (handle, rx) = SessionHandle::new(client_id, window_ms);
        self.sessions.insert(Arc::clone(&handle));
        (handle, rx)
    }

    /// Subscribe a session to a topic.
    ///
    /// Idempotent. If the topic has a retained message, it is queued for
    /// delivery to the subscriber immediately.
    pub fn subscribe(&self, session_id: &str, topic: &str) {
        if let Some(retained) = self.registry.subscribe(session_id, topic) {
            if let Some(handle) = self.sessions.get(session_id) {
                let frame = Frame::publish_retained(
                    retained.topic.clone(),
                    retained.payload.to_vec(),
                );
                if !handle.enqueue(frame) {
                    trace!(session = %session_id, topic = %topic, "Retained delivery to closing session dropped");
                }
            }
        }
    }

    /// Unsubscribe a session from a topic. Idempotent.
    pub fn unsubscribe(&self, session_id: &str, topic: &str) {
        self.registry.unsubscribe(session_id, topic);
    }

    /// Publish a message: look up the subscriber set and enqueue a
    /// delivery frame for each subscriber.
    ///
    /// Fire-and-forget: a subscriber whose queue is gone is dropped from
    /// the relay without affecting delivery to the others, and the
    /// publisher is never told either way. Returns the number of
    /// subscribers the message was queued for.
    pub fn publish(&self, message: Message) -> usize {
        let subscribers = self.registry.publish(&message);
        if subscribers.is_empty() {
            return 0;
        }

        let frame = Frame::publish(message.topic.clone(), message.payload.to_vec());

        let mut delivered = 0;
        let mut dead: Vec<SessionId> = Vec::new();

        for session_id in subscribers {
            match self.sessions.get(&session_id) {
                Some(handle) => {
                    if handle.enqueue(frame.clone()) {
                        delivered += 1;
                    } else {
                        dead.push(session_id);
                    }
                }
                None => {
                    // Stale registry entry: the session is already gone.
                    self.registry.unsubscribe(&session_id, &message.topic);
                }
            }
        }

        for session_id in dead {
            warn!(session = %session_id, topic = %message.topic, "Dropping subscriber with closed queue");
            self.remove_session(&session_id);
        }

        trace!(topic = %message.topic, recipients = delivered, "Published");
        delivered
    }

    /// Publish an external event (e.g. a freshly stored reading) onto a
    /// topic. This is the one-way push hook for collaborators outside
    /// the relay; there is no callback path from the relay into them.
    pub fn publish_external(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        retain: bool,
    ) -> usize {
        self.publish(Message::new(topic, payload).with_retain(retain))
    }

    /// Refresh a session's liveness deadline.
    pub fn touch(&self, session_id: &str) {
        self.sessions.touch(session_id, now_millis());
    }

    /// Remove a session and all of its subscriptions.
    ///
    /// Safe to call from any cleanup path; only the first call for a
    /// given ID observes `true`. Dropping the handle closes the outbound
    /// queue, which unwinds the session's worker if it is still running.
    pub fn remove_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id);
        self.registry.remove_session(session_id);
        if removed.is_some() {
            debug!(session = %session_id, "Session removed");
            true
        } else {
            false
        }
    }

    /// Collect the IDs of sessions whose keepalive deadline has elapsed.
    #[must_use]
    pub fn expired_sessions(&self, now_ms: u64) -> Vec<SessionId> {
        self.sessions.expired(now_ms)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Registry statistics.
    #[must_use]
    pub fn registry_stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Subscriber count for a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry.subscriber_count(topic)
    }

    /// Drain every session: remove all handles and their subscriptions.
    ///
    /// Used at shutdown. Closing the queues unwinds the session workers,
    /// which release their transports. Returns the number of sessions
    /// drained.
    pub fn drain(&self) -> usize {
        let drained = self.sessions.drain();
        for handle in &drained {
            self.registry.remove_session(handle.session_id());
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "Drained sessions");
        }
        drained.len()
    }
}
