//! Session handles and the session table.
//!
//! A [`SessionHandle`] is the broker-side view of one connected client:
//! the outbound frame queue its writer drains, the client-chosen
//! identifier, and the liveness deadline. The handle is shared between
//! the fan-out path and the keepalive sweep; the session's own worker is
//! the only writer of the deadline.

use crate::message::now_millis;
use crate::registry::SessionId;
use brume_protocol::Frame;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::debug;

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique session ID.
#[must_use]
pub fn next_session_id() -> SessionId {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("sess_{:x}", timestamp.wrapping_add(counter))
}

/// Broker-side state for one connected session.
#[derive(Debug)]
pub struct SessionHandle {
    session_id: SessionId,
    client_id: String,
    outbound: mpsc::UnboundedSender<Frame>,
    /// Keepalive window in milliseconds; 0 disables expiry.
    window_ms: u64,
    /// Epoch-millis liveness deadline. Written by the session's worker
    /// on every inbound frame, read by the sweep task.
    deadline: AtomicU64,
}

impl SessionHandle {
    /// Create a handle and the receiving end of its outbound queue.
    ///
    /// The returned receiver is owned by the session's worker; dropping
    /// the handle (removing it from the table) closes the queue and
    /// unwinds the worker.
    #[must_use]
    pub fn new(client_id: impl Into<String>, window_ms: u64) -> (Arc<Self>, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            session_id: next_session_id(),
            client_id: client_id.into(),
            outbound: tx,
            window_ms,
            deadline: AtomicU64::new(now_millis().saturating_add(window_ms)),
        };
        (Arc::new(handle), rx)
    }

    /// Get the server-issued session ID.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Get the client-chosen identifier (not required to be unique).
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Get the keepalive window in milliseconds (0 = disabled).
    #[must_use]
    pub fn keepalive_window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Enqueue a frame for delivery to this session.
    ///
    /// Non-blocking. Returns `false` if the session's worker is gone and
    /// the frame was dropped.
    pub fn enqueue(&self, frame: Frame) -> bool {
        self.outbound.send(frame).is_ok()
    }

    /// Refresh the liveness deadline.
    pub fn touch(&self, now_ms: u64) {
        if self.window_ms > 0 {
            self.deadline
                .store(now_ms.saturating_add(self.window_ms), Ordering::Relaxed);
        }
    }

    /// Check whether the liveness deadline has elapsed.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.window_ms > 0 && self.deadline.load(Ordering::Relaxed) < now_ms
    }
}

/// The table of live sessions.
///
/// Owned by the broker; shared with the sweep task. Removal is
/// first-wins: whichever cleanup path removes a session gets its handle,
/// later attempts see nothing.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
}

impl SessionTable {
    /// Create an empty session table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session handle.
    pub fn insert(&self, handle: Arc<SessionHandle>) {
        debug!(session = %handle.session_id(), client = %handle.client_id(), "Session registered");
        self.sessions
            .insert(handle.session_id().to_string(), handle);
    }

    /// Get a session handle by ID.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.get(session_id).map(|h| Arc::clone(&h))
    }

    /// Remove a session. The first caller gets the handle; a second
    /// remove of the same ID is a no-op returning `None`.
    pub fn remove(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.remove(session_id).map(|(_, handle)| handle)
    }

    /// Refresh a session's liveness deadline.
    pub fn touch(&self, session_id: &str, now_ms: u64) {
        if let Some(handle) = self.sessions.get(session_id) {
            handle.touch(now_ms);
        }
    }

    /// Collect the IDs of sessions whose deadline has elapsed.
    #[must_use]
    pub fn expired(&self, now_ms: u64) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|h| h.is_expired(now_ms))
            .map(|h| h.key().clone())
            .collect()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove and return every session handle. Used at shutdown to drain
    /// all sessions: dropping the handles closes their outbound queues.
    pub fn drain(&self) -> Vec<Arc<SessionHandle>> {
        let ids: Vec<SessionId> = self.sessions.iter().map(|h| h.key().clone()).collect();
        ids.iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        let id1 = next_session_id();
        let id2 = next_session_id();
        assert_ne!(id1, id2);
        assert!(id1.starts_with("sess_"));
    }

    #[test]
    fn test_enqueue_and_receive() {
        let (handle, mut rx) = SessionHandle::new("dashboard", 30_000);

        assert!(handle.enqueue(Frame::publish("meteo/temperature", b"21.5".to_vec())));
        let frame = rx.try_recv().unwrap();
        assert!(matches!(frame, Frame::Publish { .. }));
    }

    #[test]
    fn test_enqueue_fails_after_receiver_dropped() {
        let (handle, rx) = SessionHandle::new("dashboard", 30_000);
        drop(rx);
        assert!(!handle.enqueue(Frame::Ping));
    }

    #[test]
    fn test_expiry() {
        let (handle, _rx) = SessionHandle::new("sensor", 1_000);
        let now = now_millis();

        assert!(!handle.is_expired(now));
        assert!(handle.is_expired(now + 2_000));

        handle.touch(now + 2_000);
        assert!(!handle.is_expired(now + 2_500));
    }

    #[test]
    fn test_zero_window_never_expires() {
        let (handle, _rx) = SessionHandle::new("wired-sensor", 0);
        assert!(!handle.is_expired(now_millis() + 1_000_000));
    }

    #[test]
    fn test_table_remove_is_first_wins() {
        let table = SessionTable::new();
        let (handle, _rx) = SessionHandle::new("sensor", 0);
        let id = handle.session_id().to_string();
        table.insert(handle);

        assert!(table.remove(&id).is_some());
        assert!(table.remove(&id).is_none());
    }

    #[test]
    fn test_table_expired() {
        let table = SessionTable::new();
        let (short, _rx1) = SessionHandle::new("a", 10);
        let (long, _rx2) = SessionHandle::new("b", 60_000);
        let short_id = short.session_id().to_string();
        table.insert(short);
        table.insert(long);

        let expired = table.expired(now_millis() + 1_000);
        assert_eq!(expired, vec![short_id]);
    }

    #[test]
    fn test_table_drain() {
        let table = SessionTable::new();
        let (h1, _rx1) = SessionHandle::new("a", 0);
        let (h2, _rx2) = SessionHandle::new("b", 0);
        table.insert(h1);
        table.insert(h2);

        let drained = table.drain();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
    }
}
