//! Internal message types for the brume relay.
//!
//! A [`Message`] is the immutable unit handed from a publisher to the
//! topic registry and fanned out to subscriber sessions. The payload is
//! reference-counted, so fan-out never copies payload bytes.

use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// An immutable message routed through the relay.
#[derive(Debug, Clone)]
pub struct Message {
    /// Session ID of the publishing session, if any.
    pub source: Option<String>,
    /// Target topic.
    pub topic: String,
    /// Message payload (ref-counted for zero-copy fan-out).
    pub payload: Bytes,
    /// Retain flag: store as the topic's last known message.
    pub retain: bool,
    /// Timestamp when the message entered the relay.
    pub timestamp: u64,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            source: None,
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
            timestamp: now_millis(),
        }
    }

    /// Attach the publishing session's ID.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the retain flag.
    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Get the payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}
