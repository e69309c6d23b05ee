//! Frame types for the brume relay protocol.
//!
//! Frames are the unit of communication between clients and the relay.
//! Each frame is serialized using MessagePack for compact binary encoding.

use serde::{Deserialize, Serialize};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connect = 0x01,
    Connected = 0x02,
    Subscribe = 0x03,
    Unsubscribe = 0x04,
    Ack = 0x05,
    Publish = 0x06,
    Ping = 0x07,
    Pong = 0x08,
    Disconnect = 0x09,
    Error = 0x0A,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connect),
            0x02 => Ok(FrameType::Connected),
            0x03 => Ok(FrameType::Subscribe),
            0x04 => Ok(FrameType::Unsubscribe),
            0x05 => Ok(FrameType::Ack),
            0x06 => Ok(FrameType::Publish),
            0x07 => Ok(FrameType::Ping),
            0x08 => Ok(FrameType::Pong),
            0x09 => Ok(FrameType::Disconnect),
            0x0A => Ok(FrameType::Error),
            _ => Err("Invalid frame type"),
        }
    }
}

/// Protocol error codes carried by `Frame::Error`.
pub mod code {
    /// The first frame on a connection was not `Connect`.
    pub const HANDSHAKE_REQUIRED: u16 = 1001;
    /// The client's protocol version is incompatible.
    pub const UNSUPPORTED_VERSION: u16 = 1002;
    /// The topic string failed validation.
    pub const INVALID_TOPIC: u16 = 1003;
    /// A `Connect` frame arrived on an already-connected session.
    pub const ALREADY_CONNECTED: u16 = 1004;
}

/// A protocol frame.
///
/// Subscribe and unsubscribe carry a request id echoed back in the `Ack`.
/// Publish is fire-and-forget: the relay never responds to the publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Handshake request; must be the first frame a client sends.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol version.
        version: u8,
        /// Client-chosen identifier. Not required to be unique.
        client_id: String,
        /// Keepalive window in seconds; 0 disables keepalive expiry.
        keepalive_secs: u16,
    },

    /// Handshake accept.
    #[serde(rename = "connected")]
    Connected {
        /// Server-issued session identifier.
        session_id: String,
        /// Negotiated protocol version.
        version: u8,
        /// Effective keepalive window in seconds (after server clamping).
        keepalive_secs: u16,
    },

    /// Subscribe to a topic.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// Request ID for acknowledgment.
        id: u64,
        /// Topic to subscribe to.
        topic: String,
    },

    /// Unsubscribe from a topic.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// Request ID for acknowledgment.
        id: u64,
        /// Topic to unsubscribe from.
        topic: String,
    },

    /// Acknowledgment of a subscribe or unsubscribe request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Publish a message to a topic, or deliver one to a subscriber.
    #[serde(rename = "publish")]
    Publish {
        /// Target topic.
        topic: String,
        /// Message payload.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
        /// Retain flag: store as the topic's last known message.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        retain: bool,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping,

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong,

    /// Graceful disconnect.
    #[serde(rename = "disconnect")]
    Disconnect,

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code (see [`code`]).
        code: u16,
        /// Human-readable error message.
        message: String,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Subscribe { .. } => FrameType::Subscribe,
            Frame::Unsubscribe { .. } => FrameType::Unsubscribe,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Publish { .. } => FrameType::Publish,
            Frame::Ping => FrameType::Ping,
            Frame::Pong => FrameType::Pong,
            Frame::Disconnect => FrameType::Disconnect,
            Frame::Error { .. } => FrameType::Error,
        }
    }

    /// Create a new Connect frame with the current protocol version.
    #[must_use]
    pub fn connect(client_id: impl Into<String>, keepalive_secs: u16) -> Self {
        Frame::Connect {
            version: crate::version::PROTOCOL_VERSION.major,
            client_id: client_id.into(),
            keepalive_secs,
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(session_id: impl Into<String>, keepalive_secs: u16) -> Self {
        Frame::Connected {
            session_id: session_id.into(),
            version: crate::version::PROTOCOL_VERSION.major,
            keepalive_secs,
        }
    }

    /// Create a new Subscribe frame.
    #[must_use]
    pub fn subscribe(id: u64, topic: impl Into<String>) -> Self {
        Frame::Subscribe {
            id,
            topic: topic.into(),
        }
    }

    /// Create a new Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(id: u64, topic: impl Into<String>) -> Self {
        Frame::Unsubscribe {
            id,
            topic: topic.into(),
        }
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create a new Publish frame.
    #[must_use]
    pub fn publish(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Frame::Publish {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }

    /// Create a new retained Publish frame.
    #[must_use]
    pub fn publish_retained(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Frame::Publish {
            topic: topic.into(),
            payload: payload.into(),
            retain: true,
        }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }
}
