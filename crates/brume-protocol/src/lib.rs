//! # brume-protocol
//!
//! Wire protocol definitions for the brume sensor-telemetry relay.
//!
//! This crate defines the binary protocol spoken between relay clients
//! (sensors, dashboards) and the relay itself: frame types, the
//! length-prefixed MessagePack codec, and protocol versioning.
//!
//! ## Frame Types
//!
//! - `Connect` / `Connected` - Session handshake
//! - `Subscribe` / `Unsubscribe` / `Ack` - Topic membership
//! - `Publish` - Fire-and-forget message delivery
//! - `Ping` / `Pong` - Keepalive
//! - `Disconnect` / `Error` - Session teardown
//!
//! ## Example
//!
//! ```rust
//! use brume_protocol::{Frame, codec};
//!
//! // Create a publish frame using the helper method
//! let frame = Frame::publish("meteo/temperature", b"21.5".to_vec());
//!
//! // Encode and decode
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{code, Frame, FrameType};
pub use version::{Version, PROTOCOL_VERSION};
