//! # brume-transport
//!
//! Transport abstraction layer for the brume telemetry relay.
//!
//! This crate provides a unified interface over the two wire transports
//! the relay terminates:
//!
//! - **WebSocket** - Browser dashboards
//! - **TCP** - Microcontroller sensors, length-prefixed frames on the socket
//!
//! ## Transport Abstraction
//!
//! All transports implement the `Transport` and `Connection` traits,
//! allowing the session runtime to be protocol-agnostic.
//!
//! ```rust,ignore
//! use brume_transport::{Transport, Connection};
//!
//! async fn handle_connection(mut conn: Box<dyn Connection>) {
//!     while let Ok(Some(frame)) = conn.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod traits;

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connection, Transport, TransportError};

#[cfg(feature = "tcp")]
pub use tcp::TcpTransport;

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
