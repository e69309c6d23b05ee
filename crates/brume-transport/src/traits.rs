//! Transport abstraction traits for the brume relay.
//!
//! These traits define the interface that all transport implementations
//! must provide, allowing the relay to terminate WebSocket and raw TCP
//! clients through the same session machinery.

use async_trait::async_trait;
use brume_protocol::Frame;
use bytes::Bytes;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] brume_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// A transport that can accept connections.
///
/// Transports are responsible for the underlying protocol (WebSocket
/// framing, raw length-prefixed TCP) and present a uniform frame-level
/// interface to the session runtime.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new connection.
    ///
    /// This method blocks until a new connection is available or an error occurs.
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Get the transport name (e.g., "websocket", "tcp").
    fn name(&self) -> &'static str;
}

/// An active connection over a transport.
///
/// A connection is driven by a single session worker, which both reads
/// inbound frames and drains the session's outbound queue; the trait
/// therefore takes `&mut self` throughout and needs no internal locking.
#[async_trait]
pub trait Connection: Send {
    /// Receive the next frame from the connection.
    ///
    /// Returns `None` if the connection is closed cleanly. `recv` is
    /// cancel-safe: a cancelled call never discards buffered bytes.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;

    /// Send a frame to the connection.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Send pre-encoded frame bytes to the connection.
    async fn send_raw(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Close the connection gracefully. Double-close is a safe no-op.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}
