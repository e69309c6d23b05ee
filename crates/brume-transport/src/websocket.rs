//! WebSocket transport implementation.
//!
//! This module provides the browser-facing transport using
//! tokio-tungstenite. Relay frames travel inside binary WebSocket
//! messages; a message may carry any number of complete or partial
//! frames, so inbound bytes feed a streaming decode buffer.

use async_trait::async_trait;
use brume_protocol::{codec, Frame};
use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::traits::{Connection, Transport, TransportError};

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8888".parse().unwrap(),
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}

/// WebSocket transport.
pub struct WebSocketTransport {
    listener: TcpListener,
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(TransportError::Io)?;

        info!("WebSocket transport listening on {}", config.bind_addr);

        Ok(Self { listener, config })
    }

    /// Create a new WebSocket transport with default config.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(WebSocketConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, addr) = self.listener.accept().await.map_err(TransportError::Io)?;

        debug!("Accepted TCP connection from {}", addr);

        let ws_stream = accept_async(stream).await.map_err(|e| {
            error!("WebSocket handshake failed: {}", e);
            TransportError::Other(format!("WebSocket handshake failed: {}", e))
        })?;

        debug!("WebSocket handshake completed with {}", addr);

        let conn = WebSocketConnection::new(ws_stream, addr, self.config.max_message_size);
        Ok(Box::new(conn))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// A WebSocket connection.
///
/// Owned and driven by a single session worker; no internal locking.
pub struct WebSocketConnection {
    stream: WebSocketStream<TcpStream>,
    remote_addr: SocketAddr,
    open: bool,
    read_buffer: BytesMut,
    max_message_size: usize,
}

impl WebSocketConnection {
    fn new(stream: WebSocketStream<TcpStream>, remote_addr: SocketAddr, max_message_size: usize) -> Self {
        Self {
            stream,
            remote_addr,
            open: true,
            read_buffer: BytesMut::with_capacity(4096),
            max_message_size,
        }
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            // Drain the buffer before touching the socket
            if let Some(frame) = codec::decode_from(&mut self.read_buffer)? {
                return Ok(Some(frame));
            }

            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    if data.len() > self.max_message_size {
                        warn!(
                            "Message too large: {} bytes (max: {})",
                            data.len(),
                            self.max_message_size
                        );
                        return Err(TransportError::Protocol(
                            brume_protocol::ProtocolError::FrameTooLarge(data.len()),
                        ));
                    }
                    self.read_buffer.extend_from_slice(&data);
                }
                Some(Ok(Message::Text(text))) => {
                    // For compatibility, treat text as binary
                    self.read_buffer.extend_from_slice(text.as_bytes());
                }
                Some(Ok(Message::Ping(data))) => {
                    // Respond to transport-level ping with pong
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    // Ignore pong messages
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    self.open = false;
                    return Ok(None);
                }
                Some(Ok(Message::Frame(_))) => {
                    // Raw frame, ignore
                }
                Some(Err(WsError::ConnectionClosed)) => {
                    debug!("Connection closed");
                    self.open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    warn!("WebSocket error: {}", e);
                    self.open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    self.open = false;
                    return Ok(None);
                }
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let data = codec::encode(&frame)?;
        self.send_raw(data).await
    }

    async fn send_raw(&mut self, data: Bytes) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::ConnectionClosed);
        }

        self.stream
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| {
                self.open = false;
                TransportError::SendFailed(e.to_string())
            })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(()); // Already closed
        }
        self.open = false;

        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Other(format!("Failed to close: {}", e))),
        }
    }

    fn remote_addr(&self) -> Option<String> {
        Some(self.remote_addr.to_string())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
