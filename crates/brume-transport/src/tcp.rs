//! Raw TCP transport implementation.
//!
//! The device-facing transport: length-prefixed relay frames travel
//! directly on the TCP stream with no WebSocket framing around them.
//! Microcontroller sensors speak this; browsers use the WebSocket
//! transport instead.

use async_trait::async_trait;
use brume_protocol::{codec, Frame};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::traits::{Connection, Transport, TransportError};

/// TCP transport configuration.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum frame size in bytes.
    pub max_message_size: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:1883".parse().unwrap(),
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}

/// TCP transport.
pub struct TcpTransport {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpTransport {
    /// Create a new TCP transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: TcpConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(TransportError::Io)?;

        info!("TCP transport listening on {}", config.bind_addr);

        Ok(Self { listener, config })
    }

    /// Create a new TCP transport with default config.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(TcpConfig {
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
impl Transport for TcpTransport {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, addr) = self.listener.accept().await.map_err(TransportError::Io)?;
        stream.set_nodelay(true).map_err(TransportError::Io)?;

        debug!("Accepted TCP connection from {}", addr);

        let conn = TcpConnection::new(stream, addr, self.config.max_message_size);
        Ok(Box::new(conn))
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// A raw TCP connection.
///
/// Owned and driven by a single session worker; no internal locking.
pub struct TcpConnection {
    stream: TcpStream,
    remote_addr: SocketAddr,
    open: bool,
    read_buffer: BytesMut,
    max_message_size: usize,
}

impl TcpConnection {
    fn new(stream: TcpStream, remote_addr: SocketAddr, max_message_size: usize) -> Self {
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
impl Connection for TcpConnection {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            // Reject oversized frames from the length prefix alone, before
            // buffering the body
            if self.read_buffer.len() >= codec::LENGTH_PREFIX_SIZE {
                let announced = u32::from_be_bytes([
                    self.read_buffer[0],
                    self.read_buffer[1],
                    self.read_buffer[2],
                    self.read_buffer[3],
                ]) as usize;
                if announced > self.max_message_size {
                    return Err(TransportError::Protocol(
                        brume_protocol::ProtocolError::FrameTooLarge(announced),
                    ));
                }
            }

            if let Some(frame) = codec::decode_from(&mut self.read_buffer)? {
                return Ok(Some(frame));
            }

            let n = self
                .stream
                .read_buf(&mut self.read_buffer)
                .await
                .map_err(TransportError::Io)?;

            if n == 0 {
                self.open = false;
                if self.read_buffer.is_empty() {
                    debug!("TCP stream ended");
                    return Ok(None);
                }
                return Err(TransportError::ReceiveFailed(
                    "connection closed mid-frame".to_string(),
                ));
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

        self.stream.write_all(&data).await.map_err(|e| {
            self.open = false;
            TransportError::SendFailed(e.to_string())
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(()); // Already closed
        }
        self.open = false;

        // EOF from the peer makes shutdown a best-effort courtesy
        let _ = self.stream.shutdown().await;
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        Some(self.remote_addr.to_string())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_config_default() {
        let config = TcpConfig::default();
        assert_eq!(config.bind_addr.port(), 1883);
        assert_eq!(config.max_message_size, 64 * 1024);
    }

    #[tokio::test]
    async fn test_frame_roundtrip_over_localhost() {
        let transport = TcpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let data = codec::encode(&Frame::connect("sensor-1", 30)).unwrap();
            stream.write_all(&data).await.unwrap();

            // Read the reply frame back
            let mut buf = BytesMut::with_capacity(1024);
            loop {
                if let Some(frame) = codec::decode_from(&mut buf).unwrap() {
                    return frame;
                }
                stream.read_buf(&mut buf).await.unwrap();
            }
        });

        let mut conn = transport.accept().await.unwrap();
        let frame = conn.recv().await.unwrap().unwrap();
        assert!(matches!(frame, Frame::Connect { .. }));

        conn.send(Frame::connected("sess_1", 30)).await.unwrap();
        let reply = client.await.unwrap();
        assert!(matches!(reply, Frame::Connected { .. }));

        conn.close().await.unwrap();
        // Double-close is a no-op
        conn.close().await.unwrap();
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let transport = TcpTransport::new(TcpConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            max_message_size: 16,
        })
        .await
        .unwrap();
        let addr = transport.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let data = codec::encode(&Frame::publish("meteo/raw", vec![0u8; 128])).unwrap();
            stream.write_all(&data).await.unwrap();
            // Hold the socket open until the server has reacted
            let mut sink = [0u8; 1];
            let _ = stream.read(&mut sink).await;
        });

        let mut conn = transport.accept().await.unwrap();
        match conn.recv().await {
            Err(TransportError::Protocol(brume_protocol::ProtocolError::FrameTooLarge(_))) => {}
            other => panic!("Expected FrameTooLarge, got {:?}", other.map(|_| ())),
        }

        conn.close().await.unwrap();
        client.await.unwrap();
    }
}
