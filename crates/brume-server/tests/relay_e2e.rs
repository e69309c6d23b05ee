//! End-to-end tests for the brume relay.
//!
//! These tests spin up a full relay on ephemeral ports and drive it with
//! real WebSocket and TCP clients through handshake, subscribe, publish,
//! unsubscribe, disconnect, and keepalive expiry.

use brume_protocol::{code, codec, Frame};
use brume_server::{config::Config, runtime, RelayHandle};
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const SILENCE_WINDOW: Duration = Duration::from_millis(300);

fn test_config() -> Config {
    let mut config = Config::default();
    config.host = "127.0.0.1".to_string();
    config.listeners.ws_port = 0;
    config.listeners.tcp_port = 0;
    config.http.port = 0;
    config.metrics.enabled = false;
    config.keepalive.sweep_interval_ms = 50;
    config
}

async fn start_relay() -> RelayHandle {
    runtime::spawn(test_config()).await.expect("relay failed to start")
}

/// Poll a condition until it holds or a deadline passes.
async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met within deadline");
}

/// A WebSocket test client speaking the relay protocol.
struct WsClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    buffer: BytesMut,
    session_id: String,
}

impl WsClient {
    /// Open a raw WebSocket without performing the relay handshake.
    async fn open(addr: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{}", addr))
            .await
            .expect("websocket connect failed");
        Self {
            ws,
            buffer: BytesMut::with_capacity(4096),
            session_id: String::new(),
        }
    }

    /// Open a WebSocket and complete the relay handshake.
    async fn connect(addr: SocketAddr, client_id: &str, keepalive_secs: u16) -> Self {
        let mut client = Self::open(addr).await;
        client.send(Frame::connect(client_id, keepalive_secs)).await;
        match client.expect_frame().await {
            Frame::Connected { session_id, .. } => client.session_id = session_id,
            other => panic!("expected Connected, got {:?}", other),
        }
        client
    }

    async fn send(&mut self, frame: Frame) {
        let data = codec::encode(&frame).unwrap();
        self.ws
            .send(Message::Binary(data.to_vec()))
            .await
            .expect("websocket send failed");
    }

    /// Read the next relay frame; `None` once the connection is closed.
    async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = codec::decode_from(&mut self.buffer).unwrap() {
                return Some(frame);
            }
            match self.ws.next().await {
                Some(Ok(Message::Binary(data))) => self.buffer.extend_from_slice(&data),
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(_)) => {}
                Some(Err(_)) => return None,
            }
        }
    }

    async fn expect_frame(&mut self) -> Frame {
        tokio::time::timeout(RECV_TIMEOUT, self.next_frame())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed while waiting for frame")
    }

    async fn subscribe(&mut self, id: u64, topic: &str) {
        self.send(Frame::subscribe(id, topic)).await;
        match self.expect_frame().await {
            Frame::Ack { id: acked } => assert_eq!(acked, id),
            other => panic!("expected Ack, got {:?}", other),
        }
    }

    async fn expect_publish(&mut self) -> (String, Vec<u8>) {
        match self.expect_frame().await {
            Frame::Publish { topic, payload, .. } => (topic, payload),
            other => panic!("expected Publish, got {:?}", other),
        }
    }

    /// Assert that no frame arrives within the silence window.
    async fn assert_silent(&mut self) {
        match tokio::time::timeout(SILENCE_WINDOW, self.next_frame()).await {
            Err(_) => {}
            Ok(frame) => panic!("expected silence, got {:?}", frame),
        }
    }
}

/// A raw TCP test client speaking length-prefixed relay frames.
struct TcpClient {
    stream: TcpStream,
    buffer: BytesMut,
}

impl TcpClient {
    async fn connect(addr: SocketAddr, client_id: &str, keepalive_secs: u16) -> Self {
        let stream = TcpStream::connect(addr).await.expect("tcp connect failed");
        let mut client = Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
        };
        client.send(Frame::connect(client_id, keepalive_secs)).await;
        match client.expect_frame().await {
            Frame::Connected { .. } => {}
            other => panic!("expected Connected, got {:?}", other),
        }
        client
    }

    async fn send(&mut self, frame: Frame) {
        let data = codec::encode(&frame).unwrap();
        self.stream.write_all(&data).await.expect("tcp send failed");
    }

    async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = codec::decode_from(&mut self.buffer).unwrap() {
                return Some(frame);
            }
            let n = self.stream.read_buf(&mut self.buffer).await.ok()?;
            if n == 0 {
                return None;
            }
        }
    }

    async fn expect_frame(&mut self) -> Frame {
        tokio::time::timeout(RECV_TIMEOUT, self.next_frame())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed while waiting for frame")
    }
}

#[tokio::test]
async fn ws_subscribe_publish_roundtrip() {
    let relay = start_relay().await;
    let addr = relay.ws_addr().unwrap();

    let mut dashboard = WsClient::connect(addr, "dashboard", 0).await;
    dashboard.subscribe(1, "meteo/temperature").await;

    let mut sensor = WsClient::connect(addr, "sensor", 0).await;
    sensor
        .send(Frame::publish("meteo/temperature", b"21.5".to_vec()))
        .await;

    let (topic, payload) = dashboard.expect_publish().await;
    assert_eq!(topic, "meteo/temperature");
    assert_eq!(payload, b"21.5");

    relay.shutdown().await;
}

#[tokio::test]
async fn subscriber_only_receives_its_topics() {
    let relay = start_relay().await;
    let addr = relay.ws_addr().unwrap();

    let mut temperature = WsClient::connect(addr, "temp-dash", 0).await;
    temperature.subscribe(1, "meteo/temperature").await;

    let mut humidity = WsClient::connect(addr, "hum-dash", 0).await;
    humidity.subscribe(1, "meteo/humidity").await;

    let mut sensor = WsClient::connect(addr, "sensor", 0).await;
    sensor
        .send(Frame::publish("meteo/temperature", b"21.5".to_vec()))
        .await;

    let (topic, payload) = temperature.expect_publish().await;
    assert_eq!(topic, "meteo/temperature");
    assert_eq!(payload, b"21.5");

    humidity.assert_silent().await;

    relay.shutdown().await;
}

#[tokio::test]
async fn fanout_and_disconnect_cleanup() {
    let relay = start_relay().await;
    let addr = relay.ws_addr().unwrap();

    let mut a = WsClient::connect(addr, "dash-a", 0).await;
    a.subscribe(1, "meteo/humidity").await;
    let mut b = WsClient::connect(addr, "dash-b", 0).await;
    b.subscribe(1, "meteo/humidity").await;

    let mut c = WsClient::connect(addr, "sensor-c", 0).await;
    c.send(Frame::publish("meteo/humidity", b"60".to_vec())).await;

    assert_eq!(a.expect_publish().await.1, b"60");
    assert_eq!(b.expect_publish().await.1, b"60");

    // A leaves; its subscriptions must be cleaned up
    a.send(Frame::Disconnect).await;
    drop(a);

    let broker = relay.broker().clone();
    wait_for(move || broker.session_count() == 2).await;
    assert_eq!(relay.broker().subscriber_count("meteo/humidity"), 1);

    c.send(Frame::publish("meteo/humidity", b"61".to_vec())).await;
    assert_eq!(b.expect_publish().await.1, b"61");

    relay.shutdown().await;
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let relay = start_relay().await;
    let addr = relay.ws_addr().unwrap();

    let mut dashboard = WsClient::connect(addr, "dashboard", 0).await;
    dashboard.subscribe(1, "meteo/temperature").await;

    let mut sensor = WsClient::connect(addr, "sensor", 0).await;
    sensor
        .send(Frame::publish("meteo/temperature", b"21.5".to_vec()))
        .await;
    assert_eq!(dashboard.expect_publish().await.1, b"21.5");

    // The Ack means the registry no longer holds the subscription
    dashboard.send(Frame::unsubscribe(2, "meteo/temperature")).await;
    match dashboard.expect_frame().await {
        Frame::Ack { id } => assert_eq!(id, 2),
        other => panic!("expected Ack, got {:?}", other),
    }

    sensor
        .send(Frame::publish("meteo/temperature", b"22.0".to_vec()))
        .await;
    dashboard.assert_silent().await;

    relay.shutdown().await;
}

#[tokio::test]
async fn duplicate_subscribe_delivers_once() {
    let relay = start_relay().await;
    let addr = relay.ws_addr().unwrap();

    let mut dashboard = WsClient::connect(addr, "dashboard", 0).await;
    dashboard.subscribe(1, "meteo/temperature").await;
    dashboard.subscribe(2, "meteo/temperature").await;

    let mut sensor = WsClient::connect(addr, "sensor", 0).await;
    sensor
        .send(Frame::publish("meteo/temperature", b"21.5".to_vec()))
        .await;

    assert_eq!(dashboard.expect_publish().await.1, b"21.5");
    dashboard.assert_silent().await;

    relay.shutdown().await;
}

#[tokio::test]
async fn keepalive_expiry_closes_idle_session() {
    let relay = start_relay().await;
    let addr = relay.ws_addr().unwrap();

    // 1 second keepalive window; the relay closes us at 1.5x
    let mut idle = WsClient::connect(addr, "idle", 1).await;
    idle.subscribe(1, "meteo/temperature").await;
    assert_eq!(relay.broker().session_count(), 1);

    let closed = tokio::time::timeout(Duration::from_secs(4), idle.next_frame())
        .await
        .expect("relay did not close the idle session");
    assert!(closed.is_none());

    let broker = relay.broker().clone();
    wait_for(move || broker.session_count() == 0).await;
    assert_eq!(relay.broker().subscriber_count("meteo/temperature"), 0);

    relay.shutdown().await;
}

#[tokio::test]
async fn ping_refreshes_keepalive() {
    let relay = start_relay().await;
    let addr = relay.ws_addr().unwrap();

    let mut client = WsClient::connect(addr, "pinger", 1).await;

    // Ping well past the original 1.5 s deadline; each pong proves the
    // session is still alive
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(700)).await;
        client.send(Frame::Ping).await;
        match client.expect_frame().await {
            Frame::Pong => {}
            other => panic!("expected Pong, got {:?}", other),
        }
    }

    assert_eq!(relay.broker().session_count(), 1);

    relay.shutdown().await;
}

#[tokio::test]
async fn tcp_and_websocket_share_topics() {
    let relay = start_relay().await;
    let ws_addr = relay.ws_addr().unwrap();
    let tcp_addr = relay.tcp_addr().unwrap();

    let mut device = TcpClient::connect(tcp_addr, "station", 0).await;
    device.send(Frame::subscribe(1, "meteo/commands")).await;
    match device.expect_frame().await {
        Frame::Ack { id } => assert_eq!(id, 1),
        other => panic!("expected Ack, got {:?}", other),
    }

    let mut dashboard = WsClient::connect(ws_addr, "dashboard", 0).await;
    dashboard
        .send(Frame::publish("meteo/commands", b"calibrate".to_vec()))
        .await;

    match device.expect_frame().await {
        Frame::Publish { topic, payload, .. } => {
            assert_eq!(topic, "meteo/commands");
            assert_eq!(payload, b"calibrate");
        }
        other => panic!("expected Publish, got {:?}", other),
    }

    relay.shutdown().await;
}

#[tokio::test]
async fn publish_without_subscribers_is_harmless() {
    let relay = start_relay().await;
    let addr = relay.ws_addr().unwrap();

    let mut sensor = WsClient::connect(addr, "sensor", 0).await;
    sensor
        .send(Frame::publish("meteo/pressure", b"1013".to_vec()))
        .await;

    // The session is still healthy afterwards
    sensor.send(Frame::Ping).await;
    match sensor.expect_frame().await {
        Frame::Pong => {}
        other => panic!("expected Pong, got {:?}", other),
    }

    relay.shutdown().await;
}

#[tokio::test]
async fn retained_message_reaches_late_subscriber() {
    let relay = start_relay().await;
    let addr = relay.ws_addr().unwrap();

    let mut station = WsClient::connect(addr, "station", 0).await;
    station
        .send(Frame::publish_retained("meteo/status", b"online".to_vec()))
        .await;

    // The retained message keeps the topic alive even with no subscribers
    let broker = relay.broker().clone();
    wait_for(move || broker.registry_stats().topic_count == 1).await;

    let mut dashboard = WsClient::connect(addr, "dashboard", 0).await;
    dashboard.subscribe(1, "meteo/status").await;

    match dashboard.expect_frame().await {
        Frame::Publish {
            topic,
            payload,
            retain,
        } => {
            assert_eq!(topic, "meteo/status");
            assert_eq!(payload, b"online");
            assert!(retain);
        }
        other => panic!("expected retained Publish, got {:?}", other),
    }

    relay.shutdown().await;
}

#[tokio::test]
async fn external_push_reaches_subscribers() {
    let relay = start_relay().await;
    let addr = relay.ws_addr().unwrap();

    let mut dashboard = WsClient::connect(addr, "dashboard", 0).await;
    dashboard.subscribe(1, "meteo/temperature").await;

    // A stored reading is pushed into the relay from outside
    let delivered = relay
        .broker()
        .publish_external("meteo/temperature", b"19.0".to_vec(), false);
    assert_eq!(delivered, 1);

    let (topic, payload) = dashboard.expect_publish().await;
    assert_eq!(topic, "meteo/temperature");
    assert_eq!(payload, b"19.0");

    relay.shutdown().await;
}

#[tokio::test]
async fn frames_before_handshake_are_rejected() {
    let relay = start_relay().await;
    let addr = relay.ws_addr().unwrap();

    let mut client = WsClient::open(addr).await;
    client.send(Frame::subscribe(1, "meteo/temperature")).await;

    match client.expect_frame().await {
        Frame::Error { code: c, .. } => assert_eq!(c, code::HANDSHAKE_REQUIRED),
        other => panic!("expected Error, got {:?}", other),
    }

    // The relay closes the connection after the failed handshake
    let closed = tokio::time::timeout(RECV_TIMEOUT, client.next_frame())
        .await
        .expect("relay did not close the connection");
    assert!(closed.is_none());

    relay.shutdown().await;
}

#[tokio::test]
async fn colliding_client_ids_are_independent_sessions() {
    let relay = start_relay().await;
    let addr = relay.ws_addr().unwrap();

    let a = WsClient::connect(addr, "duplicate", 0).await;
    let b = WsClient::connect(addr, "duplicate", 0).await;

    assert_ne!(a.session_id, b.session_id);
    assert_eq!(relay.broker().session_count(), 2);

    relay.shutdown().await;
}
