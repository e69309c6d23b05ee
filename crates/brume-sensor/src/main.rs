//! # brume-sensor
//!
//! Simulated weather sensor: connects to the relay over WebSocket and
//! publishes randomized temperature and humidity readings on a fixed
//! interval, plus a retained status marker so dashboards can tell
//! whether the station is online.
//!
//! ## Usage
//!
//! ```bash
//! # Publish to a local relay every 5 seconds
//! brume-sensor
//!
//! # Custom relay URL and interval
//! brume-sensor ws://weather.example:8888 10
//! ```

use anyhow::{bail, Context, Result};
use brume_protocol::{codec, Frame};
use bytes::BytesMut;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const TEMPERATURE_TOPIC: &str = "meteo/temperature";
const HUMIDITY_TOPIC: &str = "meteo/humidity";
const STATUS_TOPIC: &str = "meteo/status";

const KEEPALIVE_SECS: u16 = 30;
const DEFAULT_URL: &str = "ws://127.0.0.1:8888";
const DEFAULT_INTERVAL_SECS: u64 = 5;

/// Small xorshift generator for simulated readings.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn from_time() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64;
        Self {
            state: seed.max(1),
        }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_f64(&mut self) -> f64 {
        (self.next() >> 11) as f64 / (1u64 << 53) as f64
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "brume_sensor=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let url = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| DEFAULT_URL.to_string());
    let interval_secs = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_INTERVAL_SECS);

    let (ws, _) = connect_async(&url)
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    let (mut sink, mut stream) = ws.split();
    let mut read_buffer = BytesMut::with_capacity(4096);

    let client_id = format!(
        "sensor_{:x}",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64
    );

    // Handshake
    send_frame(&mut sink, &Frame::connect(&client_id, KEEPALIVE_SECS)).await?;
    match read_frame(&mut stream, &mut read_buffer).await? {
        Some(Frame::Connected { session_id, .. }) => {
            info!(session = %session_id, url = %url, "Connected to relay");
        }
        Some(other) => bail!("Unexpected handshake reply: {:?}", other.frame_type()),
        None => bail!("Relay closed the connection during handshake"),
    }

    // Mark the station online; retained so late subscribers see it
    send_frame(
        &mut sink,
        &Frame::publish_retained(STATUS_TOPIC, b"online".to_vec()),
    )
    .await?;

    info!(
        interval = interval_secs,
        "Publishing readings on {} and {}",
        TEMPERATURE_TOPIC,
        HUMIDITY_TOPIC
    );

    let mut rng = XorShift64::from_time();
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping");
                break;
            }

            _ = ticker.tick() => {
                // 20-30 degrees C, 30-80 % relative humidity
                let temperature = format!("{:.1}", 20.0 + rng.next_f64() * 10.0);
                let humidity = format!("{}", 30 + rng.next() % 51);

                send_frame(&mut sink, &Frame::publish(TEMPERATURE_TOPIC, temperature.clone().into_bytes())).await?;
                send_frame(&mut sink, &Frame::publish(HUMIDITY_TOPIC, humidity.clone().into_bytes())).await?;

                info!(temperature = %temperature, humidity = %humidity, "Published readings");
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        read_buffer.extend_from_slice(&data);
                        while let Some(frame) = codec::decode_from(&mut read_buffer)? {
                            match frame {
                                Frame::Error { code, message, .. } => {
                                    warn!(code = code, message = %message, "Relay reported an error");
                                }
                                other => debug!(frame_type = ?other.frame_type(), "Ignoring relay frame"),
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        warn!("Relay closed the connection");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        return Ok(());
                    }
                }
            }
        }
    }

    // Mark the station offline, then leave cleanly
    send_frame(
        &mut sink,
        &Frame::publish_retained(STATUS_TOPIC, b"offline".to_vec()),
    )
    .await?;
    send_frame(&mut sink, &Frame::Disconnect).await?;
    let _ = sink.close().await;

    Ok(())
}

/// Encode a frame and send it as a binary WebSocket message.
async fn send_frame(sink: &mut WsSink, frame: &Frame) -> Result<()> {
    let data = codec::encode(frame)?;
    sink.send(Message::Binary(data.to_vec()))
        .await
        .context("Failed to send frame")?;
    Ok(())
}

/// Read the next relay frame from the WebSocket stream.
async fn read_frame(stream: &mut WsStream, buffer: &mut BytesMut) -> Result<Option<Frame>> {
    loop {
        if let Some(frame) = codec::decode_from(buffer)? {
            return Ok(Some(frame));
        }

        match stream.next().await {
            Some(Ok(Message::Binary(data))) => buffer.extend_from_slice(&data),
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e).context("WebSocket error"),
        }
    }
}
