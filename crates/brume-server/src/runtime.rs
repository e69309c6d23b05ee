//! Relay runtime: listeners, session lifecycle, and the keepalive sweep.
//!
//! Each connected client is driven by one task that both reads inbound
//! frames and drains the session's outbound queue. Fan-out from other
//! sessions only ever enqueues into that queue, so a slow client delays
//! nobody but itself. A periodic sweep closes sessions whose keepalive
//! deadline has elapsed by removing their handle, which closes the queue
//! and unwinds the task.

use crate::config::Config;
use crate::http;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{bail, Context, Result};
use brume_core::message::now_millis;
use brume_core::{validate_topic_name, Broker, Message};
use brume_protocol::{code, codec, Frame, Version};
use brume_transport::{Connection, Transport, TransportError};
use brume_transport::{tcp::TcpConfig, websocket::WebSocketConfig, TcpTransport, WebSocketTransport};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Expiry window relative to the negotiated keepalive interval.
/// A session expires after 1.5x its keepalive window without traffic.
const KEEPALIVE_GRACE_MS_PER_SEC: u64 = 1500;

/// A running relay: bound listeners, live broker, background tasks.
pub struct RelayHandle {
    broker: Arc<Broker>,
    ws_addr: Option<SocketAddr>,
    tcp_addr: Option<SocketAddr>,
    http_addr: Option<SocketAddr>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    /// The relay's broker.
    #[must_use]
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Bound WebSocket listener address, if enabled.
    #[must_use]
    pub fn ws_addr(&self) -> Option<SocketAddr> {
        self.ws_addr
    }

    /// Bound TCP listener address, if enabled.
    #[must_use]
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    /// Bound HTTP API address, if enabled.
    #[must_use]
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_addr
    }

    /// Shut the relay down: stop accepting, drain every session, release
    /// the listeners, and wait for the background tasks to finish.
    pub async fn shutdown(self) {
        info!("Relay shutting down");
        let _ = self.shutdown.send(true);
        self.broker.drain();
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Relay stopped");
    }
}

/// Bind all configured listeners and start the relay.
///
/// # Errors
///
/// Returns an error if any listener fails to bind: the relay either
/// starts whole or not at all.
pub async fn spawn(config: Config) -> Result<RelayHandle> {
    let config = Arc::new(config);
    let broker = Arc::new(Broker::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let mut ws_addr = None;
    if config.listeners.websocket {
        let transport = WebSocketTransport::new(WebSocketConfig {
            bind_addr: config.ws_addr()?,
            max_message_size: config.limits.max_message_size,
        })
        .await
        .context("Failed to bind WebSocket listener")?;
        ws_addr = transport.local_addr();
        tasks.push(tokio::spawn(accept_loop(
            Box::new(transport),
            Arc::clone(&broker),
            Arc::clone(&config),
            shutdown_rx.clone(),
        )));
    }

    let mut tcp_addr = None;
    if config.listeners.tcp {
        let transport = TcpTransport::new(TcpConfig {
            bind_addr: config.tcp_addr()?,
            max_message_size: config.limits.max_message_size,
        })
        .await
        .context("Failed to bind TCP listener")?;
        tcp_addr = transport.local_addr();
        tasks.push(tokio::spawn(accept_loop(
            Box::new(transport),
            Arc::clone(&broker),
            Arc::clone(&config),
            shutdown_rx.clone(),
        )));
    }

    let mut http_addr = None;
    if config.http.enabled {
        let listener = tokio::net::TcpListener::bind(config.http_addr()?)
            .await
            .context("Failed to bind HTTP API listener")?;
        http_addr = listener.local_addr().ok();
        info!("HTTP API listening on {}", listener.local_addr()?);

        let app = http::router(Arc::clone(&broker));
        let mut rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let shutdown = async move {
                let _ = rx.changed().await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("HTTP API server error: {}", e);
            }
        }));
    }

    tasks.push(tokio::spawn(sweep_loop(
        Arc::clone(&broker),
        config.keepalive.sweep_interval_ms,
        shutdown_rx,
    )));

    Ok(RelayHandle {
        broker,
        ws_addr,
        tcp_addr,
        http_addr,
        shutdown: shutdown_tx,
        tasks,
    })
}

/// Accept connections from one transport until shutdown.
async fn accept_loop(
    transport: Box<dyn Transport>,
    broker: Arc<Broker>,
    config: Arc<Config>,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = transport.name();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!(transport = name, "Listener shutting down");
                break;
            }
            accepted = transport.accept() => {
                match accepted {
                    Ok(mut conn) => {
                        if broker.session_count() >= config.limits.max_connections {
                            warn!(transport = name, "Connection limit reached, rejecting");
                            metrics::record_error("connection_limit");
                            let _ = conn.close().await;
                            continue;
                        }
                        tokio::spawn(handle_connection(
                            conn,
                            Arc::clone(&broker),
                            Arc::clone(&config),
                            name,
                        ));
                    }
                    Err(e) => {
                        warn!(transport = name, error = %e, "Accept failed");
                        metrics::record_error("accept");
                        // Avoid a tight loop on a persistent accept error
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }
    // Dropping the transport releases the listener socket
}

/// Close sessions whose keepalive deadline has elapsed.
async fn sweep_loop(broker: Arc<Broker>, interval_ms: u64, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let now = now_millis();
                for session_id in broker.expired_sessions(now) {
                    info!(session = %session_id, "Keepalive expired, closing session");
                    metrics::record_keepalive_expiry();
                    broker.remove_session(&session_id);
                }
            }
        }
    }
}

/// One session worker event.
enum Event {
    /// A frame from the session's outbound queue (fan-out delivery), or
    /// `None` once the broker has dropped the session.
    Outbound(Option<Frame>),
    /// The next inbound frame from the transport.
    Inbound(Result<Option<Frame>, TransportError>),
}

/// Drive one connection from handshake to cleanup.
async fn handle_connection(
    mut conn: Box<dyn Connection>,
    broker: Arc<Broker>,
    config: Arc<Config>,
    transport_name: &'static str,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let remote = conn.remote_addr().unwrap_or_else(|| "unknown".to_string());

    let (session_id, mut outbound) = match handshake(&mut conn, &broker, &config).await {
        Ok(registered) => registered,
        Err(e) => {
            debug!(transport = transport_name, remote = %remote, error = %e, "Handshake failed");
            metrics::record_error("handshake");
            let _ = conn.close().await;
            return;
        }
    };

    debug!(
        session = %session_id,
        transport = transport_name,
        remote = %remote,
        "Session connected"
    );

    loop {
        let event = tokio::select! {
            biased;

            frame = outbound.recv() => Event::Outbound(frame),
            inbound = conn.recv() => Event::Inbound(inbound),
        };

        match event {
            Event::Outbound(Some(frame)) => {
                let data = match codec::encode(&frame) {
                    Ok(data) => data,
                    Err(e) => {
                        error!(session = %session_id, error = %e, "Failed to encode delivery");
                        continue;
                    }
                };
                metrics::record_message(data.len(), "outbound");
                let write_timeout = Duration::from_millis(config.limits.write_timeout_ms);
                match tokio::time::timeout(write_timeout, conn.send_raw(data)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(session = %session_id, error = %e, "Delivery write failed");
                        break;
                    }
                    Err(_) => {
                        warn!(session = %session_id, "Delivery write timed out, dropping slow subscriber");
                        break;
                    }
                }
            }
            Event::Outbound(None) => {
                // The broker dropped us: keepalive expiry or shutdown
                debug!(session = %session_id, "Session closed by relay");
                break;
            }
            Event::Inbound(Ok(Some(frame))) => {
                broker.touch(&session_id);
                match dispatch(&mut conn, &broker, &session_id, frame).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        debug!(session = %session_id, error = %e, "Response write failed");
                        break;
                    }
                }
            }
            Event::Inbound(Ok(None)) => {
                debug!(session = %session_id, "Client closed connection");
                break;
            }
            Event::Inbound(Err(e)) => {
                warn!(session = %session_id, error = %e, "Transport error");
                metrics::record_error(transport_name);
                break;
            }
        }
    }

    broker.remove_session(&session_id);
    let _ = conn.close().await;
    metrics::set_active_topics(broker.registry_stats().topic_count);
    debug!(session = %session_id, "Session closed");
}

/// Perform the Connect/Connected handshake and register the session.
///
/// Returns the session ID and the receiving end of its outbound queue.
/// The only long-lived handle stays in the broker's session table, so
/// the sweep and shutdown paths can close the queue.
async fn handshake(
    conn: &mut Box<dyn Connection>,
    broker: &Arc<Broker>,
    config: &Arc<Config>,
) -> Result<(String, mpsc::UnboundedReceiver<Frame>)> {
    let timeout = Duration::from_millis(config.keepalive.handshake_timeout_ms);
    let first = tokio::time::timeout(timeout, conn.recv())
        .await
        .context("Timed out waiting for connect frame")?;

    let frame = match first {
        Ok(Some(frame)) => frame,
        Ok(None) => bail!("Connection closed before handshake"),
        Err(e) => return Err(e).context("Transport error during handshake"),
    };

    let (version, client_id, keepalive_secs) = match frame {
        Frame::Connect {
            version,
            client_id,
            keepalive_secs,
        } => (version, client_id, keepalive_secs),
        other => {
            let _ = conn
                .send(Frame::error(
                    0,
                    code::HANDSHAKE_REQUIRED,
                    "Expected connect frame",
                ))
                .await;
            bail!("First frame was {:?}, not Connect", other.frame_type());
        }
    };

    if !Version::accepts_major(version) {
        let _ = conn
            .send(Frame::error(
                0,
                code::UNSUPPORTED_VERSION,
                format!("Unsupported protocol version {}", version),
            ))
            .await;
        bail!("Unsupported protocol version {}", version);
    }

    let keepalive_secs = keepalive_secs.min(config.keepalive.max_secs);
    let window_ms = u64::from(keepalive_secs) * KEEPALIVE_GRACE_MS_PER_SEC;

    let (handle, outbound) = broker.register(client_id, window_ms);
    let session_id = handle.session_id().to_string();

    if let Err(e) = conn.send(Frame::connected(&session_id, keepalive_secs)).await {
        broker.remove_session(&session_id);
        return Err(e).context("Failed to send connected frame");
    }

    Ok((session_id, outbound))
}

/// Handle one inbound frame on a connected session.
///
/// Returns `Ok(true)` to keep the session alive, `Ok(false)` to close
/// it, or an error if a response could not be written.
async fn dispatch(
    conn: &mut Box<dyn Connection>,
    broker: &Arc<Broker>,
    session_id: &str,
    frame: Frame,
) -> Result<bool, TransportError> {
    match frame {
        Frame::Subscribe { id, topic } => {
            if let Err(reason) = validate_topic_name(&topic) {
                conn.send(Frame::error(id, code::INVALID_TOPIC, reason)).await?;
                return Ok(false);
            }

            debug!(session = %session_id, topic = %topic, "Subscribe request");
            broker.subscribe(session_id, &topic);
            metrics::record_subscription();
            metrics::set_active_topics(broker.registry_stats().topic_count);
            conn.send(Frame::ack(id)).await?;
            Ok(true)
        }

        Frame::Unsubscribe { id, topic } => {
            debug!(session = %session_id, topic = %topic, "Unsubscribe request");
            broker.unsubscribe(session_id, &topic);
            metrics::set_active_topics(broker.registry_stats().topic_count);
            conn.send(Frame::ack(id)).await?;
            Ok(true)
        }

        Frame::Publish {
            topic,
            payload,
            retain,
        } => {
            if let Err(reason) = validate_topic_name(&topic) {
                conn.send(Frame::error(0, code::INVALID_TOPIC, reason)).await?;
                return Ok(false);
            }

            metrics::record_message(payload.len(), "inbound");
            let message = Message::new(topic, payload)
                .with_source(session_id)
                .with_retain(retain);
            broker.publish(message);
            Ok(true)
        }

        Frame::Ping => {
            conn.send(Frame::Pong).await?;
            Ok(true)
        }

        Frame::Pong => Ok(true),

        Frame::Disconnect => {
            debug!(session = %session_id, "Disconnect request");
            Ok(false)
        }

        Frame::Connect { .. } => {
            conn.send(Frame::error(0, code::ALREADY_CONNECTED, "Already connected"))
                .await?;
            Ok(true)
        }

        other => {
            warn!(session = %session_id, frame_type = ?other.frame_type(), "Unexpected frame type");
            Ok(true)
        }
    }
}
