//! HTTP API for the brume relay.
//!
//! A small axum surface beside the relay listeners:
//!
//! - `GET /health` - liveness probe
//! - `GET /stats` - registry and session counters
//! - `POST /publish` - external-event push: publish a stored reading (or
//!   any other collaborator event) onto a topic
//!
//! The relay has no callback path into storage or auth; `/publish` is the
//! only direction events flow in.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use brume_core::{validate_topic_name, Broker};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Build the HTTP API router.
pub fn router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/publish", post(publish_handler))
        .with_state(broker)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Stats handler.
async fn stats_handler(State(broker): State<Arc<Broker>>) -> impl IntoResponse {
    let registry = broker.registry_stats();
    Json(serde_json::json!({
        "sessions": broker.session_count(),
        "topics": registry.topic_count,
        "subscriptions": registry.total_subscriptions,
    }))
}

/// Body of an external publish request.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    /// Target topic.
    pub topic: String,
    /// Payload, delivered as UTF-8 bytes.
    pub payload: String,
    /// Retain flag.
    #[serde(default)]
    pub retain: bool,
}

/// External publish handler.
async fn publish_handler(
    State(broker): State<Arc<Broker>>,
    Json(request): Json<PublishRequest>,
) -> impl IntoResponse {
    if let Err(reason) = validate_topic_name(&request.topic) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": reason })),
        );
    }

    let delivered = broker.publish_external(
        request.topic.clone(),
        request.payload.into_bytes(),
        request.retain,
    );

    debug!(topic = %request.topic, recipients = delivered, "External publish");

    (
        StatusCode::OK,
        Json(serde_json::json!({ "delivered": delivered })),
    )
}
