//! Axum-based HTTP gateway.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use scene_relay_core::session::SessionCode;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::fulfillment::{FulfillmentRequest, Intent, WebhookConversation};
use crate::state::GatewayState;

/// Build the gateway router.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/fulfillment", post(fulfillment_handler))
        .route("/codes/{code}", get(code_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state.config.gateway_bind();
    let app = build_router(state);

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn fulfillment_handler(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<FulfillmentRequest>,
) -> impl IntoResponse {
    let intent = request.intent;
    let mut conv = WebhookConversation::new(request);
    match intent {
        Intent::Welcome => state.fulfillment.welcome(&mut conv).await,
        Intent::Fallback => state.fulfillment.fallback(&mut conv),
    }

    match conv.into_response() {
        Some(response) => (StatusCode::OK, Json(json!(response))),
        None => {
            warn!(?intent, "Handler produced no response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "no response"})),
            )
        }
    }
}

/// Record lookup for the editor's "is this code live" check.
async fn code_handler(
    State(state): State<Arc<GatewayState>>,
    Path(code): Path<String>,
) -> impl IntoResponse {
    let Ok(code) = SessionCode::parse(&code) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid code"})));
    };
    match state.store.get(&code).await {
        Ok(Some(record)) => (
            StatusCode::OK,
            Json(json!({
                "code": record.code,
                "timestamp": record.timestamp,
                "linked": record.is_linked(),
                "published": record.published_html().is_some(),
            })),
        ),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"error": "unknown code"}))),
        Err(e) => {
            warn!(%e, "Record lookup failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "store unavailable"})),
            )
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(%e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
