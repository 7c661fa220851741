//! HTTP server for health checks, metrics and ad-hoc replica reads

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::DepthError;
use crate::metrics;
use crate::orderbook::{BookSnapshot, CupSnapshot};
use crate::replica::ReplicaSyncEngine;
use crate::symbol::{MarketSymbol, Segment};
use crate::AppState;

type ApiError = (StatusCode, String);

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_text))
        .route("/book/:segment/:symbol", get(order_book))
        .route("/cups/:segment/:symbol", get(cups))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start HTTP server for health checks and metrics
pub async fn serve(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "component": "market-depth",
        "replicas": state.registry.len().await,
        "resyncing": state.scheduler.resyncing(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics_text() -> Response {
    match metrics::render() {
        Ok(text) => text.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn order_book(
    State(state): State<Arc<AppState>>,
    Path((segment, symbol)): Path<(String, String)>,
) -> Result<Json<BookSnapshot>, ApiError> {
    let engine = resolve(&state, &segment, &symbol).await?;
    match engine.book_snapshot().await {
        Ok(book) => Ok(Json(book)),
        Err(e @ DepthError::NotInitialized(_)) => {
            Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn cups(
    State(state): State<Arc<AppState>>,
    Path((segment, symbol)): Path<(String, String)>,
) -> Result<Json<Vec<CupSnapshot>>, ApiError> {
    let engine = resolve(&state, &segment, &symbol).await?;
    Ok(Json(engine.cups().await))
}

async fn resolve(
    state: &AppState,
    segment: &str,
    symbol: &str,
) -> Result<Arc<ReplicaSyncEngine>, ApiError> {
    let segment: Segment = segment
        .parse()
        .map_err(|e: DepthError| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let symbol = MarketSymbol::new(symbol, segment);

    state
        .registry
        .get(&symbol)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("{} is not replicated", symbol)))
}
