use axum::{
    body::Bytes as AxumBytes,
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::handler::{Bridge, HandleError};

/// Initialize tracing subscriber.
/// Uses RUST_LOG env var for filtering (defaults to info).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(true))
        .with(filter)
        .init();
}

pub fn build_router(bridge: Arc<Bridge>) -> Router {
    Router::new()
        .route("/post", post(handle_post))
        .route("/get", get(handle_get))
        .route("/health", get(|| async { "ok" }))
        .with_state(bridge)
}

async fn handle_post(
    State(bridge): State<Arc<Bridge>>,
    body: AxumBytes,
) -> Result<StatusCode, (StatusCode, String)> {
    bridge
        .ingest(body)
        .map(|_| StatusCode::OK)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

async fn handle_get(
    State(bridge): State<Arc<Bridge>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match bridge.fetch_latest().await {
        // The cached bytes are served verbatim; they were valid JSON when
        // ingested.
        Ok(bytes) => Ok(([(header::CONTENT_TYPE, "application/json")], bytes)),
        Err(e @ HandleError::NotFound) => Err((StatusCode::NOT_FOUND, e.to_string())),
        Err(e) => Err((StatusCode::BAD_REQUEST, e.to_string())),
    }
}
