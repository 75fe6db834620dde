//! Route handlers.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::CacheStats;
use crate::mention::MentionEvent;
use crate::orchestrator::{MentionOrchestrator, MentionResponse};
use crate::quota::UserQuota;

/// Shared application state.
pub struct AppState {
    pub orchestrator: MentionOrchestrator,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    cache: CacheStats,
}

/// Build the router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/mention", post(process_mention))
        .route("/api/quota/:user_id", get(get_quota))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Mention gate listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn process_mention(
    State(state): State<Arc<AppState>>,
    Json(event): Json<MentionEvent>,
) -> Json<MentionResponse> {
    Json(state.orchestrator.process_mention(&event).await)
}

async fn get_quota(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<UserQuota>, (StatusCode, String)> {
    state
        .orchestrator
        .context()
        .quota
        .get_or_create(&user_id)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        cache: state.orchestrator.context().cache.stats().await,
    })
}
