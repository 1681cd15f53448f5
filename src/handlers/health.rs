use crate::{db, handlers::AppState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::time::Instant;

/// Component health status
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub version: &'static str,
    pub timestamp: String,
    pub database: ComponentStatus,
    pub payments_configured: bool,
    pub response_time_ms: u128,
}

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(readiness_check))
        .route("/live", get(liveness_check))
}

/// Liveness probe: the process is serving requests
async fn liveness_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "up",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness probe: the database answers
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();
    let database = match db::check_connection(&state.db).await {
        Ok(()) => ComponentStatus::Up,
        Err(e) => {
            tracing::warn!("Health check database probe failed: {}", e);
            ComponentStatus::Down
        }
    };

    let body = HealthResponse {
        status: database,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        database,
        payments_configured: state.config.stripe_secret_key.is_some(),
        response_time_ms: start.elapsed().as_millis(),
    };

    let code = if database == ComponentStatus::Up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}
