//! Health endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// Basic health check
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "bima",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Liveness: the process is up
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness: the database answers
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match sqlx::query("SELECT 1").execute(&state.db_pool).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "database": "ok" }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "database": e.to_string() })),
        ),
    }
}
