use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{Value, json};

use crate::server::AppState;

/// Liveness check.
///
/// Returns `{"status":"pong"}` without touching the database, so it stays
/// green while the database is down.
///
/// # Route
/// - **Method**: GET
/// - **Path**: `/ping`
///
/// # Examples
/// ```bash
/// curl http://localhost:3000/ping
/// # Response: {"status":"pong"}
/// ```
pub async fn ping() -> Json<Value> {
    Json(json!({ "status": "pong" }))
}

/// Readiness check.
///
/// Runs `SELECT 1` on a pooled connection and reports the pool's size.
///
/// # Route
/// - **Method**: GET
/// - **Path**: `/health`
///
/// # Response Format
/// ```json
/// {
///   "status": "ok",
///   "database": { "connected": true, "pool": { "max_size": 20, "size": 3, "idle": 2, "waiting": 0 } }
/// }
/// ```
///
/// # HTTP Status Codes
/// - **200 OK**: database reachable
/// - **503 Service Unavailable**: no pool, or the check query failed
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let Some(db) = state.db.as_ref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "database": { "connected": false } })),
        );
    };

    match db.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "database": { "connected": true, "pool": db.stats() }
            })),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "database": { "connected": false, "error": e.to_string(), "pool": db.stats() }
                })),
            )
        }
    }
}
