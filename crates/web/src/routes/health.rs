//! Health probe routes.

use axum::Json;
use serde_json::{Value, json};

/// Liveness probe.
///
/// GET /health
///
/// Returns "ok" if the server is running. Does not check dependencies.
pub async fn health() -> &'static str {
    "ok"
}

/// Readiness probe.
///
/// GET /ready
///
/// The backend holds no connections and no state worth warming; once
/// the config parses and the socket binds, it is ready.
pub async fn readiness() -> Json<Value> {
    Json(json!({ "status": "ready" }))
}
