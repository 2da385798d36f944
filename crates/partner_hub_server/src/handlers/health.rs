//! GET /health - liveness check, no auth.

use axum::Json;
use serde_json::{json, Value};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "partner_hub" }))
}
