//! `GET /api/chatbot/heartbeat` — liveness probe.

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::api::ApiError;
use crate::auth::resolve_principal;
use crate::state::AppState;

pub async fn heartbeat(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<Value>, ApiError> {
    resolve_principal(&state.settings, &headers).await?;
    let telemetry = crate::heartbeat::telemetry(&state.registry, None);
    Ok(Json(json!({ "ok": true, "telemetry": telemetry })))
}
