//! `GET /api/chatbot/stop` — request that a conversation stop streaming.

use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::ApiError;
use crate::auth::resolve_principal;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StopParams {
    pub thread_id: Option<String>,
}

/// Signal that a conversation should stop streaming and cancel in-flight
/// tools. The streaming loop observes the state at its next probe.
pub async fn stop(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(params): Query<StopParams>,
) -> Result<Json<Value>, ApiError> {
    resolve_principal(&state.settings, &headers).await?;

    let thread_id = params.thread_id.filter(|t| !t.is_empty()).ok_or_else(|| {
        ApiError::unprocessable(
            "Thread ID is missing. Please provide a thread_id in the query parameters.",
        )
    })?;

    let found = state.registry.request_stop(&thread_id);
    tracing::debug!(thread_id, found, "stop requested");

    if found {
        Ok(Json(json!({ "ok": true, "body": "Conversation stopped." })))
    } else {
        Ok(Json(json!({
            "ok": true,
            "body": "Conversation with given thread-id was never registered.",
        })))
    }
}
