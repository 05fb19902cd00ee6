//! `GET /api/chatbot/setthreadtopic` — set a user-chosen thread topic.

use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{require_vault_url, ApiError};
use crate::auth::resolve_principal;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetTopicParams {
    pub thread_id: String,
    pub topic: String,
}

pub async fn set_thread_topic(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(params): Query<SetTopicParams>,
) -> Result<Json<Value>, ApiError> {
    let principal = resolve_principal(&state.settings, &headers).await?;

    if params.thread_id.is_empty() {
        return Err(ApiError::unprocessable(
            "Thread ID not found. Please provide thread_id in the query parameters.",
        ));
    }
    require_vault_url(&principal)?;

    let ok = state
        .storage
        .update_thread_topic(&params.thread_id, &params.topic)
        .await
        .unwrap_or(false);

    if ok {
        tracing::info!(thread_id = %params.thread_id, user_id = %principal.username, "updated thread topic");
        Ok(Json(json!({ "ok": true, "body": "Successfully updated thread topic." })))
    } else {
        tracing::warn!(thread_id = %params.thread_id, "failed to update thread topic");
        Ok(Json(json!({
            "ok": false,
            "body": format!("Failed to update thread topic: {}", params.thread_id),
        })))
    }
}
