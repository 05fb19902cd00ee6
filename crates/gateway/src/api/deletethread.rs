//! `GET /api/chatbot/deletethread` — remove a thread from storage.

use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{require_vault_url, ApiError};
use crate::auth::resolve_principal;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DeleteThreadParams {
    pub thread_id: String,
}

pub async fn delete_thread(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(params): Query<DeleteThreadParams>,
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
        .delete_thread(&params.thread_id)
        .await
        .unwrap_or(false);

    if ok {
        tracing::info!(thread_id = %params.thread_id, user_id = %principal.username, "deleted thread");
        Ok(Json(json!({
            "ok": true,
            "body": "Successfully removed thread from history.",
        })))
    } else {
        tracing::warn!(thread_id = %params.thread_id, "failed to delete thread");
        Ok(Json(json!({
            "ok": false,
            "body": format!("Failed to remove thread from storage: {}", params.thread_id),
        })))
    }
}
