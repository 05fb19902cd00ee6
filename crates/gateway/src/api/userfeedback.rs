//! `GET /api/chatbot/userfeedback` — record or remove feedback on one
//! event of a thread.

use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{require_vault_url, ApiError};
use crate::auth::resolve_principal;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedbackParams {
    pub thread_id: String,
    pub feedback_at_index: usize,
    pub feedback: String,
}

pub async fn user_feedback(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(params): Query<FeedbackParams>,
) -> Result<Json<Value>, ApiError> {
    let principal = resolve_principal(&state.settings, &headers).await?;

    if params.thread_id.is_empty() {
        return Err(ApiError::unprocessable(
            "Thread ID not found. Please provide thread_id in the query parameters.",
        ));
    }
    require_vault_url(&principal)?;

    let content = state
        .storage
        .read_thread(&params.thread_id)
        .await
        .map_err(|e| match e {
            fg_storage::StorageError::NotFound(_) => ApiError::not_found("Thread not found"),
            other => ApiError::internal(format!("Error reading thread file: {other}")),
        })?;

    if params.feedback_at_index >= content.len() {
        return Err(ApiError::unprocessable(
            "feedback_at_index outside content range! Please review query parameters!",
        ));
    }

    if params.feedback == "remove" {
        let has_feedback = content[params.feedback_at_index].get("feedback").is_some();
        if !has_feedback {
            return Err(ApiError::not_found(format!(
                "Feedback not found at index {}: {}",
                params.feedback_at_index, params.thread_id
            )));
        }
    }

    let saved = state
        .storage
        .save_feedback(
            &params.thread_id,
            &principal.username,
            params.feedback_at_index,
            &params.feedback,
        )
        .await
        .map_err(|e| ApiError::internal(format!("Failed to save user feedback: {e}")))?;

    if !saved {
        return Err(ApiError::internal(format!(
            "Failed to save user feedback: {}",
            params.thread_id
        )));
    }

    let body = if params.feedback == "remove" {
        "Successfully removed user feedback."
    } else {
        "Successfully saved user feedback."
    };
    Ok(Json(json!({ "ok": true, "body": body })))
}
