//! `GET /api/chatbot/getuserthreads` — page through a user's threads.

use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{require_vault_url, ApiError};
use crate::auth::resolve_principal;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UserThreadsParams {
    pub num_threads: usize,
}

/// Returns `[[thread, ...], total_count]`.
pub async fn get_user_threads(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(params): Query<UserThreadsParams>,
) -> Result<Json<Value>, ApiError> {
    let principal = resolve_principal(&state.settings, &headers).await?;
    if principal.username.is_empty() {
        return Err(ApiError::unprocessable("Missing user_id (auth)."));
    }
    require_vault_url(&principal)?;

    let (threads, total) = state
        .storage
        .list_recent_threads(&principal.username, params.num_threads)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to list threads: {e}")))?;

    tracing::info!(
        user_id = %principal.username,
        thread_count = threads.len(),
        requested = params.num_threads,
        "fetched recent threads"
    );

    Ok(Json(json!([threads, total])))
}
