//! `GET /api/chatbot/editthread` — branch a thread at an index.
//!
//! Creates a new thread whose history is the source thread truncated just
//! before `fork_from_index` (the edited user message and everything after
//! it are dropped).

use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use fg_domain::variant::from_wire;

use crate::api::{require_vault_url, ApiError};
use crate::auth::resolve_principal;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EditThreadParams {
    pub source_thread_id: String,
    pub fork_from_index: usize,
}

pub async fn edit_thread(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(params): Query<EditThreadParams>,
) -> Result<Json<Value>, ApiError> {
    let principal = resolve_principal(&state.settings, &headers).await?;
    require_vault_url(&principal)?;

    let orig = state
        .storage
        .read_thread(&params.source_thread_id)
        .await
        .map_err(|e| match e {
            fg_storage::StorageError::NotFound(_) => ApiError::not_found("Thread not found"),
            other => ApiError::internal(format!("Error reading thread file: {other}")),
        })?;

    if params.fork_from_index >= orig.len() {
        return Err(ApiError::unprocessable(
            "fork_from_index outside content range! Please review query parameters!",
        ));
    }

    let base_json = &orig[..params.fork_from_index];
    let base: Vec<_> = base_json
        .iter()
        .filter_map(|obj| match from_wire(obj) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed event while forking");
                None
            }
        })
        .collect();

    let new_id = state.registry.new_thread_id();
    state
        .storage
        .save_thread(&new_id, &principal.username, &base, false)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to save forked thread: {e}")))?;

    tracing::info!(
        source = %params.source_thread_id,
        new_thread_id = %new_id,
        fork_from_index = params.fork_from_index,
        "forked thread"
    );

    Ok(Json(json!({
        "new_thread_id": new_id,
        "history": base_json,
    })))
}
