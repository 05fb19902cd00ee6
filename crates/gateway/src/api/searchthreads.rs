//! `GET /api/chatbot/searchthreads` — full-text thread search.
//!
//! `prefix:content` queries search within one variant kind (see
//! `fg_storage::search`); plain queries match topics.

use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use fg_storage::search::{parse_query_mode, QueryMode};

use crate::api::{require_vault_url, ApiError};
use crate::auth::resolve_principal;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub num_threads: usize,
    /// Accepted for frontend compatibility; pagination happens client-side.
    #[serde(default)]
    pub page: Option<usize>,
    pub query: String,
}

/// Returns `[[thread, ...], total_matches]`.
pub async fn search_threads(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    let principal = resolve_principal(&state.settings, &headers).await?;
    if principal.username.is_empty() {
        return Err(ApiError::unprocessable("Missing user_id (auth)."));
    }
    require_vault_url(&principal)?;
    if params.query.is_empty() {
        return Err(ApiError::unprocessable("Missing query parameter."));
    }
    let _ = params.page;

    let result = match parse_query_mode(&params.query) {
        QueryMode::Variant { variant, content } => {
            state
                .storage
                .query_by_variant(&principal.username, variant, &content, params.num_threads)
                .await
        }
        QueryMode::Topic(query) => {
            state
                .storage
                .query_by_topic(&principal.username, &query, params.num_threads)
                .await
        }
    };

    let (total, threads) =
        result.map_err(|e| ApiError::internal(format!("Failed to query threads: {e}")))?;

    Ok(Json(json!([threads, total])))
}
