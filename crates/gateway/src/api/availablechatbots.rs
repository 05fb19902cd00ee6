//! `GET /api/chatbot/availablechatbots` — the model catalogue.

use axum::extract::State;
use axum::response::Json;

use crate::api::ApiError;
use crate::auth::resolve_principal;
use crate::state::AppState;

/// Ordered list of model names; the first entry is the default chatbot
/// used when a request names none.
pub async fn available_chatbots(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<Vec<String>>, ApiError> {
    resolve_principal(&state.settings, &headers).await?;
    Ok(Json(state.settings.available_chatbots.clone()))
}
