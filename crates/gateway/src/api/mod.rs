//! HTTP boundary: routes under `/api/chatbot` plus the shared error shape.

pub mod availablechatbots;
pub mod deletethread;
pub mod editthread;
pub mod getthread;
pub mod getuserthreads;
pub mod heartbeat;
pub mod searchthreads;
pub mod setthreadtopic;
pub mod stop;
pub mod streamresponse;
pub mod userfeedback;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// API error answered as `{"detail": "..."}` with the mapped status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn unprocessable(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, detail)
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }

    pub fn bad_gateway(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, detail)
    }

    pub fn service_unavailable(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "detail": self.detail })),
        )
            .into_response()
    }
}

/// Missing-vault-URL guard shared by the storage-backed endpoints.
pub(crate) fn require_vault_url(principal: &crate::auth::Principal) -> Result<(), ApiError> {
    if principal.vault_url.is_none() {
        return Err(ApiError::service_unavailable(
            "Vault URL not found. Please provide a non-empty vault URL in the headers, \
             of type String.",
        ));
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the chatbot API router.
pub fn router() -> Router<AppState> {
    let chatbot = Router::new()
        .route("/streamresponse", get(streamresponse::stream_response))
        .route("/stop", get(stop::stop))
        .route("/getthread", get(getthread::get_thread))
        .route("/getuserthreads", get(getuserthreads::get_user_threads))
        .route("/deletethread", get(deletethread::delete_thread))
        .route("/setthreadtopic", get(setthreadtopic::set_thread_topic))
        .route("/searchthreads", get(searchthreads::search_threads))
        .route("/editthread", get(editthread::edit_thread))
        .route("/userfeedback", get(userfeedback::user_feedback))
        .route(
            "/availablechatbots",
            get(availablechatbots::available_chatbots),
        )
        .route("/heartbeat", get(heartbeat::heartbeat));

    Router::new()
        .nest("/api/chatbot", chatbot)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
