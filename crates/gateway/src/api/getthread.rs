//! `GET /api/chatbot/getthread` — return a thread's events for the client.
//!
//! `Prompt` variants are stripped, and every `StreamEnd` except a final
//! regular one is elided ("unexpected manner" markers are dropped anywhere).

use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::Value;

use fg_domain::variant::{to_wire, StreamVariant};

use crate::api::{require_vault_url, ApiError};
use crate::auth::resolve_principal;
use crate::runtime::{prepare_for_stream, PrepareError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GetThreadParams {
    pub thread_id: Option<String>,
}

/// Strip prompts and surplus terminal markers before returning a thread.
pub(crate) fn post_process(events: &[StreamVariant]) -> Vec<Value> {
    let items: Vec<&StreamVariant> = events
        .iter()
        .filter(|v| !matches!(v, StreamVariant::Prompt { .. }))
        .collect();

    let mut cleaned = Vec::with_capacity(items.len());
    for (i, v) in items.iter().enumerate() {
        if let StreamVariant::StreamEnd { message } = v {
            let is_last = i == items.len() - 1;
            let unexpected = message.to_lowercase().contains("unexpected manner");
            if !is_last || unexpected {
                continue;
            }
        }
        cleaned.push(to_wire(v));
    }
    cleaned
}

pub async fn get_thread(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(params): Query<GetThreadParams>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let principal = resolve_principal(&state.settings, &headers).await?;

    let thread_id = params.thread_id.filter(|t| !t.is_empty()).ok_or_else(|| {
        ApiError::unprocessable(
            "Thread ID not found. Please provide thread_id in the query parameters.",
        )
    })?;
    require_vault_url(&principal)?;

    // Resume from storage unless the conversation is already live.
    let read_history = !state.registry.contains(&thread_id);
    let manager = state.build_tool_manager();
    match prepare_for_stream(
        &state.registry,
        &state.storage,
        Some(manager),
        &thread_id,
        &principal.username,
        read_history,
        None,
    )
    .await
    {
        Ok(()) => {}
        Err(PrepareError::NotFound) => {
            return Err(ApiError::not_found("Thread not found."));
        }
        Err(PrepareError::Failed(msg)) => {
            return Err(ApiError::internal(format!("Error reading thread file: {msg}")));
        }
    }

    let content = state
        .registry
        .messages(&thread_id)
        .ok_or_else(|| ApiError::not_found("Thread not found."))?;

    tracing::info!(thread_id, user_id = %principal.username, "fetched thread content");
    Ok(Json(post_process(&content)))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use fg_domain::variant::UNEXPECTED_END;

    fn end(msg: &str) -> StreamVariant {
        StreamVariant::StreamEnd {
            message: msg.into(),
        }
    }

    #[test]
    fn prompts_are_stripped() {
        let events = vec![
            StreamVariant::Prompt {
                payload: "[]".into(),
            },
            StreamVariant::User { text: "hi".into() },
        ];
        let out = post_process(&events);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["variant"], "User");
    }

    #[test]
    fn final_stream_end_is_kept() {
        let events = vec![StreamVariant::User { text: "hi".into() }, end("Stream ended.")];
        let out = post_process(&events);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1]["variant"], "StreamEnd");
    }

    #[test]
    fn non_final_stream_ends_are_elided() {
        let events = vec![
            StreamVariant::User { text: "a".into() },
            end("Stream ended."),
            StreamVariant::User { text: "b".into() },
            end("Stream ended."),
        ];
        let out = post_process(&events);
        assert_eq!(out.len(), 3);
        assert_eq!(out.last().unwrap()["variant"], "StreamEnd");
    }

    #[test]
    fn unexpected_manner_is_dropped_even_at_the_end() {
        let events = vec![
            StreamVariant::User { text: "a".into() },
            end(UNEXPECTED_END),
        ];
        let out = post_process(&events);
        assert_eq!(out.len(), 1);
    }
}
