//! `GET /api/chatbot/streamresponse` — the streaming turn endpoint.
//!
//! Frames the orchestrator's stream variants onto an NDJSON response, one
//! JSON object per line. `Image` payloads are split into ≤16 KiB fragments
//! carrying the same id. Between yields, a 3-second probe checks for an
//! out-of-band stop request.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use fg_domain::variant::{to_wire, StreamVariant};

use crate::api::ApiError;
use crate::auth::{self, resolve_principal};
use crate::prompting;
use crate::runtime::{
    prepare_for_stream, run_stream, ConversationState, PrepareError, StreamRequest,
};
use crate::state::AppState;

/// Interval between out-of-band stop checks.
const CHECK_INTERVAL: Duration = Duration::from_secs(3);
/// Maximum bytes of image payload per NDJSON line.
const IMAGE_FRAGMENT_SIZE: usize = 16 * 1024;

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub thread_id: Option<String>,
    pub input: Option<String>,
    pub chatbot: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// NDJSON framing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn line(value: &Value) -> Bytes {
    Bytes::from(format!("{value}\n"))
}

/// Split a string into chunks of at most `size` bytes on char boundaries.
fn chunk_str(s: &str, size: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < s.len() {
        let mut end = (start + size).min(s.len());
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        chunks.push(&s[start..end]);
        start = end;
    }
    chunks
}

/// One wire event as NDJSON lines; images are fragmented.
pub(crate) fn ndjson_frames(wire: &Value) -> Vec<Bytes> {
    if wire.get("variant").and_then(Value::as_str) != Some("Image") {
        return vec![line(wire)];
    }

    let content = wire.get("content").and_then(Value::as_str).unwrap_or_default();
    let id = wire.get("id").and_then(Value::as_str).unwrap_or_default();

    if content.is_empty() {
        return vec![line(&json!({ "variant": "Image", "content": "", "id": id }))];
    }

    chunk_str(content, IMAGE_FRAGMENT_SIZE)
        .into_iter()
        .map(|frag| line(&json!({ "variant": "Image", "content": frag, "id": id })))
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn stream_response(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(params): Query<StreamParams>,
) -> Result<Response, ApiError> {
    let principal = resolve_principal(&state.settings, &headers).await?;

    // Resolve or mint the thread id. An unknown existing id means the
    // conversation must be resumed from storage.
    let (thread_id, read_history) = match params.thread_id.filter(|t| !t.is_empty()) {
        None => (state.registry.new_thread_id(), false),
        Some(tid) => {
            let resume = !state.registry.contains(&tid);
            (tid, resume)
        }
    };

    let user_input = params
        .input
        .filter(|i| !i.is_empty())
        .ok_or_else(|| {
            ApiError::unprocessable(
                "Input not found. Please provide a non-empty input in the query parameters \
                 or the headers, of type String.",
            )
        })?;

    if principal.vault_url.is_none() {
        return Err(ApiError::unprocessable(
            "Vault URL not found. Please provide a non-empty vault URL in the headers, \
             of type String.",
        ));
    }

    let model = params
        .chatbot
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| state.settings.default_chatbot().to_string());

    let system_prompt = prompting::get_entire_prompt(&model);
    let prompt_snapshot = prompting::prompt_snapshot(&system_prompt);

    // Conversation-local tool manager with the caller's header bundles.
    auth::ensure_working_dir(&thread_id);
    let manager = state.build_tool_manager();
    manager
        .initialize(auth::mcp_headers(&state.settings, &principal, &thread_id))
        .await;

    let registry = state.registry.clone();
    let completions = state.completions.clone();
    let storage = state.storage.clone();
    let username = principal.username.clone();

    let body_stream = async_stream::stream! {
        let prepared = prepare_for_stream(
            &registry,
            &storage,
            Some(manager),
            &thread_id,
            &username,
            read_history,
            Some(prompt_snapshot),
        )
        .await;

        if let Err(e) = prepared {
            let message = match e {
                PrepareError::NotFound => format!("Thread not found: {thread_id}"),
                PrepareError::Failed(msg) => msg,
            };
            let err_v = StreamVariant::ServerError { message };
            let end_v = StreamVariant::StreamEnd {
                message: "Stream ended with an error.".into(),
            };
            for frame in ndjson_frames(&to_wire(&err_v)) {
                yield Ok::<_, Infallible>(frame);
            }
            for frame in ndjson_frames(&to_wire(&end_v)) {
                yield Ok::<_, Infallible>(frame);
            }
            return;
        }

        let mut rx = run_stream(
            registry.clone(),
            completions,
            storage.clone(),
            StreamRequest {
                model,
                thread_id: thread_id.clone(),
                user_input,
                system_prompt,
            },
        );

        let mut probe = tokio::time::interval(CHECK_INTERVAL);
        probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        probe.tick().await; // immediate first tick

        loop {
            tokio::select! {
                item = rx.recv() => match item {
                    Some(variant) => {
                        for frame in ndjson_frames(&to_wire(&variant)) {
                            yield Ok::<_, Infallible>(frame);
                        }
                    }
                    None => break,
                },
                _ = probe.tick() => {
                    if registry.state(&thread_id) == Some(ConversationState::Stopping) {
                        let end = StreamVariant::StreamEnd {
                            message: "Stream is stopped by user.".into(),
                        };
                        for frame in ndjson_frames(&to_wire(&end)) {
                            yield Ok::<_, Infallible>(frame);
                        }
                        registry.add(&thread_id, vec![end]);
                        registry.cancel_tool_tasks(&thread_id);
                        registry.end_and_save(&thread_id, &storage).await;
                        return;
                    }
                }
            }
        }

        registry.end_and_save(&thread_id, &storage).await;
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/x-ndjson"),
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(body_stream),
    )
        .into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_image_event_is_one_line() {
        let wire = json!({ "variant": "User", "content": "hi" });
        let frames = ndjson_frames(&wire);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].ends_with(b"\n"));
    }

    #[test]
    fn image_fragments_sum_to_original() {
        let payload = "A".repeat(40_000);
        let wire = json!({ "variant": "Image", "content": payload, "id": "c1_0" });
        let frames = ndjson_frames(&wire);
        assert_eq!(frames.len(), 3);

        let mut reassembled = String::new();
        for frame in &frames {
            let v: Value = serde_json::from_slice(frame).unwrap();
            assert_eq!(v["variant"], "Image");
            assert_eq!(v["id"], "c1_0");
            let frag = v["content"].as_str().unwrap();
            assert!(frag.len() <= IMAGE_FRAGMENT_SIZE);
            reassembled.push_str(frag);
        }
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn small_image_is_single_fragment() {
        let wire = json!({ "variant": "Image", "content": "QUJD", "id": "x" });
        assert_eq!(ndjson_frames(&wire).len(), 1);
    }

    #[test]
    fn empty_image_still_emits_a_line() {
        let wire = json!({ "variant": "Image", "content": "", "id": "x" });
        let frames = ndjson_frames(&wire);
        assert_eq!(frames.len(), 1);
        let v: Value = serde_json::from_slice(&frames[0]).unwrap();
        assert_eq!(v["content"], "");
    }

    #[test]
    fn chunking_respects_char_boundaries() {
        let s = "ä".repeat(10);
        let chunks = chunk_str(&s, 3);
        assert_eq!(chunks.concat(), s);
        assert!(chunks.iter().all(|c| c.len() <= 3));
    }
}
