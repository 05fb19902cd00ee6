//! LiteLLM proxy client (OpenAI-compatible `/v1/chat/completions`).
//!
//! Streamed responses are SSE with `data: {json}` lines and a `data: [DONE]`
//! terminator; the orchestrator consumes `choices[0].delta.{content,
//! tool_calls[]}` and `choices[0].finish_reason`. Decoding is line-based:
//! body chunks feed an [`SseDecoder`] that cuts complete lines, parses
//! `data:` payloads into delta events, and stops at the terminator.

use serde_json::Value;

use fg_domain::config::model_is_reasoning;
use fg_domain::error::{Error, Result};
use fg_domain::stream::{BoxStream, StreamEvent};

use crate::traits::{CompletionClient, CompletionRequest};
use crate::util::from_reqwest;

/// Client for an OpenAI-compatible completion proxy.
pub struct LiteLlmClient {
    base_url: String,
    /// Optional bearer token for proxies that require one.
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl LiteLlmClient {
    /// Create a client for the given proxy base URL.
    ///
    /// A bearer token is picked up from `OPENAI_API_KEY` or
    /// `LITELLM_API_KEY` when present; many LiteLLM setups do not need one.
    pub fn new(base_url: &str) -> Result<Self> {
        let auth_token = std::env::var("OPENAI_API_KEY")
            .or_else(|_| std::env::var("LITELLM_API_KEY"))
            .ok()
            .filter(|t| !t.is_empty());

        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .read_timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            client,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        if let Some(token) = &self.auth_token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder
    }

    fn build_body(req: &CompletionRequest, stream: bool) -> Value {
        let mut body = serde_json::json!({
            "model": req.model,
            "messages": req.messages,
            "stream": stream,
        });
        if let Some(temp) = req.temperature {
            // Reasoning models reject non-default sampling parameters.
            if model_is_reasoning(&req.model) {
                tracing::debug!(model = %req.model, "dropping temperature for reasoning model");
            } else {
                body["temperature"] = serde_json::json!(temp);
            }
        }
        if let Some(max) = req.max_tokens {
            let key = if model_is_reasoning(&req.model) {
                "max_completion_tokens"
            } else {
                "max_tokens"
            };
            body[key] = serde_json::json!(max);
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.clone());
            if let Some(choice) = &req.tool_choice {
                body["tool_choice"] = Value::String(choice.clone());
            }
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE decoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Incremental decoder for the proxy's completion framing.
///
/// Body chunks arrive with no alignment to SSE lines, so the decoder
/// buffers and cuts on `\n`: `data: {json}` payloads become delta events,
/// `data: [DONE]` terminates the stream, and every other line (event
/// names, ids, blank keep-alives) is dropped. The decoder guarantees
/// exactly one `Done` per stream, synthesizing it in [`SseDecoder::finish`]
/// when the proxy closed the body without a terminator.
#[derive(Default)]
struct SseDecoder {
    buffer: String,
    /// `data: [DONE]` was seen; no further body reads are needed.
    terminated: bool,
    done_emitted: bool,
}

impl SseDecoder {
    /// Feed one body chunk, returning the events completed by it.
    fn feed(&mut self, chunk: &str) -> Vec<Result<StreamEvent>> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();
        while !self.terminated {
            let Some(nl) = self.buffer.find('\n') else {
                break;
            };
            let line: String = self.buffer.drain(..=nl).collect();
            self.decode_line(&line, &mut events);
        }
        events
    }

    /// Whether the `[DONE]` terminator has been seen.
    fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Flush a trailing unterminated line after the body closed, then make
    /// sure a `Done` went out.
    fn finish(&mut self) -> Vec<Result<StreamEvent>> {
        let mut events = Vec::new();
        if !self.terminated && !self.buffer.is_empty() {
            let tail = std::mem::take(&mut self.buffer);
            self.decode_line(&tail, &mut events);
        }
        if !self.done_emitted {
            events.push(Ok(StreamEvent::Done {
                finish_reason: Some("stop".into()),
            }));
            self.done_emitted = true;
        }
        self.terminated = true;
        events
    }

    fn decode_line(&mut self, line: &str, events: &mut Vec<Result<StreamEvent>>) {
        let Some(payload) = line.trim().strip_prefix("data:").map(str::trim) else {
            return;
        };
        if payload.is_empty() {
            return;
        }

        if payload == "[DONE]" {
            self.terminated = true;
            if !self.done_emitted {
                events.push(Ok(StreamEvent::Done {
                    finish_reason: Some("stop".into()),
                }));
                self.done_emitted = true;
            }
            return;
        }

        for event in parse_chunk(payload) {
            if matches!(&event, Ok(StreamEvent::Done { .. })) {
                self.done_emitted = true;
            }
            events.push(event);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chunk parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse one `data:` JSON payload into stream events.
///
/// A single chunk can carry a text delta, several tool-call deltas, and a
/// finish reason; events are emitted in that order.
fn parse_chunk(data: &str) -> Vec<Result<StreamEvent>> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let choice = match v
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
    {
        Some(c) => c,
        // Usage-only or keep-alive chunks carry no choices.
        None => return Vec::new(),
    };

    let delta = choice.get("delta").unwrap_or(&Value::Null);
    let mut events = Vec::new();

    if let Some(text) = delta.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::Token {
                text: text.to_string(),
            }));
        }
    }

    if let Some(tc_arr) = delta.get("tool_calls").and_then(Value::as_array) {
        for tc in tc_arr {
            let index = tc.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
            let id = tc.get("id").and_then(Value::as_str).map(String::from);
            let function = tc.get("function").unwrap_or(&Value::Null);
            let name = function.get("name").and_then(Value::as_str).map(String::from);
            let arguments = function
                .get("arguments")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            events.push(Ok(StreamEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            }));
        }
    }

    if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
        events.push(Ok(StreamEvent::Done {
            finish_reason: Some(reason.to_string()),
        }));
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl CompletionClient for LiteLlmClient {
    async fn complete_stream(
        &self,
        req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = self.completions_url();
        let body = Self::build_body(req, true);

        tracing::debug!(model = %req.model, url = %url, "streaming completion request");

        let resp = self
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.unwrap_or_default();
            return Err(Error::Completion(format!(
                "HTTP {} - {}",
                status.as_u16(),
                err_text
            )));
        }

        Ok(Box::pin(async_stream::stream! {
            let mut response = resp;
            let mut decoder = SseDecoder::default();

            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        for event in decoder.feed(&String::from_utf8_lossy(&bytes)) {
                            yield event;
                        }
                        if decoder.is_terminated() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(from_reqwest(e));
                        return;
                    }
                }
            }

            for event in decoder.finish() {
                yield event;
            }
        }))
    }

    async fn complete_text(&self, req: &CompletionRequest) -> Result<String> {
        let url = self.completions_url();
        let body = Self::build_body(req, false);

        let resp = self
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Completion(format!(
                "HTTP {} - {}",
                status.as_u16(),
                text
            )));
        }

        let json: Value = serde_json::from_str(&text)?;
        Ok(json
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use fg_domain::chat::ChatMessage;

    fn one(events: Vec<Result<StreamEvent>>) -> StreamEvent {
        assert_eq!(events.len(), 1);
        events.into_iter().next().unwrap().unwrap()
    }

    // ── chunk parsing ──────────────────────────────────────────────

    #[test]
    fn parse_text_delta() {
        let ev = one(parse_chunk(
            r#"{"choices":[{"delta":{"content":"hello"}}]}"#,
        ));
        assert_eq!(ev, StreamEvent::Token { text: "hello".into() });
    }

    #[test]
    fn parse_empty_content_skipped() {
        assert!(parse_chunk(r#"{"choices":[{"delta":{"content":""}}]}"#).is_empty());
    }

    #[test]
    fn parse_tool_call_start() {
        let raw = r#"{"choices":[{"delta":{"tool_calls":[
            {"index":0,"id":"c1","function":{"name":"code_interpreter","arguments":""}}
        ]}}]}"#;
        let ev = one(parse_chunk(raw));
        assert_eq!(
            ev,
            StreamEvent::ToolCallDelta {
                index: 0,
                id: Some("c1".into()),
                name: Some("code_interpreter".into()),
                arguments: String::new(),
            }
        );
    }

    #[test]
    fn parse_tool_call_argument_delta() {
        let raw = r#"{"choices":[{"delta":{"tool_calls":[
            {"index":0,"function":{"arguments":"{\"co"}}
        ]}}]}"#;
        let ev = one(parse_chunk(raw));
        assert_eq!(
            ev,
            StreamEvent::ToolCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments: "{\"co".into(),
            }
        );
    }

    #[test]
    fn parse_finish_reason() {
        let ev = one(parse_chunk(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#));
        assert_eq!(
            ev,
            StreamEvent::Done {
                finish_reason: Some("tool_calls".into())
            }
        );
    }

    #[test]
    fn parse_content_and_finish_in_one_chunk() {
        let events =
            parse_chunk(r#"{"choices":[{"delta":{"content":"bye"},"finish_reason":"stop"}]}"#);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &StreamEvent::Token { text: "bye".into() }
        );
        assert!(matches!(
            events[1].as_ref().unwrap(),
            StreamEvent::Done { .. }
        ));
    }

    #[test]
    fn parse_usage_only_chunk_ignored() {
        assert!(parse_chunk(r#"{"usage":{"total_tokens":5}}"#).is_empty());
    }

    #[test]
    fn parse_garbage_is_error() {
        let events = parse_chunk("not json");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_err());
    }

    // ── decoder ────────────────────────────────────────────────────

    #[test]
    fn decoder_yields_event_per_data_line() {
        let mut dec = SseDecoder::default();
        let events =
            dec.feed("data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n");
        assert_eq!(one(events), StreamEvent::Token { text: "hi".into() });
        assert!(!dec.is_terminated());
    }

    #[test]
    fn decoder_skips_non_data_lines() {
        let mut dec = SseDecoder::default();
        let events = dec.feed("event: message\nid: 3\nretry: 5000\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn decoder_terminates_on_done_sentinel() {
        let mut dec = SseDecoder::default();
        let events = dec.feed("data: [DONE]\ndata: {\"ignored\":true}\n");
        assert_eq!(
            one(events),
            StreamEvent::Done {
                finish_reason: Some("stop".into())
            }
        );
        assert!(dec.is_terminated());
        // Everything after the terminator is dropped.
        assert!(dec.feed("data: {\"choices\":[]}\n").is_empty());
    }

    #[test]
    fn decoder_buffers_lines_split_across_chunks() {
        let mut dec = SseDecoder::default();
        assert!(dec.feed("data: {\"choices\":[{\"delta\":{\"cont").is_empty());
        let events = dec.feed("ent\":\"hi\"}}]}\n");
        assert_eq!(one(events), StreamEvent::Token { text: "hi".into() });
    }

    #[test]
    fn finish_flushes_unterminated_tail() {
        let mut dec = SseDecoder::default();
        assert!(dec
            .feed("data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}")
            .is_empty());
        let events = dec.finish();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &StreamEvent::Token { text: "hi".into() }
        );
        assert!(matches!(
            events[1].as_ref().unwrap(),
            StreamEvent::Done { .. }
        ));
    }

    #[test]
    fn finish_synthesizes_missing_done() {
        let mut dec = SseDecoder::default();
        dec.feed("data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n");
        let events = dec.finish();
        assert!(matches!(
            &events[..],
            [Ok(StreamEvent::Done { .. })]
        ));
    }

    #[test]
    fn exactly_one_done_when_finish_reason_precedes_sentinel() {
        let mut dec = SseDecoder::default();
        let mut events =
            dec.feed("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\ndata: [DONE]\n");
        events.extend(dec.finish());
        let dones = events
            .iter()
            .filter(|e| matches!(e, Ok(StreamEvent::Done { .. })))
            .count();
        assert_eq!(dones, 1);
    }

    // ── request body ───────────────────────────────────────────────

    #[test]
    fn body_includes_tools_and_choice() {
        let req = CompletionRequest::new("gpt-4o-mini", vec![ChatMessage::user("hi")]).with_tools(
            vec![serde_json::json!({
                "type": "function",
                "function": { "name": "code_interpreter" }
            })],
        );
        let body = LiteLlmClient::build_body(&req, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["function"]["name"], "code_interpreter");
    }

    #[test]
    fn body_omits_tools_when_empty() {
        let req = CompletionRequest::new("gpt-4o-mini", vec![ChatMessage::user("hi")]);
        let body = LiteLlmClient::build_body(&req, false);
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn body_keeps_sampling_params_for_chat_models() {
        let mut req = CompletionRequest::new("gpt-4o-mini", vec![ChatMessage::user("hi")]);
        req.temperature = Some(0.2);
        req.max_tokens = Some(50);
        let body = LiteLlmClient::build_body(&req, false);
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["max_tokens"], 50);
        assert!(body.get("max_completion_tokens").is_none());
    }

    #[test]
    fn body_adapts_params_for_reasoning_models() {
        let mut req = CompletionRequest::new("o3-mini", vec![ChatMessage::user("hi")]);
        req.temperature = Some(0.2);
        req.max_tokens = Some(50);
        let body = LiteLlmClient::build_body(&req, false);
        assert!(body.get("temperature").is_none());
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["max_completion_tokens"], 50);
    }
}
