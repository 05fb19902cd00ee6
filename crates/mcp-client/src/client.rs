//! Streamable-HTTP MCP client.
//!
//! Speaks JSON-RPC 2.0 to a single tool-server endpoint that answers with a
//! streamed media type carrying one `data:` frame with the JSON body.
//!
//! - `initialize` captures the server-assigned `Mcp-Session-Id` header
//!   (case-insensitive) and echoes it, with `Mcp-Protocol-Version`, on every
//!   subsequent request.
//! - Tool calls fall back across method-name variants
//!   `tools/call` → `tools.call` → `tools.invoke` when the server answers
//!   with JSON-RPC `-32602` ("invalid params").

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::protocol::{self, JsonRpcError, JsonRpcRequest, INVALID_PARAMS};

/// Session sentinel for servers that never assign one.
pub const NO_SESSION_ID: &str = "no-session-id";

/// Method-name variants tried in order on `-32602`.
const CALL_METHODS: [&str; 3] = ["tools/call", "tools.call", "tools.invoke"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error taxonomy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// All method-name fallbacks answered `-32602`.
    #[error("invalid params after all method fallbacks: {0}")]
    InvalidParams(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Malformed framing or an unmapped JSON-RPC error.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Network-level failure.
    #[error("transport: {0}")]
    Transport(String),

    #[error("tool server not configured: {0}")]
    ServerNotFound(String),
}

/// What to do with a JSON-RPC error during the method fallback loop.
enum FallbackDecision {
    TryNextMethod,
    Fail(McpError),
}

fn classify_rpc_error(
    status: reqwest::StatusCode,
    code: i64,
    message: &str,
) -> FallbackDecision {
    if code == INVALID_PARAMS {
        return FallbackDecision::TryNextMethod;
    }
    if status == reqwest::StatusCode::UNAUTHORIZED
        || status == reqwest::StatusCode::FORBIDDEN
        || message.contains("Unauthorized")
    {
        return FallbackDecision::Fail(McpError::Unauthorized(message.to_string()));
    }
    if status == reqwest::StatusCode::BAD_REQUEST {
        return FallbackDecision::Fail(McpError::BadRequest(message.to_string()));
    }
    FallbackDecision::Fail(McpError::Protocol(format!("MCP error {code}: {message}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE frame parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse a streamed-HTTP response body: the last `data: ` line carries the
/// JSON payload. Bodies without any `data:` prefix are parsed whole.
pub(crate) fn parse_sse_text(body: &str) -> Result<Value, McpError> {
    let data_line = body
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .last();

    match data_line {
        Some(data) => serde_json::from_str(data).map_err(|_| {
            McpError::Protocol(format!(
                "failed to parse SSE data payload: {}",
                truncate(data, 200)
            ))
        }),
        None => serde_json::from_str(body).map_err(|_| {
            McpError::Protocol(format!(
                "missing SSE 'data:' line and body is not JSON: {}",
                truncate(body, 200)
            ))
        }),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One HTTP JSON-RPC client per tool server.
pub struct McpClient {
    base_url: String,
    default_headers: HashMap<String, String>,
    session_id: Mutex<Option<String>>,
    http: reqwest::Client,
}

impl McpClient {
    pub fn new(
        base_url: &str,
        default_headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| McpError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            default_headers,
            session_id: Mutex::new(None),
            http,
        })
    }

    /// The cached session id, if the server assigned one.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    /// Drop the cached session. Subsequent calls run without session
    /// affinity until the next `initialize`.
    pub fn close(&self) {
        *self.session_id.lock() = None;
    }

    fn headers(&self, extra: Option<&HashMap<String, String>>) -> Vec<(String, String)> {
        let mut h: Vec<(String, String)> = vec![
            ("Content-Type".into(), "application/json".into()),
            // Dual accept is required by streamable-HTTP servers.
            ("Accept".into(), "application/json, text/event-stream".into()),
        ];
        for (k, v) in &self.default_headers {
            h.push((k.clone(), v.clone()));
        }
        if let Some(sid) = self.session_id.lock().as_ref() {
            h.push(("Mcp-Session-Id".into(), sid.clone()));
            h.push(("Mcp-Protocol-Version".into(), protocol::PROTOCOL_VERSION.into()));
        }
        if let Some(extra) = extra {
            for (k, v) in extra {
                h.push((k.clone(), v.clone()));
            }
        }
        h
    }

    async fn post_rpc(
        &self,
        request: &JsonRpcRequest,
        extra_headers: Option<&HashMap<String, String>>,
    ) -> Result<reqwest::Response, McpError> {
        let mut builder = self.http.post(&self.base_url).json(request);
        for (k, v) in self.headers(extra_headers) {
            builder = builder.header(k, v);
        }
        builder
            .send()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))
    }

    // ── initialize ─────────────────────────────────────────────────

    /// Perform JSON-RPC `initialize` and capture `Mcp-Session-Id` from the
    /// response headers. Returns the session id (cached on the client), or
    /// [`NO_SESSION_ID`] when the server does not assign one.
    pub async fn initialize(
        &self,
        client_name: &str,
        client_version: &str,
        extra_headers: Option<&HashMap<String, String>>,
    ) -> Result<String, McpError> {
        let params = serde_json::to_value(protocol::initialize_params(
            client_name,
            client_version,
        ))
        .map_err(|e| McpError::Protocol(e.to_string()))?;
        let request = JsonRpcRequest::new(1, "initialize", Some(params));

        let resp = self.post_rpc(&request, extra_headers).await?;

        // Header lookup is case-insensitive in reqwest's HeaderMap.
        if let Some(sid) = resp
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock() = Some(sid.to_string());
        }

        let body = resp
            .text()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;
        let obj = parse_sse_text(&body)?;

        if let Some(err) = obj.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Err(McpError::BadRequest(format!(
                "initialize failed: {message} ({err})"
            )));
        }

        Ok(self
            .session_id
            .lock()
            .clone()
            .unwrap_or_else(|| NO_SESSION_ID.into()))
    }

    // ── tools/list ─────────────────────────────────────────────────

    /// Ask the server for its tool descriptors; returns the raw JSON-RPC
    /// `result` value.
    pub async fn tools_list(
        &self,
        extra_headers: Option<&HashMap<String, String>>,
    ) -> Result<Value, McpError> {
        let rid = short_request_id();
        let request = JsonRpcRequest::new(rid, "tools/list", None);
        let resp = self.post_rpc(&request, extra_headers).await?;
        let body = resp
            .text()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;
        let obj = parse_sse_text(&body)?;

        if let Some(err) = obj.get("error") {
            return Err(McpError::Protocol(format!("tools/list failed: {err}")));
        }
        Ok(obj.get("result").cloned().unwrap_or(Value::Null))
    }

    // ── tools/call with method fallback ────────────────────────────

    /// Call a tool, falling back across method-name variants on `-32602`.
    /// Returns the JSON-RPC `result` value.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: &Value,
        extra_headers: Option<&HashMap<String, String>>,
    ) -> Result<Value, McpError> {
        let rid = short_request_id();
        let mut last_err = String::new();

        for method in CALL_METHODS {
            let request = JsonRpcRequest::new(
                rid.clone(),
                method,
                Some(serde_json::json!({ "name": name, "arguments": arguments })),
            );

            let resp = self.post_rpc(&request, extra_headers).await?;
            let status = resp.status();
            let body = resp
                .text()
                .await
                .map_err(|e| McpError::Transport(e.to_string()))?;
            let obj = parse_sse_text(&body)?;

            let Some(err_value) = obj.get("error") else {
                return Ok(obj.get("result").cloned().unwrap_or(Value::Null));
            };

            let err: JsonRpcError = serde_json::from_value(err_value.clone())
                .map_err(|e| McpError::Protocol(format!("malformed error object: {e}")))?;
            last_err = err.to_string();

            match classify_rpc_error(status, err.code, &err.message) {
                FallbackDecision::TryNextMethod => {
                    tracing::debug!(
                        method,
                        tool = name,
                        "method rejected with -32602, trying next variant"
                    );
                    continue;
                }
                FallbackDecision::Fail(e) => return Err(e),
            }
        }

        Err(McpError::InvalidParams(format!(
            "all method variants failed with -32602; last error: {last_err}"
        )))
    }
}

fn short_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
