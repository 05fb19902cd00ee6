//! Tool manager — one conversation's directory of tool-server clients.
//!
//! Holds one lazily-created [`McpClient`] per configured server, discovers
//! tools on `initialize`, exports a cached OpenAI function-tool catalogue,
//! and routes `call_tool` by server name with best-effort fallback.
//!
//! A manager is owned by exactly one `ActiveConversation`; clients (and
//! their session ids) are never shared between conversations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::client::{McpClient, McpError};

const CLIENT_NAME: &str = "frevagpt-backend";

/// A discovered tool, normalized from `tools/list`.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Convert a descriptor into the OpenAI function-tool schema handed to the
/// completion proxy.
fn to_openai_function(tool: &ToolDescriptor) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

/// Normalize one raw `tools/list` entry. Accepts `tool_name` as a name
/// alias and `parameters` as a schema alias.
fn normalize_tool(raw: &Value) -> Option<ToolDescriptor> {
    let name = raw
        .get("name")
        .or_else(|| raw.get("tool_name"))
        .and_then(Value::as_str)?
        .to_string();
    if name.is_empty() {
        return None;
    }
    let description = raw
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let input_schema = raw
        .get("inputSchema")
        .or_else(|| raw.get("input_schema"))
        .or_else(|| raw.get("parameters"))
        .cloned()
        .unwrap_or_else(|| serde_json::json!({ "type": "object", "properties": {} }));
    Some(ToolDescriptor {
        name,
        description,
        input_schema,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolManager {
    servers: Vec<String>,
    server_urls: HashMap<String, String>,
    /// Per-server default header bundles (auth, working-dir, ...).
    default_headers: Mutex<HashMap<String, HashMap<String, String>>>,
    clients: Mutex<HashMap<String, Arc<McpClient>>>,
    tools_by_server: Mutex<HashMap<String, Vec<ToolDescriptor>>>,
    /// Merged OpenAI tool schemas; `None` invalidates the cache.
    catalogue: Mutex<Option<Vec<Value>>>,
    timeout: Duration,
}

impl ToolManager {
    pub fn new(
        servers: Vec<String>,
        server_urls: HashMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Self {
            servers,
            server_urls,
            default_headers: Mutex::new(HashMap::new()),
            clients: Mutex::new(HashMap::new()),
            tools_by_server: Mutex::new(HashMap::new()),
            catalogue: Mutex::new(None),
            timeout,
        }
    }

    pub fn server_names(&self) -> &[String] {
        &self.servers
    }

    /// Get or lazily create the client for a server.
    fn client(&self, server: &str) -> Result<Arc<McpClient>, McpError> {
        if let Some(client) = self.clients.lock().get(server) {
            return Ok(client.clone());
        }

        let url = self
            .server_urls
            .get(server)
            .ok_or_else(|| McpError::ServerNotFound(server.to_string()))?;
        let headers = self
            .default_headers
            .lock()
            .get(server)
            .cloned()
            .unwrap_or_default();

        let client = Arc::new(McpClient::new(url, headers, self.timeout)?);
        self.clients
            .lock()
            .insert(server.to_string(), client.clone());
        Ok(client)
    }

    // ── initialization / discovery ─────────────────────────────────

    /// Connect to every configured server, establish sessions and discover
    /// tools so the LLM can be given the function schemas before the first
    /// token. Per-server failures are logged and skipped. Idempotent.
    pub async fn initialize(&self, headers: HashMap<String, HashMap<String, String>>) {
        {
            let mut defaults = self.default_headers.lock();
            for (server, bundle) in headers {
                defaults.entry(server).or_default().extend(bundle);
            }
        }

        for server in self.servers.clone() {
            let client = match self.client(&server) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(server = %server, error = %e, "cannot create MCP client");
                    continue;
                }
            };

            if let Err(e) = client
                .initialize(CLIENT_NAME, env!("CARGO_PKG_VERSION"), None)
                .await
            {
                tracing::warn!(server = %server, error = %e, "MCP initialize failed");
                continue;
            }

            match client.tools_list(None).await {
                Ok(result) => {
                    let raw_tools = result
                        .get("tools")
                        .or_else(|| result.get("items"))
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    let tools: Vec<ToolDescriptor> =
                        raw_tools.iter().filter_map(normalize_tool).collect();
                    if tools.is_empty() {
                        tracing::warn!(server = %server, "no tools discovered");
                    }
                    self.tools_by_server.lock().insert(server.clone(), tools);
                    *self.catalogue.lock() = None;
                }
                Err(e) => {
                    tracing::warn!(server = %server, error = %e, "MCP tool discovery failed");
                }
            }
        }

        let total: usize = self.tools_by_server.lock().values().map(Vec::len).sum();
        tracing::info!(
            servers = self.servers.len(),
            tools = total,
            "tool manager initialized"
        );
    }

    /// Insert discovered tools directly (used by tests and dev stubs).
    pub fn set_tools(&self, server: &str, tools: Vec<ToolDescriptor>) {
        self.tools_by_server.lock().insert(server.to_string(), tools);
        *self.catalogue.lock() = None;
    }

    // ── tool export to the LLM ─────────────────────────────────────

    /// Cached OpenAI function-tool schemas for all discovered tools; empty
    /// when discovery failed everywhere.
    pub fn tool_catalogue(&self) -> Vec<Value> {
        let mut cache = self.catalogue.lock();
        if cache.is_none() {
            let tools = self.tools_by_server.lock();
            let merged: Vec<Value> = self
                .servers
                .iter()
                .filter_map(|s| tools.get(s))
                .flatten()
                .map(to_openai_function)
                .collect();
            *cache = Some(merged);
        }
        cache.clone().unwrap_or_default()
    }

    /// Which server owns a tool name, if any.
    pub fn server_for_tool(&self, tool_name: &str) -> Option<String> {
        let tools = self.tools_by_server.lock();
        for server in &self.servers {
            if let Some(list) = tools.get(server) {
                if list.iter().any(|t| t.name == tool_name) {
                    return Some(server.clone());
                }
            }
        }
        None
    }

    // ── calling tools ──────────────────────────────────────────────

    /// Call a tool. A known `server_hint` routes directly; otherwise every
    /// configured server is tried best-effort in order.
    pub async fn call_tool(
        &self,
        server_hint: Option<&str>,
        name: &str,
        arguments: &Value,
        extra_headers: Option<&HashMap<String, String>>,
    ) -> Result<Value, McpError> {
        if let Some(server) = server_hint {
            if self.servers.iter().any(|s| s == server) {
                let client = self.client(server)?;
                return client.call_tool(name, arguments, extra_headers).await;
            }
        }

        for server in &self.servers {
            let client = match self.client(server) {
                Ok(c) => c,
                Err(e) => {
                    tracing::debug!(server = %server, error = %e, "skipping server");
                    continue;
                }
            };
            match client.call_tool(name, arguments, extra_headers).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    tracing::debug!(tool = name, server = %server, error = %e, "tool call failed");
                }
            }
        }

        Err(McpError::Protocol(format!(
            "tool invocation failed on all servers: {name}"
        )))
    }

    /// Drop all clients and their sessions.
    pub fn close(&self) {
        let mut clients = self.clients.lock();
        for client in clients.values() {
            client.close();
        }
        clients.clear();
        self.tools_by_server.lock().clear();
        *self.catalogue.lock() = None;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_tools() -> ToolManager {
        let mgr = ToolManager::new(
            vec!["code".into(), "rag".into()],
            HashMap::from([
                ("code".to_string(), "http://code:8051/mcp".to_string()),
                ("rag".to_string(), "http://rag:8050/mcp".to_string()),
            ]),
            Duration::from_secs(30),
        );
        mgr.set_tools(
            "code",
            vec![ToolDescriptor {
                name: "code_interpreter".into(),
                description: "Run python".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "code": { "type": "string" } }
                }),
            }],
        );
        mgr.set_tools(
            "rag",
            vec![ToolDescriptor {
                name: "retrieve".into(),
                description: "Search documents".into(),
                input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            }],
        );
        mgr
    }

    #[test]
    fn catalogue_merges_in_server_order() {
        let mgr = manager_with_tools();
        let cat = mgr.tool_catalogue();
        assert_eq!(cat.len(), 2);
        assert_eq!(cat[0]["type"], "function");
        assert_eq!(cat[0]["function"]["name"], "code_interpreter");
        assert_eq!(cat[1]["function"]["name"], "retrieve");
        assert!(cat[0]["function"]["parameters"]["properties"]["code"].is_object());
    }

    #[test]
    fn reverse_index_routes_by_tool_name() {
        let mgr = manager_with_tools();
        assert_eq!(mgr.server_for_tool("code_interpreter").as_deref(), Some("code"));
        assert_eq!(mgr.server_for_tool("retrieve").as_deref(), Some("rag"));
        assert!(mgr.server_for_tool("unknown").is_none());
    }

    #[test]
    fn normalize_tool_accepts_aliases() {
        let raw = serde_json::json!({
            "tool_name": "x",
            "parameters": { "type": "object" }
        });
        let t = normalize_tool(&raw).unwrap();
        assert_eq!(t.name, "x");
        assert_eq!(t.input_schema["type"], "object");
    }

    #[test]
    fn normalize_tool_defaults_schema() {
        let t = normalize_tool(&serde_json::json!({ "name": "ping" })).unwrap();
        assert_eq!(t.input_schema["type"], "object");
        assert_eq!(t.description, "");
    }

    #[test]
    fn normalize_tool_rejects_unnamed() {
        assert!(normalize_tool(&serde_json::json!({ "description": "?" })).is_none());
    }

    #[test]
    fn close_clears_state() {
        let mgr = manager_with_tools();
        assert!(!mgr.tool_catalogue().is_empty());
        mgr.close();
        assert!(mgr.tool_catalogue().is_empty());
        assert!(mgr.server_for_tool("code_interpreter").is_none());
    }

    #[test]
    fn unknown_server_is_error() {
        let mgr = ToolManager::new(vec!["code".into()], HashMap::new(), Duration::from_secs(5));
        assert!(matches!(
            mgr.client("code"),
            Err(McpError::ServerNotFound(_))
        ));
    }
}
