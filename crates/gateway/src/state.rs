//! Shared application state passed to all API handlers.

use std::sync::Arc;
use std::time::Duration;

use fg_domain::Settings;
use fg_mcp_client::ToolManager;
use fg_providers::CompletionClient;
use fg_storage::ThreadStorage;

use crate::runtime::ConversationRegistry;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    /// Process-wide registry of active conversations.
    pub registry: Arc<ConversationRegistry>,
    /// Streaming-completion capability (LiteLLM proxy).
    pub completions: Arc<dyn CompletionClient>,
    /// Thread persistence (disk, or in-process in dev mode).
    pub storage: Arc<dyn ThreadStorage>,
}

impl AppState {
    /// Build a fresh tool manager for one conversation. Managers are
    /// conversation-local; sessions are never shared across threads.
    pub fn build_tool_manager(&self) -> Arc<ToolManager> {
        Arc::new(ToolManager::new(
            self.settings.available_mcp_servers.clone(),
            self.settings.mcp_server_urls.clone(),
            Duration::from_secs(self.settings.mcp_request_timeout_sec),
        ))
    }
}
