//! The completion capability the orchestrator depends on.

use serde_json::Value;

use fg_domain::chat::ChatMessage;
use fg_domain::error::Result;
use fg_domain::stream::{BoxStream, StreamEvent};

/// A chat-completion request (OpenAI-compatible contract).
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Function-tool schemas from the tool manager's catalogue.
    pub tools: Vec<Value>,
    /// `"auto"` when tools are present; omitted otherwise.
    pub tool_choice: Option<String>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    /// Attach the tool catalogue with `tool_choice: auto` (no-op when empty).
    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        if !tools.is_empty() {
            self.tools = tools;
            self.tool_choice = Some("auto".into());
        }
        self
    }
}

/// Narrow streaming-completion capability of the LLM proxy.
#[async_trait::async_trait]
pub trait CompletionClient: Send + Sync {
    /// Issue a streaming completion; the stream yields parsed delta events
    /// and ends with a `Done` event.
    async fn complete_stream(
        &self,
        req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// Issue a non-streaming completion and return the first choice's text.
    /// Used by topic summarization.
    async fn complete_text(&self, req: &CompletionRequest) -> Result<String>;
}
