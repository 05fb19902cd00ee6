//! Chat-completion message model (OpenAI wire format).
//!
//! Every message sent to the completion proxy is one of these. The shape
//! matches the `/v1/chat/completions` contract: tool-call messages carry
//! `content: null` plus a `tool_calls` array, tool results carry
//! `tool_call_id`, and image content uses typed content parts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message in the completion prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `None` serializes as `content: null` (required for tool-call messages).
    #[serde(default)]
    pub content: Option<ChatContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Either a plain string or a list of typed content parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

/// One entry of an assistant message's `tool_calls` array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

/// The function a tool call invokes; `arguments` is a JSON string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

// ── Convenience constructors ───────────────────────────────────────

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            name: None,
            content: Some(ChatContent::Text(text.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// A system message with a `name`, used when rendering meta variants.
    /// Non-string content is JSON-encoded.
    pub fn system_named(name: impl Into<String>, content: &Value) -> Self {
        let text = match content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            role: Role::System,
            name: Some(name.into()),
            content: Some(ChatContent::Text(text)),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            name: None,
            content: Some(ChatContent::Text(text.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            name: Some(name.into()),
            content: Some(ChatContent::Text(text.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// An assistant message carrying a single tool call and no content.
    pub fn tool_call(
        assistant_name: impl Into<String>,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            name: Some(assistant_name.into()),
            content: None,
            tool_calls: Some(vec![ToolCallSpec {
                id: call_id.into(),
                kind: "function".into(),
                function: FunctionCall {
                    name: tool_name.into(),
                    arguments: arguments.into(),
                },
            }]),
            tool_call_id: None,
        }
    }

    /// A tool-role result message answering a previous tool call.
    pub fn tool_result(
        tool_name: impl Into<String>,
        call_id: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            name: Some(tool_name.into()),
            content: Some(ChatContent::Text(output.into())),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }

    /// A user message carrying one inline image as a data URL.
    pub fn image_user(b64: &str, mime: &str) -> Self {
        Self {
            role: Role::User,
            name: None,
            content: Some(ChatContent::Parts(vec![ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{mime};base64,{b64}"),
                },
            }])),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}
