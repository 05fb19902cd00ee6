//! Stream-variant event model.
//!
//! A conversation is an ordered sequence of [`StreamVariant`]s. This module
//! defines the variant set, the wire (JSON) form spoken to clients and
//! storage, the cleanup/normalization rules, and the conversion into
//! chat-completion messages for prompting.
//!
//! Wire shape: `{"variant": "<Tag>", "content": <payload>[, "id": "..."]}`.
//! `Code` and `CodeOutput` carry `content` as a two-element array
//! `[args_or_output, call_id]`; `ServerHint` carries its inner object as a
//! JSON-encoded *string* (frontend compatibility).

use serde_json::{json, Value};

use crate::chat::ChatMessage;
use crate::error::{Error, Result};

/// Assistant display name used on every assistant-authored message.
pub const ASSISTANT_NAME: &str = "frevaGPT";
/// Tool name of the code interpreter.
pub const TOOL_NAME_CODE: &str = "code_interpreter";

/// Terminal message appended when a stream did not close properly.
pub const UNEXPECTED_END: &str = "Stream ended in a very unexpected manner";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Variant set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One element of a conversation's typed event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamVariant {
    /// Initial system/examples prompt snapshot; `payload` is a JSON string
    /// of chat-completion messages.
    Prompt { payload: String },
    /// User-authored message.
    User { text: String },
    /// Assistant message or streamed fragment.
    Assistant { text: String, name: String },
    /// Tool call to the code interpreter; `call_id` correlates the output.
    Code { code: String, call_id: String },
    /// Result for a previous `Code` with the same `call_id`.
    CodeOutput { output: String, call_id: String },
    /// Base64-encoded rich output bound to a call id.
    Image { b64: String, mime: String, id: String },
    /// Generic output of a tool other than the code interpreter.
    ToolOutput {
        output: String,
        tool_name: String,
        id: String,
    },
    /// Out-of-band metadata (thread id announcement, heartbeat telemetry).
    ServerHint { data: Value },
    /// Server-side failure, non-fatal to the conversation.
    ServerError { message: String },
    /// LLM-side failure.
    OpenAiError { message: String },
    /// Tool-interpreter hard failure.
    CodeError { message: String },
    /// Terminal marker for a stream segment.
    StreamEnd { message: String },
}

/// Ordered sequence of stream variants.
pub type Conversation = Vec<StreamVariant>;

impl StreamVariant {
    /// Assistant fragment with the default display name.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            text: text.into(),
            name: ASSISTANT_NAME.into(),
        }
    }

    /// Image with the default PNG mime type.
    pub fn image(b64: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Image {
            b64: b64.into(),
            mime: "image/png".into(),
            id: id.into(),
        }
    }

    /// The wire tag of this variant.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Prompt { .. } => "Prompt",
            Self::User { .. } => "User",
            Self::Assistant { .. } => "Assistant",
            Self::Code { .. } => "Code",
            Self::CodeOutput { .. } => "CodeOutput",
            Self::Image { .. } => "Image",
            Self::ToolOutput { .. } => "ToolOutput",
            Self::ServerHint { .. } => "ServerHint",
            Self::ServerError { .. } => "ServerError",
            Self::OpenAiError { .. } => "OpenAIError",
            Self::CodeError { .. } => "CodeError",
            Self::StreamEnd { .. } => "StreamEnd",
        }
    }

    /// Meta variants are dropped from prompts unless explicitly included.
    pub fn is_meta(&self) -> bool {
        matches!(
            self,
            Self::ServerHint { .. }
                | Self::ServerError { .. }
                | Self::OpenAiError { .. }
                | Self::CodeError { .. }
                | Self::StreamEnd { .. }
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire conversion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn content_string(c: Option<&Value>) -> String {
    match c {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Extract code text from a `Code` content payload (object, JSON string, or
/// raw string).
fn code_text(payload: &Value) -> String {
    let from_obj = |obj: &serde_json::Map<String, Value>| {
        ["code", "python", "text"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str).map(String::from))
    };
    match payload {
        Value::Object(obj) => from_obj(obj).unwrap_or_default(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(obj)) => from_obj(&obj).unwrap_or_else(|| s.clone()),
            _ => s.clone(),
        },
        other => other.to_string(),
    }
}

/// Parse a wire JSON object into a [`StreamVariant`].
///
/// Unknown extra fields (e.g. `feedback` annotations) are tolerated and
/// dropped.
pub fn from_wire(obj: &Value) -> Result<StreamVariant> {
    let variant = obj
        .get("variant")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Variant(format!("missing variant tag: {obj}")))?;
    let c = obj.get("content");

    let v = match variant {
        "Prompt" => StreamVariant::Prompt {
            payload: content_string(c),
        },
        "User" => StreamVariant::User {
            text: content_string(c),
        },
        "Assistant" => StreamVariant::assistant(content_string(c)),
        "ServerHint" => {
            let data = match c {
                Some(Value::String(s)) => serde_json::from_str(s)
                    .unwrap_or_else(|_| json!({ "raw": s })),
                Some(Value::Object(_)) => c.cloned().unwrap_or_else(|| json!({})),
                _ => json!({}),
            };
            StreamVariant::ServerHint { data }
        }
        "ServerError" => StreamVariant::ServerError {
            message: content_string(c),
        },
        "OpenAIError" => StreamVariant::OpenAiError {
            message: content_string(c),
        },
        "CodeError" => {
            // Written as a single-element array; accept a bare string too.
            let message = match c {
                Some(Value::Array(items)) => content_string(items.first()),
                other => content_string(other),
            };
            StreamVariant::CodeError { message }
        }
        "StreamEnd" => StreamVariant::StreamEnd {
            message: content_string(c),
        },
        "Image" => StreamVariant::image(
            content_string(c),
            obj.get("id").and_then(Value::as_str).unwrap_or_default(),
        ),
        "ToolOutput" => StreamVariant::ToolOutput {
            output: content_string(c),
            tool_name: obj
                .get("tool_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            id: obj.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
        },
        "Code" => match c {
            Some(Value::Array(items)) if items.len() >= 2 => StreamVariant::Code {
                code: code_text(&items[0]),
                call_id: content_string(items.get(1)),
            },
            Some(Value::Object(obj)) => StreamVariant::Code {
                code: obj.get("code").and_then(Value::as_str).unwrap_or_default().into(),
                call_id: obj.get("id").and_then(Value::as_str).unwrap_or_default().into(),
            },
            _ => return Err(Error::Variant(format!("unsupported Code content: {obj}"))),
        },
        "CodeOutput" => match c {
            Some(Value::Array(items)) if items.len() >= 2 => StreamVariant::CodeOutput {
                output: content_string(items.first()),
                call_id: content_string(items.get(1)),
            },
            Some(Value::Object(obj)) => StreamVariant::CodeOutput {
                output: obj
                    .get("output")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .into(),
                call_id: obj.get("id").and_then(Value::as_str).unwrap_or_default().into(),
            },
            _ => {
                return Err(Error::Variant(format!(
                    "unsupported CodeOutput content: {obj}"
                )))
            }
        },
        other => return Err(Error::Variant(format!("unsupported variant: {other}"))),
    };
    Ok(v)
}

/// Serialize a [`StreamVariant`] into its wire JSON object.
pub fn to_wire(v: &StreamVariant) -> Value {
    match v {
        StreamVariant::Prompt { payload } => json!({ "variant": "Prompt", "content": payload }),
        StreamVariant::User { text } => json!({ "variant": "User", "content": text }),
        StreamVariant::Assistant { text, .. } => {
            json!({ "variant": "Assistant", "content": text })
        }
        StreamVariant::Code { code, call_id } => json!({
            "variant": "Code",
            "content": [json!({ "code": code }).to_string(), call_id],
        }),
        StreamVariant::CodeOutput { output, call_id } => json!({
            "variant": "CodeOutput",
            "content": [output, call_id],
        }),
        StreamVariant::Image { b64, id, .. } => {
            json!({ "variant": "Image", "content": b64, "id": id })
        }
        StreamVariant::ToolOutput {
            output,
            tool_name,
            id,
        } => json!({
            "variant": "ToolOutput",
            "content": output,
            "tool_name": tool_name,
            "id": id,
        }),
        // The frontend expects the hint payload as a JSON-encoded string.
        StreamVariant::ServerHint { data } => {
            json!({ "variant": "ServerHint", "content": data.to_string() })
        }
        StreamVariant::ServerError { message } => {
            json!({ "variant": "ServerError", "content": message })
        }
        StreamVariant::OpenAiError { message } => {
            json!({ "variant": "OpenAIError", "content": message })
        }
        StreamVariant::CodeError { message } => {
            json!({ "variant": "CodeError", "content": [message] })
        }
        StreamVariant::StreamEnd { message } => {
            json!({ "variant": "StreamEnd", "content": message })
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation normalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Insert missing `CodeOutput`s after dangling `Code`s and, when requested,
/// ensure the conversation ends with a `StreamEnd`.
pub fn cleanup_conversation(conv: &[StreamVariant], append_stream_end: bool) -> Conversation {
    let mut out: Conversation = Vec::with_capacity(conv.len());
    let mut pending_code_id: Option<String> = None;

    for v in conv {
        // A Code with no output yet: if the next item is not a CodeOutput,
        // close it with an empty synthetic output first.
        if let Some(id) = pending_code_id.clone() {
            if !matches!(v, StreamVariant::CodeOutput { .. }) {
                out.push(StreamVariant::CodeOutput {
                    output: String::new(),
                    call_id: id,
                });
                pending_code_id = None;
            }
        }

        match v {
            StreamVariant::Code { call_id, .. } => {
                pending_code_id = Some(call_id.clone());
            }
            StreamVariant::CodeOutput { call_id, .. } => {
                if let Some(pending) = &pending_code_id {
                    if pending != call_id {
                        tracing::warn!(
                            output_id = %call_id,
                            pending_id = %pending,
                            "CodeOutput call_id does not match pending Code call_id"
                        );
                    }
                }
                pending_code_id = None;
            }
            _ => {}
        }

        out.push(v.clone());
    }

    // Close a dangling trailing Code.
    if let Some(id) = pending_code_id {
        out.push(StreamVariant::CodeOutput {
            output: String::new(),
            call_id: id,
        });
    }

    if append_stream_end && !matches!(out.last(), Some(StreamVariant::StreamEnd { .. })) {
        out.push(StreamVariant::StreamEnd {
            message: UNEXPECTED_END.into(),
        });
    }

    out
}

/// Prepare a conversation for conversion into chat messages: cleanup, then
/// optionally drop the meta variants.
pub fn normalize_for_prompt(conv: &[StreamVariant], include_meta: bool) -> Conversation {
    let cleaned = cleanup_conversation(conv, false);
    if include_meta {
        return cleaned;
    }
    cleaned.into_iter().filter(|v| !v.is_meta()).collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversion to chat-completion messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn extend_with_prompt_json(out: &mut Vec<ChatMessage>, payload: &str) {
    let data: Vec<Value> = match serde_json::from_str(payload) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            tracing::warn!("Prompt payload is not a list; skipping");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse Prompt JSON payload; skipping");
            return;
        }
    };

    for (i, item) in data.into_iter().enumerate() {
        match serde_json::from_value::<ChatMessage>(item) {
            Ok(msg) => out.push(msg),
            Err(e) => {
                tracing::warn!(index = i, error = %e, "skipping malformed prompt message");
            }
        }
    }
}

/// Convert a conversation to the ordered chat-completion message list.
///
/// `include_images` controls whether `Image` variants become user messages
/// with inline data URLs; `include_meta` controls whether hint/error/end
/// variants are rendered as named system messages.
pub fn to_chat_messages(
    conv: &[StreamVariant],
    include_images: bool,
    include_meta: bool,
) -> Vec<ChatMessage> {
    let normalized = normalize_for_prompt(conv, include_meta);
    let mut out: Vec<ChatMessage> = Vec::with_capacity(normalized.len());

    for v in &normalized {
        match v {
            StreamVariant::Prompt { payload } => extend_with_prompt_json(&mut out, payload),

            StreamVariant::User { text } => out.push(ChatMessage::user(text.clone())),

            StreamVariant::Assistant { text, name } => {
                out.push(ChatMessage::assistant(name.clone(), text.clone()))
            }

            StreamVariant::Code { code, call_id } => {
                let arguments = json!({ "code": code }).to_string();
                out.push(ChatMessage::tool_call(
                    ASSISTANT_NAME,
                    call_id.clone(),
                    TOOL_NAME_CODE,
                    arguments,
                ));
            }

            StreamVariant::CodeOutput { output, call_id } => out.push(ChatMessage::tool_result(
                TOOL_NAME_CODE,
                call_id.clone(),
                output.clone(),
            )),

            StreamVariant::Image { b64, mime, .. } => {
                if include_images {
                    out.push(ChatMessage::image_user(b64, mime));
                } else {
                    tracing::debug!("dropping Image variant in prompt (include_images=false)");
                }
            }

            StreamVariant::ToolOutput {
                output,
                tool_name,
                id,
            } => out.push(ChatMessage::tool_result(
                tool_name.clone(),
                id.clone(),
                output.clone(),
            )),

            StreamVariant::ServerHint { data } => {
                if include_meta {
                    out.push(ChatMessage::system_named("server_hint", data));
                }
            }
            StreamVariant::ServerError { message } => {
                if include_meta {
                    out.push(ChatMessage::system_named(
                        "server_error",
                        &Value::String(message.clone()),
                    ));
                }
            }
            StreamVariant::OpenAiError { message } => {
                if include_meta {
                    out.push(ChatMessage::system_named(
                        "openai_error",
                        &Value::String(message.clone()),
                    ));
                }
            }
            StreamVariant::CodeError { message } => {
                if include_meta {
                    out.push(ChatMessage::system_named(
                        "code_error",
                        &Value::String(message.clone()),
                    ));
                }
            }
            StreamVariant::StreamEnd { message } => {
                if include_meta {
                    out.push(ChatMessage::system_named(
                        "stream_end",
                        &Value::String(message.clone()),
                    ));
                }
            }
        }
    }

    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
