//! Tool-result parsing (JSON-RPC result → stream variants + follow-up
//! chat messages).
//!
//! The orchestrator hands the raw result string of a tool invocation to
//! [`parse_tool_result`]; the returned block is streamed to the client,
//! appended to the conversation history, and its chat messages are fed back
//! to the model.

use serde_json::Value;

use fg_domain::chat::ChatMessage;
use fg_domain::variant::{to_chat_messages, StreamVariant, TOOL_NAME_CODE};

/// Parsed outcome of one tool invocation.
#[derive(Debug, Default)]
pub struct ToolResultBlock {
    /// Variants to stream to the client and append to history, in order.
    pub variants: Vec<StreamVariant>,
    /// Chat messages the model receives as the tool result.
    pub messages: Vec<ChatMessage>,
    pub is_error: bool,
}

/// Dispatch on the tool name.
pub fn parse_tool_result(raw: &str, tool_name: &str, call_id: &str) -> ToolResultBlock {
    match tool_name {
        TOOL_NAME_CODE => parse_code_interpreter_result(raw, call_id),
        "web_search" => parse_web_search_result(raw, call_id),
        other => {
            tracing::warn!(tool = other, "no output parser for tool");
            ToolResultBlock {
                is_error: true,
                ..Default::default()
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// code_interpreter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn str_field<'a>(obj: &'a Value, key: &str) -> &'a str {
    obj.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Parse a code-interpreter result.
///
/// Structured results carry `{stdout, stderr, result_repr, display_data,
/// error}`; output composes stdout and the result repr, error text is
/// appended after. An empty output is still emitted — the model expects a
/// tool result for every call.
fn parse_code_interpreter_result(raw: &str, call_id: &str) -> ToolResultBlock {
    let mut block = ToolResultBlock::default();

    let result_json: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable code-interpreter result");
            let v = StreamVariant::CodeOutput {
                output: format!("Code-Server: unparseable result: {raw}"),
                call_id: call_id.to_string(),
            };
            block.messages = to_chat_messages(&[v.clone()], false, false);
            block.variants.push(v);
            block.is_error = true;
            return block;
        }
    };

    let Some(result) = result_json.get("structuredContent") else {
        // Fallback: plain error or a bare text content.
        let output = if let Some(err) = result_json.get("error") {
            let msg = match err {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("Code-Server: {msg}")
        } else {
            result_json
                .get("content")
                .map(|c| str_field(c, "text"))
                .filter(|t| !t.is_empty())
                .unwrap_or("Unknown code interpreter response.")
                .to_string()
        };
        let v = StreamVariant::CodeOutput {
            output,
            call_id: call_id.to_string(),
        };
        block.messages = to_chat_messages(&[v.clone()], false, false);
        block.variants.push(v);
        block.is_error = true;
        return block;
    };

    let stdout = str_field(result, "stdout");
    let stderr = str_field(result, "stderr");
    let result_repr = str_field(result, "result_repr");
    let error = str_field(result, "error");

    let mut out = String::new();
    if !stdout.is_empty() {
        out.push('\n');
        out.push_str(stdout);
    }
    if !result_repr.is_empty() {
        out.push('\n');
        out.push_str(result_repr);
    }
    let mut out_error = String::new();
    if !stderr.is_empty() {
        out_error.push('\n');
        out_error.push_str(stderr);
    }
    if !error.is_empty() {
        out_error.push('\n');
        out_error.push_str(error);
    }

    let codeout = StreamVariant::CodeOutput {
        output: format!("{out}{out_error}"),
        call_id: call_id.to_string(),
    };
    block
        .messages
        .extend(to_chat_messages(&[codeout.clone()], false, false));
    block.variants.push(codeout);

    // Rich display data: inline images and JSON payloads.
    let display_data = result
        .get("display_data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for (i, item) in display_data.iter().enumerate() {
        if let Some(b64) = item.get("image/png").and_then(Value::as_str) {
            let image = StreamVariant::image(b64, format!("{call_id}_{i}"));
            block.messages.extend(to_chat_messages(
                &[
                    StreamVariant::User {
                        text: "Here is the image returned by the Code Interpreter.".into(),
                    },
                    image.clone(),
                ],
                true,
                false,
            ));
            block.variants.push(image);
        }

        if let Some(json_payload) = item.get("application/json") {
            let output = match json_payload {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let json_v = StreamVariant::CodeOutput {
                output,
                call_id: format!("{call_id}:json"),
            };
            block
                .messages
                .extend(to_chat_messages(&[json_v.clone()], false, false));
            block.variants.push(json_v);
        }
    }

    block.is_error = !out_error.is_empty();
    block
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// web_search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_web_search_result(raw: &str, call_id: &str) -> ToolResultBlock {
    let mut block = ToolResultBlock::default();

    let result_json: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => Value::Null,
    };

    let variant = if let Some(result) = result_json.get("structuredContent") {
        let output = match result.get("result") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        StreamVariant::ToolOutput {
            output,
            tool_name: "web-search".into(),
            id: call_id.to_string(),
        }
    } else {
        block.is_error = true;
        let message = if let Some(err) = result_json.get("error") {
            let msg = match err {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("Web-Search-Server: {msg}")
        } else {
            let text = result_json
                .get("content")
                .map(|c| str_field(c, "text"))
                .unwrap_or_default();
            if text.is_empty() {
                "Web-Search-Server: unknown response.".to_string()
            } else {
                format!("Web-Search-Server: {text}")
            }
        };
        StreamVariant::ServerError { message }
    };

    block.messages = to_chat_messages(&[variant.clone()], false, true);
    block.variants.push(variant);
    block
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn structured(stdout: &str, stderr: &str, repr: &str, error: &str, display: Value) -> String {
        json!({
            "structuredContent": {
                "stdout": stdout,
                "stderr": stderr,
                "result_repr": repr,
                "display_data": display,
                "error": error,
            }
        })
        .to_string()
    }

    #[test]
    fn stdout_gets_leading_newline() {
        let block = parse_tool_result(
            &structured("1\n", "", "", "", json!([])),
            TOOL_NAME_CODE,
            "c1",
        );
        assert!(!block.is_error);
        assert_eq!(
            block.variants[0],
            StreamVariant::CodeOutput {
                output: "\n1\n".into(),
                call_id: "c1".into()
            }
        );
        assert_eq!(block.messages.len(), 1);
        assert_eq!(block.messages[0].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn stdout_and_repr_compose() {
        let block = parse_tool_result(
            &structured("out", "", "42", "", json!([])),
            TOOL_NAME_CODE,
            "c1",
        );
        assert_eq!(
            block.variants[0],
            StreamVariant::CodeOutput {
                output: "\nout\n42".into(),
                call_id: "c1".into()
            }
        );
    }

    #[test]
    fn empty_result_still_emits_output() {
        let block = parse_tool_result(
            &structured("", "", "", "", json!([])),
            TOOL_NAME_CODE,
            "c1",
        );
        assert_eq!(
            block.variants[0],
            StreamVariant::CodeOutput {
                output: String::new(),
                call_id: "c1".into()
            }
        );
        assert!(!block.is_error);
    }

    #[test]
    fn stderr_marks_error_and_is_appended() {
        let block = parse_tool_result(
            &structured("partial", "Traceback", "", "", json!([])),
            TOOL_NAME_CODE,
            "c1",
        );
        assert!(block.is_error);
        assert_eq!(
            block.variants[0],
            StreamVariant::CodeOutput {
                output: "\npartial\nTraceback".into(),
                call_id: "c1".into()
            }
        );
    }

    #[test]
    fn image_display_data_gets_indexed_ids() {
        let display = json!([
            { "image/png": "AAAA" },
            { "image/png": "BBBB" },
        ]);
        let block = parse_tool_result(
            &structured("", "", "", "", display),
            TOOL_NAME_CODE,
            "c1",
        );
        assert_eq!(block.variants.len(), 3);
        assert_eq!(block.variants[1], StreamVariant::image("AAAA", "c1_0"));
        assert_eq!(block.variants[2], StreamVariant::image("BBBB", "c1_1"));
        // Each image is announced to the model by a user message, then the
        // image itself.
        assert!(block.messages.len() >= 5);
    }

    #[test]
    fn json_display_data_gets_json_suffix() {
        let display = json!([{ "application/json": { "a": 1 } }]);
        let block = parse_tool_result(
            &structured("", "", "", "", display),
            TOOL_NAME_CODE,
            "c1",
        );
        assert!(matches!(
            &block.variants[1],
            StreamVariant::CodeOutput { call_id, .. } if call_id == "c1:json"
        ));
    }

    #[test]
    fn unstructured_error_is_code_server_prefixed() {
        let block = parse_tool_result(r#"{"error": "kernel died"}"#, TOOL_NAME_CODE, "c1");
        assert!(block.is_error);
        assert_eq!(
            block.variants[0],
            StreamVariant::CodeOutput {
                output: "Code-Server: kernel died".into(),
                call_id: "c1".into()
            }
        );
    }

    #[test]
    fn unstructured_text_content_fallback() {
        let block = parse_tool_result(
            r#"{"content": {"text": "plain text result"}}"#,
            TOOL_NAME_CODE,
            "c1",
        );
        assert!(block.is_error);
        assert_eq!(
            block.variants[0],
            StreamVariant::CodeOutput {
                output: "plain text result".into(),
                call_id: "c1".into()
            }
        );
    }

    #[test]
    fn garbage_result_is_error_output() {
        let block = parse_tool_result("not json", TOOL_NAME_CODE, "c1");
        assert!(block.is_error);
        assert!(matches!(&block.variants[0], StreamVariant::CodeOutput { .. }));
    }

    #[test]
    fn web_search_structured_result() {
        let raw = json!({ "structuredContent": { "result": "three hits" } }).to_string();
        let block = parse_tool_result(&raw, "web_search", "w1");
        assert!(!block.is_error);
        assert_eq!(
            block.variants[0],
            StreamVariant::ToolOutput {
                output: "three hits".into(),
                tool_name: "web-search".into(),
                id: "w1".into(),
            }
        );
    }

    #[test]
    fn web_search_error_fallback() {
        let block = parse_tool_result(r#"{"error": "quota"}"#, "web_search", "w1");
        assert!(block.is_error);
        assert!(matches!(
            &block.variants[0],
            StreamVariant::ServerError { message } if message == "Web-Search-Server: quota"
        ));
    }

    #[test]
    fn unknown_tool_yields_empty_error_block() {
        let block = parse_tool_result("{}", "mystery", "m1");
        assert!(block.is_error);
        assert!(block.variants.is_empty());
    }
}
