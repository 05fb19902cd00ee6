use std::pin::Pin;

use serde::Serialize;

/// A boxed async stream, used for streaming completion responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events parsed out of a streamed chat completion (provider-agnostic).
///
/// One SSE chunk may decode to several of these: a text delta, tool-call
/// argument deltas keyed by index, and a finish marker.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// A fragment of assistant text.
    #[serde(rename = "token")]
    Token { text: String },

    /// Incremental tool-call data. The first delta of a call carries `id`
    /// and `name`; later deltas only append to `arguments`.
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },

    /// The completion finished (`finish_reason` present or `[DONE]`).
    #[serde(rename = "done")]
    Done { finish_reason: Option<String> },
}
