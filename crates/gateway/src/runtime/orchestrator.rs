//! Streaming orchestrator — drives one conversational turn.
//!
//! [`run_stream`] spawns the model/tool loop and hands back a channel of
//! stream variants. The loop alternates between streamed completions and
//! tool invocations: text and tool-argument deltas are forwarded live,
//! finalized tool calls run as cancellable tasks with heartbeat hints
//! interleaved, and their parsed results are appended to the conversation
//! before the model is consulted again.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use fg_domain::chat::ChatMessage;
use fg_domain::config::model_supports_images;
use fg_domain::stream::StreamEvent;
use fg_domain::variant::{
    from_wire, to_chat_messages, Conversation, StreamVariant, ASSISTANT_NAME, TOOL_NAME_CODE,
};
use fg_providers::{CompletionClient, CompletionRequest};
use fg_storage::{StorageError, ThreadStorage};

use crate::heartbeat;
use crate::runtime::registry::{ConversationRegistry, ConversationState};
use crate::runtime::tool_results::parse_tool_result;

/// Interval between heartbeat hints while a tool call is in flight.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to one conversational turn.
pub struct StreamRequest {
    pub model: String,
    pub thread_id: String,
    pub user_input: String,
    pub system_prompt: Vec<ChatMessage>,
}

struct StreamContext {
    registry: Arc<ConversationRegistry>,
    completions: Arc<dyn CompletionClient>,
    storage: Arc<dyn ThreadStorage>,
    model: String,
    thread_id: String,
    user_input: String,
    system_prompt: Vec<ChatMessage>,
}

/// The consumer went away (dropped receiver or aborted tool task).
struct Cancelled;

enum TurnError {
    /// Failure on the model-completion stream.
    Model(String),
    Cancelled,
}

async fn emit(
    tx: &mpsc::Sender<StreamVariant>,
    variant: StreamVariant,
) -> Result<(), Cancelled> {
    tx.send(variant).await.map_err(|_| Cancelled)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Preparation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Why preparing a stream failed.
pub enum PrepareError {
    NotFound,
    Failed(String),
}

/// Load history (when resuming from storage), attach a tool manager, and
/// publish the conversation in the registry in state `Streaming`.
///
/// `prompt_snapshot` seeds brand-new conversations with a `Prompt` variant
/// carrying the system-prompt JSON; it is ignored for known threads.
pub async fn prepare_for_stream(
    registry: &Arc<ConversationRegistry>,
    storage: &Arc<dyn ThreadStorage>,
    tool_manager: Option<Arc<fg_mcp_client::ToolManager>>,
    thread_id: &str,
    user_id: &str,
    read_history: bool,
    prompt_snapshot: Option<String>,
) -> Result<(), PrepareError> {
    let mut messages: Conversation = Vec::new();

    if read_history {
        let wire = match storage.read_thread(thread_id).await {
            Ok(wire) => wire,
            Err(StorageError::NotFound(_)) => return Err(PrepareError::NotFound),
            Err(e) => {
                tracing::error!(thread_id, error = %e, "history assembly failed");
                return Err(PrepareError::Failed(format!(
                    "Prompt/history assembly failed: {e}"
                )));
            }
        };
        for obj in &wire {
            match from_wire(obj) {
                Ok(v) => messages.push(v),
                Err(e) => {
                    tracing::warn!(thread_id, error = %e, "skipping malformed stored event");
                }
            }
        }
    } else if !registry.contains(thread_id) {
        if let Some(payload) = prompt_snapshot {
            messages.push(StreamVariant::Prompt { payload });
        }
    }

    registry.initialize(thread_id, user_id, messages, tool_manager);
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_stream — the turn loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Spawn the orchestrator for one turn and return its event stream.
///
/// The sequence is finite and single-consumer: it opens with a
/// `ServerHint` carrying the thread id and closes when the turn finishes.
/// Dropping the receiver cancels the turn; in-flight tool tasks are
/// aborted and the conversation is persisted with a `Cancelled.` marker.
pub fn run_stream(
    registry: Arc<ConversationRegistry>,
    completions: Arc<dyn CompletionClient>,
    storage: Arc<dyn ThreadStorage>,
    req: StreamRequest,
) -> mpsc::Receiver<StreamVariant> {
    let (tx, rx) = mpsc::channel::<StreamVariant>(64);

    let ctx = StreamContext {
        registry,
        completions,
        storage,
        model: req.model,
        thread_id: req.thread_id,
        user_input: req.user_input,
        system_prompt: req.system_prompt,
    };

    tokio::spawn(async move {
        match run_stream_inner(&ctx, &tx).await {
            Ok(()) => {}
            Err(Cancelled) => handle_cancellation(&ctx, &tx).await,
        }
    });

    rx
}

/// Consumer-gone path: abort tool tasks and, unless a stop request already
/// finalized the conversation, record the cancellation and persist.
async fn handle_cancellation(ctx: &StreamContext, tx: &mpsc::Sender<StreamVariant>) {
    ctx.registry.cancel_tool_tasks(&ctx.thread_id);

    if ctx.registry.state(&ctx.thread_id) != Some(ConversationState::Streaming) {
        return;
    }

    tracing::warn!(thread_id = %ctx.thread_id, "stream cancelled");
    let end = StreamVariant::StreamEnd {
        message: "Cancelled.".into(),
    };
    ctx.registry.add(&ctx.thread_id, vec![end.clone()]);
    let _ = tx.try_send(end);
    ctx.registry.end_and_save(&ctx.thread_id, &ctx.storage).await;
}

async fn run_stream_inner(
    ctx: &StreamContext,
    tx: &mpsc::Sender<StreamVariant>,
) -> Result<(), Cancelled> {
    emit(
        tx,
        StreamVariant::ServerHint {
            data: json!({ "thread_id": ctx.thread_id }),
        },
    )
    .await?;
    ctx.registry.add(
        &ctx.thread_id,
        vec![StreamVariant::User {
            text: ctx.user_input.clone(),
        }],
    );

    let mut finished = false;
    while !finished {
        if ctx.registry.state(&ctx.thread_id) != Some(ConversationState::Streaming) {
            break;
        }

        if let Err(e) = stream_with_tools(ctx, tx, &mut finished).await {
            match e {
                TurnError::Cancelled => return Err(Cancelled),
                TurnError::Model(message) => {
                    tracing::error!(thread_id = %ctx.thread_id, error = %message, "stream error");
                    let err_v = StreamVariant::OpenAiError { message };
                    ctx.registry.add(&ctx.thread_id, vec![err_v.clone()]);
                    emit(tx, err_v).await?;
                    emit(
                        tx,
                        StreamVariant::StreamEnd {
                            message: "Stream ended with an error.".into(),
                        },
                    )
                    .await?;
                    finished = true;
                }
            }
        }
    }

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// One completion + its tool calls
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn stream_with_tools(
    ctx: &StreamContext,
    tx: &mpsc::Sender<StreamVariant>,
    finished: &mut bool,
) -> Result<(), TurnError> {
    // Rebuild the prompt from the current history each iteration so tool
    // results from previous rounds are included.
    let history = ctx.registry.messages(&ctx.thread_id).unwrap_or_default();
    let mut messages = ctx.system_prompt.clone();
    messages.extend(to_chat_messages(
        &history,
        model_supports_images(&ctx.model),
        false,
    ));

    let manager = ctx.registry.tool_manager(&ctx.thread_id);
    let tools = manager
        .as_ref()
        .map(|m| m.tool_catalogue())
        .unwrap_or_default();

    let request = CompletionRequest::new(ctx.model.clone(), messages.clone()).with_tools(tools);
    let mut stream = ctx
        .completions
        .complete_stream(&request)
        .await
        .map_err(|e| TurnError::Model(e.to_string()))?;

    // ── Delta consumption ──────────────────────────────────────────
    let mut text_buf = String::new();
    let mut agg = ToolCallAggregator::default();

    while let Some(event) = stream.next().await {
        match event {
            Ok(StreamEvent::Token { text }) => {
                emit(tx, StreamVariant::assistant(text.clone()))
                    .await
                    .map_err(|_| TurnError::Cancelled)?;
                text_buf.push_str(&text);
            }
            Ok(StreamEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            }) => {
                let delta = agg.push(index, id, name, &arguments);
                // Stream code fragments live for UX; the consolidated Code
                // event is appended to history at dispatch time.
                if delta.is_code && !delta.fragment.is_empty() {
                    emit(
                        tx,
                        StreamVariant::Code {
                            code: delta.fragment,
                            call_id: delta.call_id,
                        },
                    )
                    .await
                    .map_err(|_| TurnError::Cancelled)?;
                }
            }
            Ok(StreamEvent::Done { .. }) => break,
            Err(e) => return Err(TurnError::Model(e.to_string())),
        }
    }

    if !text_buf.is_empty() {
        ctx.registry
            .add(&ctx.thread_id, vec![StreamVariant::assistant(text_buf)]);
    }

    // ── Tool dispatch ──────────────────────────────────────────────
    let tool_calls = agg.finalize();
    if tool_calls.is_empty() {
        emit(
            tx,
            StreamVariant::StreamEnd {
                message: "Stream ended.".into(),
            },
        )
        .await
        .map_err(|_| TurnError::Cancelled)?;
        *finished = true;
        return Ok(());
    }

    for tc in tool_calls {
        messages.push(ChatMessage::tool_call(
            ASSISTANT_NAME,
            tc.id.clone(),
            tc.name.clone(),
            tc.arguments.clone(),
        ));

        let result_text = run_tool_with_heartbeats(ctx, tx, &tc).await?;

        // Collect the tool round as variants and append to history.
        let mut block: Vec<StreamVariant> = Vec::new();
        if tc.name == TOOL_NAME_CODE {
            block.push(StreamVariant::Code {
                code: tc.arguments.clone(),
                call_id: tc.id.clone(),
            });
        }

        let parsed = parse_tool_result(&result_text, &tc.name, &tc.id);
        for v in &parsed.variants {
            emit(tx, v.clone()).await.map_err(|_| TurnError::Cancelled)?;
        }
        block.extend(parsed.variants);
        ctx.registry.add(&ctx.thread_id, block);

        messages.extend(parsed.messages);
    }

    Ok(())
}

/// Run one tool invocation as a cancellable task, emitting a heartbeat
/// `ServerHint` roughly every ten seconds while it is in flight. Tool
/// failures are not fatal: they come back as a JSON error string the model
/// can react to.
async fn run_tool_with_heartbeats(
    ctx: &StreamContext,
    tx: &mpsc::Sender<StreamVariant>,
    tc: &FinalToolCall,
) -> Result<String, TurnError> {
    let Some(manager) = ctx.registry.tool_manager(&ctx.thread_id) else {
        return Ok(json!({ "error": "no tool manager available" }).to_string());
    };

    let arguments: Value = if tc.arguments.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&tc.arguments).unwrap_or_else(|_| json!({ "_raw": tc.arguments }))
    };

    tracing::info!(
        thread_id = %ctx.thread_id,
        tool = %tc.name,
        call_id = %tc.id,
        "executing tool call"
    );

    let server = manager.server_for_tool(&tc.name);
    let name = tc.name.clone();
    let mut handle = tokio::spawn(async move {
        match manager
            .call_tool(server.as_deref(), &name, &arguments, None)
            .await
        {
            Ok(result) => result.to_string(),
            Err(e) => json!({ "error": e.to_string() }).to_string(),
        }
    });
    let ticket = ctx
        .registry
        .register_tool_task(&ctx.thread_id, handle.abort_handle());

    let joined = loop {
        tokio::select! {
            joined = &mut handle => break joined,
            _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                let hint = heartbeat::heartbeat_hint(&ctx.registry, Some(&tc.name));
                if emit(tx, hint).await.is_err() {
                    handle.abort();
                    ctx.registry.unregister_tool_task(&ctx.thread_id, ticket);
                    return Err(TurnError::Cancelled);
                }
            }
        }
    };
    ctx.registry.unregister_tool_task(&ctx.thread_id, ticket);

    match joined {
        Ok(result) => Ok(result),
        Err(e) if e.is_cancelled() => Err(TurnError::Cancelled),
        Err(e) => Ok(json!({ "error": format!("tool task failed: {e}") }).to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-call delta accumulation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool call assembled from streamed deltas.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// What one delta contributed, for live fragment streaming.
pub struct DeltaOutcome {
    pub call_id: String,
    pub fragment: String,
    pub is_code: bool,
}

/// Accumulates OpenAI-style tool-call deltas keyed by index.
#[derive(Debug, Default)]
pub struct ToolCallAggregator {
    by_index: BTreeMap<usize, PendingCall>,
}

impl ToolCallAggregator {
    pub fn push(
        &mut self,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: &str,
    ) -> DeltaOutcome {
        let entry = self.by_index.entry(index).or_default();
        if let Some(id) = id {
            entry.id = id;
        }
        if let Some(name) = name {
            entry.name = name;
        }
        entry.arguments.push_str(arguments);

        DeltaOutcome {
            call_id: entry.id.clone(),
            fragment: arguments.to_string(),
            is_code: entry.name == TOOL_NAME_CODE,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    /// Finalized calls in index order.
    pub fn finalize(self) -> Vec<FinalToolCall> {
        self.by_index
            .into_values()
            .map(|p| FinalToolCall {
                id: p.id,
                name: p.name,
                arguments: p.arguments,
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
