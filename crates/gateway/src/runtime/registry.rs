//! Active-conversation registry.
//!
//! Process-wide mapping `thread_id -> ActiveConversation`, guarded by a
//! single mutex. Critical sections are short and never await; operations
//! that persist snapshot under the lock and do the I/O afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::task::AbortHandle;

use fg_domain::variant::{Conversation, StreamVariant, TOOL_NAME_CODE};
use fg_mcp_client::ToolManager;
use fg_storage::ThreadStorage;

/// Length of generated thread ids.
const THREAD_ID_LEN: usize = 32;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Streaming,
    Stopping,
    Ended,
}

/// In-memory entry for one live thread.
///
/// `messages` has a single writer (the orchestrator of this thread);
/// readers observe a prefix snapshot.
pub struct ActiveConversation {
    pub thread_id: String,
    pub user_id: String,
    pub state: ConversationState,
    pub tool_manager: Option<Arc<ToolManager>>,
    tool_tasks: HashMap<u64, AbortHandle>,
    pub messages: Conversation,
    pub last_activity: Instant,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ConversationRegistry {
    inner: Mutex<HashMap<String, ActiveConversation>>,
    next_ticket: AtomicU64,
}

impl Default for ConversationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Generate a random 32-char alphanumeric id not currently registered.
    pub fn new_thread_id(&self) -> String {
        let inner = self.inner.lock();
        loop {
            let candidate: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(THREAD_ID_LEN)
                .map(char::from)
                .collect();
            if !inner.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    pub fn contains(&self, thread_id: &str) -> bool {
        self.inner.lock().contains_key(thread_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().len()
    }

    // ── lifecycle ──────────────────────────────────────────────────

    /// Register a conversation (or re-activate an existing one) in state
    /// `Streaming`.
    ///
    /// When the initial `messages` contain `Code` variants, a background
    /// replay task re-executes each code block into the code-interpreter
    /// server to reconstruct kernel state; the task is registered with the
    /// conversation and unregisters itself when done.
    pub fn initialize(
        self: &Arc<Self>,
        thread_id: &str,
        user_id: &str,
        messages: Conversation,
        tool_manager: Option<Arc<ToolManager>>,
    ) {
        let created = {
            let mut inner = self.inner.lock();
            match inner.get_mut(thread_id) {
                Some(conv) => {
                    conv.state = ConversationState::Streaming;
                    conv.last_activity = Instant::now();
                    false
                }
                None => {
                    if tool_manager.is_none() {
                        tracing::warn!(
                            thread_id,
                            "conversation initialized without a tool manager; \
                             tool servers cannot be reached"
                        );
                    }
                    inner.insert(
                        thread_id.to_string(),
                        ActiveConversation {
                            thread_id: thread_id.to_string(),
                            user_id: user_id.to_string(),
                            state: ConversationState::Streaming,
                            tool_manager: tool_manager.clone(),
                            tool_tasks: HashMap::new(),
                            messages,
                            last_activity: Instant::now(),
                        },
                    );
                    true
                }
            }
        };

        if created {
            if let Some(manager) = tool_manager {
                self.spawn_replay_if_needed(thread_id, manager);
            }
        }
    }

    /// Spawn the code-replay task when the stored history contains code.
    fn spawn_replay_if_needed(self: &Arc<Self>, thread_id: &str, manager: Arc<ToolManager>) {
        let code_blocks: Vec<String> = {
            let inner = self.inner.lock();
            let Some(conv) = inner.get(thread_id) else {
                return;
            };
            conv.messages
                .iter()
                .filter_map(|v| match v {
                    StreamVariant::Code { code, .. } if !code.trim().is_empty() => {
                        Some(code.clone())
                    }
                    _ => None,
                })
                .collect()
        };

        if code_blocks.is_empty() {
            return;
        }

        tracing::info!(
            thread_id,
            blocks = code_blocks.len(),
            "replaying code history into the interpreter"
        );

        let registry = self.clone();
        let tid = thread_id.to_string();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(async move {
            replay_code_history(&manager, &tid, code_blocks).await;
            registry.unregister_tool_task(&tid, ticket);
        });
        self.insert_tool_task(thread_id, ticket, handle.abort_handle());
    }

    // ── accessors ──────────────────────────────────────────────────

    pub fn state(&self, thread_id: &str) -> Option<ConversationState> {
        self.inner.lock().get(thread_id).map(|c| c.state)
    }

    pub fn tool_manager(&self, thread_id: &str) -> Option<Arc<ToolManager>> {
        self.inner
            .lock()
            .get(thread_id)
            .and_then(|c| c.tool_manager.clone())
    }

    /// Snapshot of the conversation's messages, or `None` if unknown.
    pub fn messages(&self, thread_id: &str) -> Option<Conversation> {
        self.inner.lock().get(thread_id).map(|c| c.messages.clone())
    }

    // ── mutation ───────────────────────────────────────────────────

    /// Extend the conversation and bump `last_activity`. The conversation
    /// must exist.
    pub fn add(&self, thread_id: &str, events: Vec<StreamVariant>) -> bool {
        let mut inner = self.inner.lock();
        match inner.get_mut(thread_id) {
            Some(conv) => {
                conv.messages.extend(events);
                conv.last_activity = Instant::now();
                true
            }
            None => {
                tracing::warn!(thread_id, "add to unknown conversation dropped");
                false
            }
        }
    }

    /// Signal that the conversation should stop streaming. The orchestrator
    /// exits at its next state probe. Returns whether the thread was found.
    pub fn request_stop(&self, thread_id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.get_mut(thread_id) {
            Some(conv) => {
                conv.state = ConversationState::Stopping;
                conv.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Mark the conversation `Ended` and persist it. The snapshot is taken
    /// under the lock; the storage await happens after releasing it.
    pub async fn end_and_save(
        &self,
        thread_id: &str,
        storage: &Arc<dyn ThreadStorage>,
    ) -> bool {
        let snapshot = {
            let mut inner = self.inner.lock();
            match inner.get_mut(thread_id) {
                Some(conv) => {
                    conv.state = ConversationState::Ended;
                    conv.last_activity = Instant::now();
                    Some((conv.user_id.clone(), conv.messages.clone()))
                }
                None => None,
            }
        };

        let Some((user_id, messages)) = snapshot else {
            return false;
        };

        if let Err(e) = storage
            .save_thread(thread_id, &user_id, &messages, false)
            .await
        {
            tracing::warn!(thread_id, error = %e, "failed to persist conversation");
        }
        true
    }

    /// Remove a conversation from the registry.
    pub fn remove(&self, thread_id: &str) -> bool {
        self.inner.lock().remove(thread_id).is_some()
    }

    // ── tool-task tracking ─────────────────────────────────────────

    /// Register an in-flight tool task; returns a ticket for
    /// [`unregister_tool_task`](Self::unregister_tool_task).
    pub fn register_tool_task(&self, thread_id: &str, handle: AbortHandle) -> u64 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.insert_tool_task(thread_id, ticket, handle);
        ticket
    }

    fn insert_tool_task(&self, thread_id: &str, ticket: u64, handle: AbortHandle) {
        if let Some(conv) = self.inner.lock().get_mut(thread_id) {
            conv.tool_tasks.insert(ticket, handle);
        }
    }

    pub fn unregister_tool_task(&self, thread_id: &str, ticket: u64) {
        if let Some(conv) = self.inner.lock().get_mut(thread_id) {
            conv.tool_tasks.remove(&ticket);
        }
    }

    /// Abort every registered tool task of the conversation.
    pub fn cancel_tool_tasks(&self, thread_id: &str) {
        let handles: Vec<AbortHandle> = {
            let mut inner = self.inner.lock();
            match inner.get_mut(thread_id) {
                Some(conv) => conv.tool_tasks.drain().map(|(_, h)| h).collect(),
                None => Vec::new(),
            }
        };
        for handle in handles {
            handle.abort();
        }
    }

    // ── idle eviction ──────────────────────────────────────────────

    /// Evict conversations idle longer than `max_idle`: close their tool
    /// sessions, pop them under the lock, then persist each outside the
    /// lock. Per-entry persistence failures are logged and do not abort
    /// other evictions. Returns the evicted thread ids.
    pub async fn cleanup_idle(
        &self,
        max_idle: Duration,
        storage: &Arc<dyn ThreadStorage>,
    ) -> Vec<String> {
        let now = Instant::now();
        let evicted: Vec<ActiveConversation> = {
            let mut inner = self.inner.lock();
            let expired: Vec<String> = inner
                .iter()
                .filter(|(_, conv)| now.duration_since(conv.last_activity) > max_idle)
                .map(|(id, _)| id.clone())
                .collect();
            expired
                .into_iter()
                .filter_map(|id| inner.remove(&id))
                .collect()
        };

        let mut evicted_ids = Vec::with_capacity(evicted.len());
        for conv in evicted {
            for (_, handle) in &conv.tool_tasks {
                handle.abort();
            }
            if let Some(manager) = &conv.tool_manager {
                manager.close();
            }
            if let Err(e) = storage
                .save_thread(&conv.thread_id, &conv.user_id, &conv.messages, false)
                .await
            {
                tracing::warn!(
                    thread_id = %conv.thread_id,
                    error = %e,
                    "idle eviction: persistence failed"
                );
            }
            evicted_ids.push(conv.thread_id);
        }

        if !evicted_ids.is_empty() {
            tracing::info!(count = evicted_ids.len(), "evicted idle conversations");
        }
        evicted_ids
    }
}

/// Replay historical code blocks into the code interpreter, in order,
/// stopping at the first failure. Best-effort: the conversation continues
/// either way.
async fn replay_code_history(manager: &ToolManager, thread_id: &str, code_blocks: Vec<String>) {
    for code in code_blocks {
        let args = serde_json::json!({ "code": code });
        match manager
            .call_tool(
                manager.server_for_tool(TOOL_NAME_CODE).as_deref(),
                TOOL_NAME_CODE,
                &args,
                None,
            )
            .await
        {
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "code replay failed, stopping");
                break;
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use fg_storage::MemoryThreadStorage;

    fn registry() -> Arc<ConversationRegistry> {
        Arc::new(ConversationRegistry::new())
    }

    fn storage() -> Arc<dyn ThreadStorage> {
        Arc::new(MemoryThreadStorage::new(None))
    }

    #[test]
    fn thread_ids_are_32_alphanumeric() {
        let reg = registry();
        let id = reg.new_thread_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, reg.new_thread_id());
    }

    #[tokio::test]
    async fn initialize_and_accessors() {
        let reg = registry();
        reg.initialize("t1", "alice", vec![], None);
        assert!(reg.contains("t1"));
        assert_eq!(reg.state("t1"), Some(ConversationState::Streaming));
        assert!(reg.messages("t1").unwrap().is_empty());
        assert!(reg.tool_manager("t1").is_none());
        assert_eq!(reg.state("unknown"), None);
    }

    #[tokio::test]
    async fn reinitialize_resets_state_to_streaming() {
        let reg = registry();
        reg.initialize("t1", "alice", vec![], None);
        assert!(reg.request_stop("t1"));
        assert_eq!(reg.state("t1"), Some(ConversationState::Stopping));
        reg.initialize("t1", "alice", vec![], None);
        assert_eq!(reg.state("t1"), Some(ConversationState::Streaming));
    }

    #[tokio::test]
    async fn add_extends_messages() {
        let reg = registry();
        reg.initialize("t1", "alice", vec![], None);
        assert!(reg.add("t1", vec![StreamVariant::User { text: "hi".into() }]));
        assert_eq!(reg.messages("t1").unwrap().len(), 1);
        assert!(!reg.add("ghost", vec![]));
    }

    #[tokio::test]
    async fn stop_unknown_thread_reports_missing() {
        let reg = registry();
        assert!(!reg.request_stop("ghost"));
    }

    #[tokio::test]
    async fn end_and_save_persists_and_marks_ended() {
        let reg = registry();
        let st = storage();
        reg.initialize("t1", "alice", vec![], None);
        reg.add(
            "t1",
            vec![
                StreamVariant::User { text: "hi".into() },
                StreamVariant::assistant("hello"),
            ],
        );

        assert!(reg.end_and_save("t1", &st).await);
        assert_eq!(reg.state("t1"), Some(ConversationState::Ended));
        assert_eq!(st.read_thread("t1").await.unwrap().len(), 2);
        assert!(!reg.end_and_save("ghost", &st).await);
    }

    #[tokio::test]
    async fn tool_task_registration_and_cancel() {
        let reg = registry();
        reg.initialize("t1", "alice", vec![], None);

        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let ticket = reg.register_tool_task("t1", task.abort_handle());

        reg.cancel_tool_tasks("t1");
        let err = task.await.unwrap_err();
        assert!(err.is_cancelled());

        // Unregister after cancel is a no-op.
        reg.unregister_tool_task("t1", ticket);
    }

    #[tokio::test]
    async fn cleanup_idle_zero_evicts_everything() {
        let reg = registry();
        let st = storage();
        reg.initialize("t1", "alice", vec![], None);
        reg.add("t1", vec![StreamVariant::User { text: "hi".into() }]);
        reg.initialize("t2", "bob", vec![], None);
        reg.add("t2", vec![StreamVariant::User { text: "yo".into() }]);

        let mut evicted = reg.cleanup_idle(Duration::ZERO, &st).await;
        evicted.sort();
        assert_eq!(evicted, vec!["t1".to_string(), "t2".to_string()]);
        assert!(!reg.contains("t1"));
        assert!(!reg.contains("t2"));
        // Both were persisted by thread id.
        assert!(st.read_thread("t1").await.is_ok());
        assert!(st.read_thread("t2").await.is_ok());
    }

    #[tokio::test]
    async fn cleanup_idle_long_threshold_keeps_entries() {
        let reg = registry();
        let st = storage();
        reg.initialize("t1", "alice", vec![], None);
        let evicted = reg.cleanup_idle(Duration::from_secs(3600), &st).await;
        assert!(evicted.is_empty());
        assert!(reg.contains("t1"));
    }

    #[tokio::test]
    async fn remove_pops_entry() {
        let reg = registry();
        reg.initialize("t1", "alice", vec![], None);
        assert!(reg.remove("t1"));
        assert!(!reg.remove("t1"));
    }
}
