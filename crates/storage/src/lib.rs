//! `fg-storage` — persistent thread storage for the frevaGPT backend.
//!
//! The orchestrator and the HTTP boundary only ever see the narrow
//! [`ThreadStorage`] capability. Two interchangeable backends ship here:
//! [`DiskThreadStorage`] (newline-delimited wire events plus a meta sidecar
//! per thread) and [`MemoryThreadStorage`] (dev-mode / test stub).

pub mod disk;
pub mod memory;
pub mod search;
pub mod topic;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use fg_domain::variant::StreamVariant;

pub use disk::DiskThreadStorage;
pub use memory::MemoryThreadStorage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("thread not found: {0}")]
    NotFound(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One stored thread, as returned by listings and searches.
/// `content` is in wire form.
#[derive(Debug, Clone, Serialize)]
pub struct Thread {
    pub user_id: String,
    pub thread_id: String,
    pub date: DateTime<Utc>,
    pub topic: String,
    pub content: Vec<Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Narrow storage capability the rest of the backend relies on.
///
/// Backends are interchangeable; no caller behavior depends on anything
/// beyond these contracts.
#[async_trait::async_trait]
pub trait ThreadStorage: Send + Sync {
    /// Persist a conversation (after cleanup). Derives a topic when the
    /// thread has none yet.
    async fn save_thread(
        &self,
        thread_id: &str,
        user_id: &str,
        content: &[StreamVariant],
        append_to_existing: bool,
    ) -> Result<()>;

    /// Ordered wire events of a thread; `NotFound` when unknown.
    async fn read_thread(&self, thread_id: &str) -> Result<Vec<Value>>;

    /// Most recent threads of a user plus the total thread count.
    async fn list_recent_threads(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<(Vec<Thread>, usize)>;

    async fn update_thread_topic(&self, thread_id: &str, topic: &str) -> Result<bool>;

    async fn delete_thread(&self, thread_id: &str) -> Result<bool>;

    /// Case-insensitive full-text match against thread topics.
    async fn query_by_topic(
        &self,
        user_id: &str,
        query: &str,
        num_threads: usize,
    ) -> Result<(usize, Vec<Thread>)>;

    /// Case-insensitive match against the content of one variant kind.
    async fn query_by_variant(
        &self,
        user_id: &str,
        variant: &str,
        content: &str,
        num_threads: usize,
    ) -> Result<(usize, Vec<Thread>)>;

    /// Record (or, with `"remove"`, delete) user feedback on the event at
    /// `index`.
    async fn save_feedback(
        &self,
        thread_id: &str,
        user_id: &str,
        index: usize,
        feedback: &str,
    ) -> Result<bool>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared matching helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Does a wire event of the requested variant kind contain `needle`?
pub(crate) fn event_matches(event: &Value, variant: &str, needle: &str) -> bool {
    if event.get("variant").and_then(Value::as_str) != Some(variant) {
        return false;
    }
    let haystack = match event.get("content") {
        Some(Value::String(s)) => s.to_lowercase(),
        Some(other) => other.to_string().to_lowercase(),
        None => return false,
    };
    haystack.contains(needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_matches_variant_and_content() {
        let ev = json!({ "variant": "User", "content": "Plot the Temperature" });
        assert!(event_matches(&ev, "User", "temperature"));
        assert!(!event_matches(&ev, "Assistant", "temperature"));
        assert!(!event_matches(&ev, "User", "humidity"));
    }

    #[test]
    fn event_matches_array_content() {
        let ev = json!({ "variant": "Code", "content": ["{\"code\":\"print(1)\"}", "c1"] });
        assert!(event_matches(&ev, "Code", "print(1)"));
    }
}
