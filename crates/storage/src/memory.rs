//! In-process thread storage for dev mode (`FREVAGPT_DEV`) and tests.
//!
//! Same contract as the disk backend, held in a process-local map.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use fg_domain::variant::{cleanup_conversation, to_wire, StreamVariant};
use fg_providers::CompletionClient;

use crate::topic::summarize_topic;
use crate::{event_matches, Result, StorageError, Thread, ThreadStorage};

#[derive(Clone)]
struct StoredThread {
    user_id: String,
    date: DateTime<Utc>,
    topic: String,
    content: Vec<Value>,
}

#[derive(Default)]
pub struct MemoryThreadStorage {
    threads: RwLock<HashMap<String, StoredThread>>,
    summarizer: Option<Arc<dyn CompletionClient>>,
}

impl MemoryThreadStorage {
    pub fn new(summarizer: Option<Arc<dyn CompletionClient>>) -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            summarizer,
        }
    }

    fn to_thread(&self, thread_id: &str, stored: &StoredThread) -> Thread {
        Thread {
            user_id: stored.user_id.clone(),
            thread_id: thread_id.to_string(),
            date: stored.date,
            topic: stored.topic.clone(),
            content: stored.content.clone(),
        }
    }

    fn matching(&self, predicate: impl Fn(&str, &StoredThread) -> bool) -> Vec<Thread> {
        let threads = self.threads.read();
        let mut out: Vec<Thread> = threads
            .iter()
            .filter(|(id, t)| predicate(id, t))
            .map(|(id, t)| self.to_thread(id, t))
            .collect();
        out.sort_by(|a, b| b.date.cmp(&a.date));
        out
    }
}

#[async_trait::async_trait]
impl ThreadStorage for MemoryThreadStorage {
    async fn save_thread(
        &self,
        thread_id: &str,
        user_id: &str,
        content: &[StreamVariant],
        append_to_existing: bool,
    ) -> Result<()> {
        let content = cleanup_conversation(content, false);
        if content.is_empty() {
            return Ok(());
        }

        let existing_topic = self
            .threads
            .read()
            .get(thread_id)
            .map(|t| t.topic.clone())
            .filter(|t| !t.is_empty());
        let topic = match existing_topic {
            Some(t) => t,
            None => summarize_topic(self.summarizer.as_ref(), &content).await,
        };

        let wire: Vec<Value> = content.iter().map(to_wire).collect();
        let mut threads = self.threads.write();
        let entry = threads.entry(thread_id.to_string());
        match entry {
            std::collections::hash_map::Entry::Occupied(mut o) => {
                let stored = o.get_mut();
                if append_to_existing {
                    stored.content.extend(wire);
                } else {
                    stored.content = wire;
                }
                stored.date = Utc::now();
                stored.topic = topic;
            }
            std::collections::hash_map::Entry::Vacant(v) => {
                v.insert(StoredThread {
                    user_id: user_id.to_string(),
                    date: Utc::now(),
                    topic,
                    content: wire,
                });
            }
        }
        Ok(())
    }

    async fn read_thread(&self, thread_id: &str) -> Result<Vec<Value>> {
        self.threads
            .read()
            .get(thread_id)
            .map(|t| t.content.clone())
            .ok_or_else(|| StorageError::NotFound(thread_id.to_string()))
    }

    async fn list_recent_threads(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<(Vec<Thread>, usize)> {
        let mut all = self.matching(|_, t| t.user_id == user_id);
        let total = all.len();
        all.truncate(limit);
        Ok((all, total))
    }

    async fn update_thread_topic(&self, thread_id: &str, topic: &str) -> Result<bool> {
        let mut threads = self.threads.write();
        match threads.get_mut(thread_id) {
            Some(t) => {
                t.topic = topic.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<bool> {
        Ok(self.threads.write().remove(thread_id).is_some())
    }

    async fn query_by_topic(
        &self,
        user_id: &str,
        query: &str,
        num_threads: usize,
    ) -> Result<(usize, Vec<Thread>)> {
        let needle = query.to_lowercase();
        let mut matched = self.matching(|_, t| {
            t.user_id == user_id && t.topic.to_lowercase().contains(&needle)
        });
        let total = matched.len();
        matched.truncate(num_threads);
        Ok((total, matched))
    }

    async fn query_by_variant(
        &self,
        user_id: &str,
        variant: &str,
        content: &str,
        num_threads: usize,
    ) -> Result<(usize, Vec<Thread>)> {
        let needle = content.to_lowercase();
        let mut matched = self.matching(|_, t| {
            t.user_id == user_id
                && t.content.iter().any(|ev| event_matches(ev, variant, &needle))
        });
        let total = matched.len();
        matched.truncate(num_threads);
        Ok((total, matched))
    }

    async fn save_feedback(
        &self,
        thread_id: &str,
        _user_id: &str,
        index: usize,
        feedback: &str,
    ) -> Result<bool> {
        let mut threads = self.threads.write();
        let stored = threads
            .get_mut(thread_id)
            .ok_or_else(|| StorageError::NotFound(thread_id.to_string()))?;
        let Some(obj) = stored.content.get_mut(index).and_then(Value::as_object_mut) else {
            return Ok(false);
        };

        if feedback == "remove" {
            Ok(obj.remove("feedback").is_some())
        } else {
            obj.insert("feedback".into(), Value::String(feedback.to_string()));
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> Vec<StreamVariant> {
        vec![
            StreamVariant::User { text: "hello".into() },
            StreamVariant::assistant("hi"),
        ]
    }

    #[tokio::test]
    async fn roundtrip_and_not_found() {
        let s = MemoryThreadStorage::new(None);
        s.save_thread("t1", "u", &conv(), false).await.unwrap();
        assert_eq!(s.read_thread("t1").await.unwrap().len(), 2);
        assert!(matches!(
            s.read_thread("nope").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn listing_scoped_to_user() {
        let s = MemoryThreadStorage::new(None);
        s.save_thread("t1", "alice", &conv(), false).await.unwrap();
        s.save_thread("t2", "bob", &conv(), false).await.unwrap();

        let (threads, total) = s.list_recent_threads("alice", 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(threads[0].thread_id, "t1");
    }

    #[tokio::test]
    async fn append_extends() {
        let s = MemoryThreadStorage::new(None);
        s.save_thread("t1", "u", &conv(), false).await.unwrap();
        s.save_thread("t1", "u", &conv(), true).await.unwrap();
        assert_eq!(s.read_thread("t1").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn feedback_annotates_event() {
        let s = MemoryThreadStorage::new(None);
        s.save_thread("t1", "u", &conv(), false).await.unwrap();
        assert!(s.save_feedback("t1", "u", 0, "bad").await.unwrap());
        assert_eq!(s.read_thread("t1").await.unwrap()[0]["feedback"], "bad");
        assert!(s.save_feedback("t1", "u", 0, "remove").await.unwrap());
        assert!(!s.save_feedback("t1", "u", 0, "remove").await.unwrap());
    }
}
