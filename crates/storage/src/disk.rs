//! Disk-backed thread storage.
//!
//! Each thread is one `<thread_id>.txt` file of newline-delimited wire
//! events plus a `<thread_id>.meta.json` sidecar carrying the topic. Reads
//! tolerate blank lines, `//` comments, and unparseable garbage.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use fg_domain::variant::{cleanup_conversation, to_wire, StreamVariant};
use fg_providers::CompletionClient;

use crate::topic::{fallback_topic, summarize_topic};
use crate::{event_matches, Result, StorageError, Thread, ThreadStorage};

pub struct DiskThreadStorage {
    root: PathBuf,
    summarizer: Option<Arc<dyn CompletionClient>>,
}

impl DiskThreadStorage {
    /// Open (creating if needed) the thread directory.
    pub fn new(root: impl Into<PathBuf>, summarizer: Option<Arc<dyn CompletionClient>>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, summarizer })
    }

    fn thread_path(&self, thread_id: &str) -> PathBuf {
        self.root.join(format!("{thread_id}.txt"))
    }

    fn meta_path(&self, thread_id: &str) -> PathBuf {
        self.root.join(format!("{thread_id}.meta.json"))
    }

    fn read_meta_topic(&self, thread_id: &str) -> Option<String> {
        let raw = std::fs::read_to_string(self.meta_path(thread_id)).ok()?;
        let meta: Value = serde_json::from_str(&raw).ok()?;
        meta.get("topic")
            .and_then(Value::as_str)
            .map(String::from)
            .filter(|t| !t.is_empty())
    }

    fn write_meta_topic(&self, thread_id: &str, topic: &str) -> Result<()> {
        let meta = serde_json::json!({ "topic": topic });
        std::fs::write(self.meta_path(thread_id), meta.to_string())?;
        Ok(())
    }

    fn read_raw_events(&self, path: &Path) -> Result<Vec<Value>> {
        let raw = std::fs::read_to_string(path)?;
        let mut events = Vec::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(v) => events.push(v),
                Err(_) => {
                    tracing::debug!(path = %path.display(), "skipping unparseable thread line");
                }
            }
        }
        Ok(events)
    }

    fn write_raw_events(&self, thread_id: &str, events: &[Value]) -> Result<()> {
        let mut buf = String::new();
        for ev in events {
            buf.push_str(&ev.to_string());
            buf.push('\n');
        }
        std::fs::write(self.thread_path(thread_id), buf)?;
        Ok(())
    }

    /// Thread files ordered newest-first by modification time, plus the
    /// total count.
    fn thread_files(&self) -> Result<(Vec<PathBuf>, usize)> {
        let mut files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            files.push((path, modified));
        }
        files.sort_by(|a, b| b.1.cmp(&a.1));
        let total = files.len();
        Ok((files.into_iter().map(|(p, _)| p).collect(), total))
    }

    fn load_thread(&self, user_id: &str, path: &Path) -> Result<Thread> {
        let thread_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let content = self.read_raw_events(path)?;
        let topic = self
            .read_meta_topic(&thread_id)
            .unwrap_or_else(|| fallback_topic(&first_user_text_wire(&content)));
        let date: DateTime<Utc> = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Thread {
            user_id: user_id.to_string(),
            thread_id,
            date,
            topic,
            content,
        })
    }
}

/// First `User` event's content in wire form, or empty.
fn first_user_text_wire(events: &[Value]) -> String {
    events
        .iter()
        .find(|e| e.get("variant").and_then(Value::as_str) == Some("User"))
        .and_then(|e| e.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[async_trait::async_trait]
impl ThreadStorage for DiskThreadStorage {
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

        let lines: Vec<String> = content.iter().map(|v| to_wire(v).to_string()).collect();
        let path = self.thread_path(thread_id);

        if append_to_existing && path.exists() {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new().append(true).open(&path)?;
            for line in &lines {
                writeln!(file, "{line}")?;
            }
        } else {
            std::fs::write(&path, format!("{}\n", lines.join("\n")))?;
        }

        // Keep an existing topic; derive one otherwise.
        let topic = match self.read_meta_topic(thread_id) {
            Some(t) => t,
            None => summarize_topic(self.summarizer.as_ref(), &content).await,
        };
        self.write_meta_topic(thread_id, &topic)?;

        tracing::debug!(thread_id, user_id, events = lines.len(), "thread saved");
        Ok(())
    }

    async fn read_thread(&self, thread_id: &str) -> Result<Vec<Value>> {
        let path = self.thread_path(thread_id);
        if !path.exists() {
            return Err(StorageError::NotFound(thread_id.to_string()));
        }
        self.read_raw_events(&path)
    }

    async fn list_recent_threads(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<(Vec<Thread>, usize)> {
        let (files, total) = self.thread_files()?;
        let mut threads = Vec::new();
        for path in files.into_iter().take(limit) {
            match self.load_thread(user_id, &path) {
                Ok(t) => threads.push(t),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping thread file");
                }
            }
        }
        Ok((threads, total))
    }

    async fn update_thread_topic(&self, thread_id: &str, topic: &str) -> Result<bool> {
        match self.write_meta_topic(thread_id, topic) {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "failed to update thread topic");
                Ok(false)
            }
        }
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<bool> {
        let thread = self.thread_path(thread_id);
        let meta = self.meta_path(thread_id);
        let mut removed = false;
        for path in [thread, meta] {
            if path.exists() {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed = true,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "delete failed");
                        return Ok(false);
                    }
                }
            }
        }
        Ok(removed)
    }

    async fn query_by_topic(
        &self,
        user_id: &str,
        query: &str,
        num_threads: usize,
    ) -> Result<(usize, Vec<Thread>)> {
        let needle = query.to_lowercase();
        let (files, _) = self.thread_files()?;
        let mut matched = Vec::new();
        for path in files {
            let Ok(thread) = self.load_thread(user_id, &path) else {
                continue;
            };
            if thread.topic.to_lowercase().contains(&needle) {
                matched.push(thread);
            }
        }
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
        let (files, _) = self.thread_files()?;
        let mut matched = Vec::new();
        for path in files {
            let Ok(thread) = self.load_thread(user_id, &path) else {
                continue;
            };
            if thread
                .content
                .iter()
                .any(|ev| event_matches(ev, variant, &needle))
            {
                matched.push(thread);
            }
        }
        let total = matched.len();
        matched.truncate(num_threads);
        Ok((total, matched))
    }

    async fn save_feedback(
        &self,
        thread_id: &str,
        user_id: &str,
        index: usize,
        feedback: &str,
    ) -> Result<bool> {
        let mut events = self.read_thread(thread_id).await?;
        let Some(event) = events.get_mut(index) else {
            return Ok(false);
        };
        let Some(obj) = event.as_object_mut() else {
            return Ok(false);
        };

        if feedback == "remove" {
            if obj.remove("feedback").is_none() {
                return Ok(false);
            }
        } else {
            obj.insert("feedback".into(), Value::String(feedback.to_string()));
        }

        self.write_raw_events(thread_id, &events)?;
        tracing::debug!(thread_id, user_id, index, "feedback updated");
        Ok(true)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, DiskThreadStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskThreadStorage::new(dir.path(), None).unwrap();
        (dir, storage)
    }

    fn small_conv() -> Vec<StreamVariant> {
        vec![
            StreamVariant::User {
                text: "plot the temperature".into(),
            },
            StreamVariant::assistant("here you go"),
        ]
    }

    #[tokio::test]
    async fn save_and_read_roundtrip() {
        let (_dir, s) = storage();
        s.save_thread("t1", "alice", &small_conv(), false).await.unwrap();

        let events = s.read_thread("t1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["variant"], "User");
        assert_eq!(events[1]["variant"], "Assistant");
    }

    #[tokio::test]
    async fn save_runs_cleanup() {
        let (_dir, s) = storage();
        let conv = vec![StreamVariant::Code {
            code: "a=2".into(),
            call_id: "c1".into(),
        }];
        s.save_thread("t1", "alice", &conv, false).await.unwrap();

        let events = s.read_thread("t1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1]["variant"], "CodeOutput");
        assert_eq!(events[1]["content"][1], "c1");
    }

    #[tokio::test]
    async fn empty_conversation_is_not_written() {
        let (_dir, s) = storage();
        s.save_thread("t1", "alice", &[], false).await.unwrap();
        assert!(matches!(
            s.read_thread("t1").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn append_mode_extends_file() {
        let (_dir, s) = storage();
        s.save_thread("t1", "alice", &small_conv(), false).await.unwrap();
        s.save_thread(
            "t1",
            "alice",
            &[StreamVariant::User { text: "more".into() }],
            true,
        )
        .await
        .unwrap();
        assert_eq!(s.read_thread("t1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn topic_derived_and_kept() {
        let (_dir, s) = storage();
        s.save_thread("t1", "alice", &small_conv(), false).await.unwrap();
        // Without a summarizer, the fallback topic is the first user turn.
        assert_eq!(s.read_meta_topic("t1").as_deref(), Some("plot the temperature"));

        assert!(s.update_thread_topic("t1", "Weather").await.unwrap());
        // Re-saving keeps the explicit topic.
        s.save_thread("t1", "alice", &small_conv(), false).await.unwrap();
        assert_eq!(s.read_meta_topic("t1").as_deref(), Some("Weather"));
    }

    #[tokio::test]
    async fn delete_removes_thread_and_meta() {
        let (_dir, s) = storage();
        s.save_thread("t1", "alice", &small_conv(), false).await.unwrap();
        assert!(s.delete_thread("t1").await.unwrap());
        assert!(matches!(
            s.read_thread("t1").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(!s.delete_thread("t1").await.unwrap());
    }

    #[tokio::test]
    async fn list_recent_counts_all() {
        let (_dir, s) = storage();
        s.save_thread("t1", "alice", &small_conv(), false).await.unwrap();
        s.save_thread("t2", "alice", &small_conv(), false).await.unwrap();
        s.save_thread("t3", "alice", &small_conv(), false).await.unwrap();

        let (threads, total) = s.list_recent_threads("alice", 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(threads.len(), 2);
    }

    #[tokio::test]
    async fn query_by_topic_matches_case_insensitively() {
        let (_dir, s) = storage();
        s.save_thread("t1", "alice", &small_conv(), false).await.unwrap();
        s.save_thread(
            "t2",
            "alice",
            &[StreamVariant::User { text: "hello".into() }],
            false,
        )
        .await
        .unwrap();

        let (total, threads) = s.query_by_topic("alice", "TEMPERATURE", 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(threads[0].thread_id, "t1");
    }

    #[tokio::test]
    async fn query_by_variant_searches_content() {
        let (_dir, s) = storage();
        let conv = vec![
            StreamVariant::User { text: "run it".into() },
            StreamVariant::Code {
                code: "import xarray".into(),
                call_id: "c1".into(),
            },
            StreamVariant::CodeOutput {
                output: "ok".into(),
                call_id: "c1".into(),
            },
        ];
        s.save_thread("t1", "alice", &conv, false).await.unwrap();

        let (total, _) = s.query_by_variant("alice", "Code", "xarray", 10).await.unwrap();
        assert_eq!(total, 1);
        let (none, _) = s.query_by_variant("alice", "User", "xarray", 10).await.unwrap();
        assert_eq!(none, 0);
    }

    #[tokio::test]
    async fn feedback_set_and_remove() {
        let (_dir, s) = storage();
        s.save_thread("t1", "alice", &small_conv(), false).await.unwrap();

        assert!(s.save_feedback("t1", "alice", 1, "good").await.unwrap());
        let events = s.read_thread("t1").await.unwrap();
        assert_eq!(events[1]["feedback"], "good");

        assert!(s.save_feedback("t1", "alice", 1, "remove").await.unwrap());
        let events = s.read_thread("t1").await.unwrap();
        assert!(events[1].get("feedback").is_none());

        // Removing twice reports false.
        assert!(!s.save_feedback("t1", "alice", 1, "remove").await.unwrap());
    }

    #[tokio::test]
    async fn read_tolerates_garbage_lines() {
        let (dir, s) = storage();
        std::fs::write(
            dir.path().join("t9.txt"),
            "// comment\n\n{\"variant\":\"User\",\"content\":\"hi\"}\nnot json\n",
        )
        .unwrap();
        let events = s.read_thread("t9").await.unwrap();
        assert_eq!(events.len(), 1);
    }
}
