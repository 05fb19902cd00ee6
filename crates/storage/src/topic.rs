//! Thread topic derivation.
//!
//! A topic is summarized from the first user turn via the completion proxy;
//! any failure falls back to a plain truncation so storage never crashes a
//! request.

use std::sync::Arc;

use fg_domain::chat::ChatMessage;
use fg_domain::variant::StreamVariant;
use fg_providers::{CompletionClient, CompletionRequest};

const SUMMARY_MODEL: &str = "gpt-4o-mini";
const MAX_FALLBACK_LEN: usize = 80;

/// Single-line truncation used when no summarizer is available.
pub fn fallback_topic(raw: &str) -> String {
    if raw.trim().is_empty() {
        return "Untitled".into();
    }
    let joined = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if joined.chars().count() <= MAX_FALLBACK_LEN {
        return joined;
    }
    let truncated: String = joined.chars().take(MAX_FALLBACK_LEN).collect();
    format!("{truncated}…")
}

/// First user turn of a conversation, or empty.
fn first_user_text(content: &[StreamVariant]) -> String {
    content
        .iter()
        .find_map(|v| match v {
            StreamVariant::User { text } => Some(text.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

/// Summarize the chat topic in ~12 words; falls back to truncation on any
/// error or when no summarizer is configured.
pub async fn summarize_topic(
    summarizer: Option<&Arc<dyn CompletionClient>>,
    content: &[StreamVariant],
) -> String {
    let raw = first_user_text(content);
    if raw.is_empty() {
        return "Untitled".into();
    }

    let Some(client) = summarizer else {
        return fallback_topic(&raw);
    };

    let snippet: String = raw.chars().take(2000).collect();
    let prompt = format!(
        "Summarize this chat topic in at most ~12 words, neutral tone.\n\nTopic:\n{snippet}"
    );

    let mut req = CompletionRequest::new(SUMMARY_MODEL, vec![ChatMessage::user(prompt)]);
    req.max_tokens = Some(50);
    req.temperature = Some(0.2);

    match client.complete_text(&req).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => fallback_topic(&raw),
        Err(e) => {
            tracing::warn!(error = %e, "topic summarization failed, falling back");
            fallback_topic(&raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_short_text_passes_through() {
        assert_eq!(fallback_topic("Plot temperature"), "Plot temperature");
    }

    #[test]
    fn fallback_collapses_whitespace() {
        assert_eq!(fallback_topic("a\n b\t c"), "a b c");
    }

    #[test]
    fn fallback_truncates_long_text() {
        let long = "x".repeat(200);
        let topic = fallback_topic(&long);
        assert_eq!(topic.chars().count(), MAX_FALLBACK_LEN + 1);
        assert!(topic.ends_with('…'));
    }

    #[test]
    fn fallback_empty_is_untitled() {
        assert_eq!(fallback_topic("  "), "Untitled");
    }

    #[tokio::test]
    async fn summarize_without_client_falls_back() {
        let conv = vec![StreamVariant::User {
            text: "What is ENSO?".into(),
        }];
        assert_eq!(summarize_topic(None, &conv).await, "What is ENSO?");
    }

    #[tokio::test]
    async fn summarize_without_user_turn_is_untitled() {
        let conv = vec![StreamVariant::assistant("hello")];
        assert_eq!(summarize_topic(None, &conv).await, "Untitled");
    }
}
