//! Prompt loading and assembly.
//!
//! A prompt set is a directory with three assets: `starting_prompt.txt`,
//! `examples.jsonl` (an example conversation in wire form), and
//! `summary_prompt.txt`. The assembled message order is
//! `[System(starting), *examples, System(summary)]`.

use std::path::{Path, PathBuf};

use fg_domain::chat::ChatMessage;
use fg_domain::variant::{from_wire, to_chat_messages, StreamVariant};

const STARTING_TXT: &str = "starting_prompt.txt";
const SUMMARY_TXT: &str = "summary_prompt.txt";
const EXAMPLES_JSONL: &str = "examples.jsonl";

const BASELINE_DIR: &str = "prompt_library/baseline";

/// Minimal prompts used when the library directory is missing, so a bare
/// checkout still serves requests.
const DEFAULT_STARTING: &str =
    "You are frevaGPT, an assistant for climate data analysis. Use the code \
     interpreter to answer questions that need computation.";
const DEFAULT_SUMMARY: &str =
    "Answer concisely and show your working when you ran code.";

fn baseline_dir() -> PathBuf {
    PathBuf::from(BASELINE_DIR)
}

/// Read `examples.jsonl` (wire-form JSON lines), tolerating blank lines,
/// `//` comments, and unparseable noise.
pub fn parse_examples_jsonl(path: &Path) -> Vec<StreamVariant> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        let Ok(obj) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if obj.get("variant").is_none() {
            continue;
        }
        match from_wire(&obj) {
            Ok(v) => out.push(v),
            Err(_) => continue,
        }
    }
    out
}

fn read_prompt_file(dir: &Path, name: &str, fallback: &str) -> String {
    match std::fs::read_to_string(dir.join(name)) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(
                file = %dir.join(name).display(),
                error = %e,
                "prompt asset missing, using built-in default"
            );
            fallback.to_string()
        }
    }
}

/// Build the full, ordered system-prompt message list for a completion.
///
/// GPT-5 prompt sets are not curated yet; those models fall back to the
/// baseline set with a warning.
pub fn get_entire_prompt(model: &str) -> Vec<ChatMessage> {
    if model.starts_with("gpt-5") {
        tracing::warn!(model, "no dedicated prompt set; falling back to baseline");
    }
    let dir = baseline_dir();

    let mut messages = Vec::new();
    messages.push(ChatMessage::system(read_prompt_file(
        &dir,
        STARTING_TXT,
        DEFAULT_STARTING,
    )));

    let examples = parse_examples_jsonl(&dir.join(EXAMPLES_JSONL));
    messages.extend(to_chat_messages(&examples, false, false));

    messages.push(ChatMessage::system(read_prompt_file(
        &dir,
        SUMMARY_TXT,
        DEFAULT_SUMMARY,
    )));

    messages
}

/// JSON snapshot of the assembled prompt, stored as the conversation's
/// `Prompt` variant.
pub fn prompt_snapshot(messages: &[ChatMessage]) -> String {
    serde_json::to_string(messages).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to serialize prompt snapshot");
        "[]".to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fg_domain::chat::Role;

    #[test]
    fn prompt_starts_and_ends_with_system_messages() {
        let messages = get_entire_prompt("gpt-4o-mini");
        assert!(messages.len() >= 2);
        assert_eq!(messages.first().unwrap().role, Role::System);
        assert_eq!(messages.last().unwrap().role, Role::System);
    }

    #[test]
    fn snapshot_roundtrips_through_prompt_variant() {
        let messages = get_entire_prompt("gpt-4o-mini");
        let payload = prompt_snapshot(&messages);
        let conv = vec![StreamVariant::Prompt { payload }];
        let restored = to_chat_messages(&conv, false, false);
        assert_eq!(restored, messages);
    }

    #[test]
    fn examples_parser_tolerates_noise() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("examples.jsonl");
        std::fs::write(
            &path,
            concat!(
                "// example conversation\n",
                "{\"variant\":\"User\",\"content\":\"show me a plot\"}\n",
                "garbage line\n",
                "{\"variant\":\"Assistant\",\"content\":\"sure\"}\n",
                "{\"no_variant\":true}\n",
            ),
        )
        .unwrap();

        let examples = parse_examples_jsonl(&path);
        assert_eq!(examples.len(), 2);
    }

    #[test]
    fn missing_examples_file_is_empty() {
        assert!(parse_examples_jsonl(Path::new("/nonexistent/examples.jsonl")).is_empty());
    }
}
