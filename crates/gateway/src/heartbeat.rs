//! Process telemetry for heartbeat `ServerHint`s and the liveness probe.

use std::sync::OnceLock;
use std::time::Instant;

use serde_json::{json, Value};

use fg_domain::variant::StreamVariant;

use crate::runtime::registry::ConversationRegistry;

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// Record the process start time; called once from `main`.
pub fn init() {
    let _ = PROCESS_START.set(Instant::now());
}

fn uptime_secs() -> u64 {
    PROCESS_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Current telemetry snapshot. `tool` names the in-flight tool call when a
/// heartbeat is emitted from inside the orchestrator.
pub fn telemetry(registry: &ConversationRegistry, tool: Option<&str>) -> Value {
    let mut hb = json!({
        "pid": std::process::id(),
        "uptime_secs": uptime_secs(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "active_conversations": registry.active_count(),
    });
    if let Some(tool) = tool {
        hb["tool"] = json!(tool);
    }
    hb
}

/// Telemetry wrapped as a heartbeat `ServerHint`.
pub fn heartbeat_hint(registry: &ConversationRegistry, tool: Option<&str>) -> StreamVariant {
    StreamVariant::ServerHint {
        data: telemetry(registry, tool),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_carries_process_fields() {
        let registry = ConversationRegistry::new();
        let t = telemetry(&registry, Some("code_interpreter"));
        assert!(t["pid"].as_u64().is_some());
        assert_eq!(t["active_conversations"], 0);
        assert_eq!(t["tool"], "code_interpreter");
        assert!(t["timestamp"].as_str().is_some());
    }

    #[test]
    fn hint_wraps_telemetry() {
        let registry = ConversationRegistry::new();
        let hint = heartbeat_hint(&registry, None);
        assert!(matches!(
            hint,
            StreamVariant::ServerHint { data } if data.get("tool").is_none()
        ));
    }
}
