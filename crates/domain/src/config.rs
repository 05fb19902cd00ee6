//! Environment-driven server configuration.
//!
//! All settings are read from `FREVAGPT_*` environment variables once at
//! startup. Missing variables fall back to defaults that match the
//! docker-compose development layout.

use std::collections::HashMap;

/// Prefix shared by all recognized environment variables.
pub const ENV_PREFIX: &str = "FREVAGPT";

/// Server configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bind host (`FREVAGPT_HOST`).
    pub host: String,
    /// Bind port (`FREVAGPT_BACKEND_PORT`).
    pub port: u16,
    /// Base URL of the LiteLLM completion proxy (`FREVAGPT_LITE_LLM_ADDRESS`).
    pub lite_llm_address: String,
    /// Logical tool-server names (`FREVAGPT_AVAILABLE_MCP_SERVERS`).
    pub available_mcp_servers: Vec<String>,
    /// Tool-server URLs resolved from `FREVAGPT_<NAME>_SERVER_URL`.
    pub mcp_server_urls: HashMap<String, String>,
    /// Dev mode: dev auth + in-process storage (`FREVAGPT_DEV`).
    pub dev: bool,
    /// Tool request deadline in seconds (`FREVAGPT_MCP_REQUEST_TIMEOUT_SEC`).
    pub mcp_request_timeout_sec: u64,
    /// Model catalogue; the first entry is the default chatbot
    /// (`FREVAGPT_AVAILABLE_CHATBOTS`).
    pub available_chatbots: Vec<String>,
    /// Idle eviction threshold for active conversations in seconds
    /// (`FREVAGPT_MAX_IDLE_SEC`).
    pub max_idle_sec: u64,
}

fn env(key: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}_{key}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn env_list(key: &str, fallback: &[&str]) -> Vec<String> {
    match env(key) {
        Some(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => fallback.iter().map(|s| s.to_string()).collect(),
    }
}

fn env_bool(key: &str) -> bool {
    env(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn env_u64(key: &str, fallback: u64) -> u64 {
    env(key).and_then(|v| v.parse().ok()).unwrap_or(fallback)
}

impl Settings {
    /// Read the full configuration from the environment.
    pub fn from_env() -> Self {
        let available_mcp_servers = env_list("AVAILABLE_MCP_SERVERS", &["code"]);

        let mut mcp_server_urls = HashMap::new();
        for name in &available_mcp_servers {
            let key = format!("{}_SERVER_URL", name.to_uppercase());
            match env(&key) {
                Some(url) => {
                    mcp_server_urls.insert(name.clone(), url);
                }
                None => {
                    tracing::warn!(
                        server = %name,
                        env_var = %format!("{ENV_PREFIX}_{key}"),
                        "no URL configured for MCP server; it will be unreachable"
                    );
                }
            }
        }

        Self {
            host: env("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: env("BACKEND_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            lite_llm_address: env("LITE_LLM_ADDRESS")
                .unwrap_or_else(|| "http://litellm:4000".into()),
            available_mcp_servers,
            mcp_server_urls,
            dev: env_bool("DEV"),
            mcp_request_timeout_sec: env_u64("MCP_REQUEST_TIMEOUT_SEC", 300),
            available_chatbots: env_list("AVAILABLE_CHATBOTS", &["gpt-4o-mini"]),
            max_idle_sec: env_u64("MAX_IDLE_SEC", 3600),
        }
    }

    /// The default model, used when the client does not name one.
    pub fn default_chatbot(&self) -> &str {
        self.available_chatbots
            .first()
            .map(String::as_str)
            .unwrap_or("gpt-4o-mini")
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            lite_llm_address: "http://litellm:4000".into(),
            available_mcp_servers: vec!["code".into()],
            mcp_server_urls: HashMap::new(),
            dev: false,
            mcp_request_timeout_sec: 300,
            available_chatbots: vec!["gpt-4o-mini".into()],
            max_idle_sec: 3600,
        }
    }
}

/// Whether the model accepts image content parts in the prompt.
pub fn model_supports_images(model: &str) -> bool {
    ["gpt-4o", "gpt-5", "gpt-4.1"]
        .iter()
        .any(|p| model.starts_with(p))
}

/// Whether the model is a reasoning model (no temperature, long budgets).
pub fn model_is_reasoning(model: &str) -> bool {
    ["o3", "o4", "gpt-5"].iter().any(|p| model.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.port, 8080);
        assert_eq!(s.default_chatbot(), "gpt-4o-mini");
        assert!(!s.dev);
        assert_eq!(s.mcp_request_timeout_sec, 300);
    }

    #[test]
    fn image_support_by_prefix() {
        assert!(model_supports_images("gpt-4o"));
        assert!(model_supports_images("gpt-4o-mini"));
        assert!(model_supports_images("gpt-4.1-nano"));
        assert!(model_supports_images("gpt-5"));
        assert!(!model_supports_images("qwen2_5"));
        assert!(!model_supports_images("o3-mini"));
    }

    #[test]
    fn reasoning_by_prefix() {
        assert!(model_is_reasoning("o3-mini"));
        assert!(model_is_reasoning("gpt-5"));
        assert!(!model_is_reasoning("gpt-4o"));
    }
}
