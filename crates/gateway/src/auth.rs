//! Principal resolution for the chatbot endpoints.
//!
//! Requests authenticate with a bearer token (`Authorization` or
//! `x-freva-user-token`) that is verified against the freva rest API named
//! by `x-freva-rest-url`; the vault URL (`x-freva-vault-url`) rides along
//! for storage bootstrap. Dev mode (`FREVAGPT_DEV`) short-circuits to a
//! fixed local user.

use std::collections::HashMap;
use std::sync::OnceLock;

use axum::http::HeaderMap;
use serde_json::Value;

use fg_domain::Settings;

use crate::api::ApiError;

/// The resolved caller identity plus the service URLs it carried.
#[derive(Debug, Clone)]
pub struct Principal {
    pub username: String,
    pub vault_url: Option<String>,
    pub rest_url: Option<String>,
    pub token: Option<String>,
}

fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .unwrap_or_default()
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, ApiError> {
    match headers.get(name) {
        None => Ok(None),
        Some(v) => v.to_str().map(Some).map_err(|_| {
            ApiError::unprocessable(format!("{name} header is not a valid UTF-8 string."))
        }),
    }
}

/// Resolve the principal from request headers.
pub async fn resolve_principal(
    settings: &Settings,
    headers: &HeaderMap,
) -> Result<Principal, ApiError> {
    if settings.dev {
        return Ok(Principal {
            username: "dev-user".into(),
            vault_url: Some("dev".into()),
            rest_url: None,
            token: None,
        });
    }

    let header_val = match header_str(headers, "authorization")? {
        Some(v) => Some(v),
        None => header_str(headers, "x-freva-user-token")?,
    };
    let Some(header_val) = header_val else {
        return Err(ApiError::unauthorized(
            "No authorization header found; Authorization failed.",
        ));
    };

    let token = header_val.strip_prefix("Bearer ").ok_or_else(|| {
        ApiError::unprocessable(
            "Authorization header is not a Bearer token. Please use the Bearer token format.",
        )
    })?;

    let Some(rest_url) = header_str(headers, "x-freva-rest-url")? else {
        return Err(ApiError::bad_request(
            "Authentication not successful; please use the nginx proxy. (rest)",
        ));
    };

    let vault_url = header_str(headers, "x-freva-vault-url")?.map(String::from);

    let username = get_username_from_token(token, rest_url).await?;

    Ok(Principal {
        username,
        vault_url,
        rest_url: Some(rest_url.to_string()),
        token: Some(token.to_string()),
    })
}

/// The rest URL sometimes arrives with the API prefix already attached.
fn systemuser_suffix(rest_url: &str) -> &'static str {
    if rest_url.ends_with("/api/freva-nextgen/auth/v2/systemuser") {
        ""
    } else if rest_url.ends_with("/api/freva-nextgen/") {
        "auth/v2/systemuser"
    } else if rest_url.ends_with("/api/freva-nextgen") {
        "/auth/v2/systemuser"
    } else {
        "/api/freva-nextgen/auth/v2/systemuser"
    }
}

/// Verify the token against the rest API and return the username
/// (`pw_name`).
async fn get_username_from_token(token: &str, rest_url: &str) -> Result<String, ApiError> {
    let url = format!("{rest_url}{}", systemuser_suffix(rest_url));

    let resp = http_client()
        .get(&url)
        .header("Authorization", format!("Bearer {token}"))
        .send()
        .await
        .map_err(|_| ApiError::service_unavailable("Error sending token check request."))?;

    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ApiError::unauthorized(
            "Token check failed; Authorization rejected.",
        ));
    }
    if !status.is_success() {
        return Err(ApiError::bad_gateway(
            "Token check failed. Is Nginx running correctly?",
        ));
    }

    let data: Value = resp
        .json()
        .await
        .map_err(|_| ApiError::bad_gateway("Token check response was malformed."))?;

    match data.get("pw_name").and_then(Value::as_str) {
        Some(username) if !username.is_empty() => Ok(username.to_string()),
        _ => Err(ApiError::bad_gateway(
            "Token check response is malformed, no username found.",
        )),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-server header bundles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-thread scratch directory handed to the code interpreter.
pub fn working_dir(thread_id: &str) -> String {
    format!("./cache/{thread_id}")
}

/// Create the per-thread scratch directory; failures are logged only.
pub fn ensure_working_dir(thread_id: &str) {
    let dir = working_dir(thread_id);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::debug!(dir, error = %e, "failed to create working dir");
    }
}

/// Per-server default headers for one conversation's tool manager: the
/// bearer token everywhere, plus the scratch dir for the code interpreter.
pub fn mcp_headers(
    settings: &Settings,
    principal: &Principal,
    thread_id: &str,
) -> HashMap<String, HashMap<String, String>> {
    let mut bundles = HashMap::new();
    for server in &settings.available_mcp_servers {
        let mut headers = HashMap::new();
        if let Some(token) = &principal.token {
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
        if server == "code" {
            headers.insert("working-dir".to_string(), working_dir(thread_id));
        }
        bundles.insert(server.clone(), headers);
    }
    bundles
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_normalization_variants() {
        assert_eq!(
            systemuser_suffix("https://x/api/freva-nextgen/auth/v2/systemuser"),
            ""
        );
        assert_eq!(
            systemuser_suffix("https://x/api/freva-nextgen/"),
            "auth/v2/systemuser"
        );
        assert_eq!(
            systemuser_suffix("https://x/api/freva-nextgen"),
            "/auth/v2/systemuser"
        );
        assert_eq!(
            systemuser_suffix("https://x"),
            "/api/freva-nextgen/auth/v2/systemuser"
        );
    }

    #[tokio::test]
    async fn dev_mode_short_circuits() {
        let settings = Settings {
            dev: true,
            ..Settings::default()
        };
        let principal = resolve_principal(&settings, &HeaderMap::new()).await.unwrap();
        assert_eq!(principal.username, "dev-user");
        assert!(principal.vault_url.is_some());
    }

    #[tokio::test]
    async fn missing_auth_header_is_unauthorized() {
        let settings = Settings::default();
        let err = resolve_principal(&settings, &HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn non_bearer_token_is_unprocessable() {
        let settings = Settings::default();
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic abc".parse().unwrap());
        let err = resolve_principal(&settings, &headers).await.unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn missing_rest_url_is_bad_request() {
        let settings = Settings::default();
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer tok".parse().unwrap());
        let err = resolve_principal(&settings, &headers).await.unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn mcp_headers_carry_token_and_working_dir() {
        let mut settings = Settings::default();
        settings.available_mcp_servers = vec!["code".into(), "rag".into()];
        let principal = Principal {
            username: "alice".into(),
            vault_url: None,
            rest_url: None,
            token: Some("tok".into()),
        };

        let bundles = mcp_headers(&settings, &principal, "t1");
        assert_eq!(bundles["code"]["Authorization"], "Bearer tok");
        assert_eq!(bundles["code"]["working-dir"], "./cache/t1");
        assert!(bundles["rag"].get("working-dir").is_none());
    }
}
