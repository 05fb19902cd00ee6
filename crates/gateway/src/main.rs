use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::Method;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

use fg_domain::Settings;
use fg_gateway::api;
use fg_gateway::heartbeat;
use fg_gateway::runtime::ConversationRegistry;
use fg_gateway::state::AppState;
use fg_providers::{CompletionClient, LiteLlmClient};
use fg_storage::{DiskThreadStorage, MemoryThreadStorage, ThreadStorage};

/// Where the disk backend keeps its thread files.
const THREADS_DIR: &str = "./threads";

/// Cadence of the idle-conversation sweep.
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    heartbeat::init();

    let settings = Arc::new(Settings::from_env());
    tracing::info!(
        host = %settings.host,
        port = settings.port,
        dev = settings.dev,
        proxy = %settings.lite_llm_address,
        mcp_servers = ?settings.available_mcp_servers,
        "frevaGPT backend starting"
    );

    // ── Completion proxy client ──────────────────────────────────────
    let completions: Arc<dyn CompletionClient> = Arc::new(
        LiteLlmClient::new(&settings.lite_llm_address)
            .context("creating completion proxy client")?,
    );

    // ── Thread storage ───────────────────────────────────────────────
    let storage: Arc<dyn ThreadStorage> = if settings.dev {
        tracing::info!("dev mode: using in-process thread storage");
        Arc::new(MemoryThreadStorage::new(Some(completions.clone())))
    } else {
        Arc::new(
            DiskThreadStorage::new(THREADS_DIR, Some(completions.clone()))
                .context("initializing disk thread storage")?,
        )
    };

    // ── Conversation registry ────────────────────────────────────────
    let registry = Arc::new(ConversationRegistry::new());

    let state = AppState {
        settings: settings.clone(),
        registry: registry.clone(),
        completions,
        storage: storage.clone(),
    };

    // ── Idle eviction sweep ──────────────────────────────────────────
    {
        let registry = registry.clone();
        let storage = storage.clone();
        let max_idle = Duration::from_secs(settings.max_idle_sec);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(IDLE_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let evicted = registry.cleanup_idle(max_idle, &storage).await;
                if !evicted.is_empty() {
                    tracing::debug!(?evicted, "idle sweep complete");
                }
            }
        });
    }

    // ── Router ───────────────────────────────────────────────────────
    // Browsers hit the API directly in dev; the nginx proxy fronts it in
    // production, so permissive CORS is acceptable here.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    let app = api::router().layer(cors).with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "frevaGPT backend listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,fg_gateway=debug")),
        )
        .init();
}
