//! Main Entrypoint for the Medical Triage API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Building the agent catalog, with instruction overrides from the prompts directory.
//! 3. Initializing the call registry, the pipeline hub and the optional LLM client.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and draining open calls on shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use std::{collections::HashMap, fs, net::SocketAddr, path::Path, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use triage_api::{
    background::spawn_pruner, config::Config, hub::PipelineHub, router::create_router,
    state::AppState,
};
use triage_core::{
    AgentCatalog, CallRegistry, RegistryConfig,
    llm_client::{LLMClient, OpenAICompatibleClient},
};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Loads agent instruction overrides (`triage.md`, `support.md`,
/// `billing.md`) from a directory. A missing directory means no overrides.
fn load_prompts(prompts_path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    if !prompts_path.is_dir() {
        info!(path = %prompts_path.display(), "No prompts directory; using built-in agent instructions.");
        return Ok(prompts);
    }
    for entry in fs::read_dir(prompts_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Build the Agent Catalog ---
    let prompts = load_prompts(&config.prompts_path)?;
    let catalog = Arc::new(AgentCatalog::with_instructions(&prompts));
    for agent in catalog.iter() {
        info!(
            agent = %agent.kind,
            targets = ?agent.allowed_targets,
            overridden = prompts.contains_key(agent.kind.as_str()),
            "Agent loaded"
        );
    }

    // --- 4. Initialize Shared Services ---
    let hub = Arc::new(PipelineHub::new());
    let registry = Arc::new(CallRegistry::new(
        catalog,
        hub.clone(),
        RegistryConfig {
            max_concurrent_calls: config.max_concurrent_calls,
            ended_retention: config.ended_retention,
        },
    ));

    let llm_client: Option<Arc<dyn LLMClient>> = if config.enable_conversation {
        let api_key = config
            .api_key()
            .context("No API key configured for the selected provider")?;
        info!(provider = ?config.provider, "Conversation loop enabled.");
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(config.api_base());
        Some(Arc::new(OpenAICompatibleClient::new(
            openai_config,
            config.chat_model.clone(),
        )) as Arc<dyn LLMClient>)
    } else {
        info!("Conversation loop disabled; pipelines send routing signals directly.");
        None
    };

    let pruner = spawn_pruner(registry.clone());
    let app_state = Arc::new(AppState::new(
        registry.clone(),
        hub,
        llm_client,
        config.clone(),
    ));

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        model = %config.chat_model,
        max_concurrent_calls = config.max_concurrent_calls,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // --- 7. Drain ---
    if let Some(handle) = pruner {
        handle.abort();
    }
    let drained = registry.shutdown();
    info!(drained, "Server has shut down.");
    Ok(())
}
