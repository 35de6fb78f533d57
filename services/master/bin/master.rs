//! Main Entrypoint for the Master Interview Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging, the snapshot store and migrations.
//! 3. Loading the curriculum and (when configured) the prompt templates.
//! 4. Wiring the decision layer and panelist voice backends.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use roundtable_core::{
    curriculum::Curriculum,
    decision::{DecisionKind, DecisionLayer, OpenAiDecisionLayer, ScriptedDecisionLayer},
};
use roundtable_master::{
    config::Config,
    panelist::{OpenAiPanelistVoice, PanelistVoice, ScriptedVoice},
    router::create_router,
    state::AppState,
    store::{InterviewStore, MemoryStore, PgStore},
};
use sqlx::PgPool;
use std::{collections::HashMap, fs, net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Loads every `.md` prompt template from the prompts directory, keyed by
/// file stem.
fn load_prompts(prompts_path: &std::path::Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in fs::read_dir(prompts_path)
        .with_context(|| format!("cannot read prompts directory {}", prompts_path.display()))?
    {
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
    for kind in [
        DecisionKind::Speaker,
        DecisionKind::Advice,
        DecisionKind::Completion,
        DecisionKind::SubtopicSummary,
        DecisionKind::TopicSummary,
    ] {
        if !prompts.contains_key(kind.prompt_key()) {
            anyhow::bail!(
                "missing prompt template '{}.md' in {}",
                kind.prompt_key(),
                prompts_path.display()
            );
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

    // --- 3. Initialize the Snapshot Store ---
    let store: Arc<dyn InterviewStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url)
                .await
                .context("Failed to connect to database")?;
            let store = PgStore::new(pool);
            store.run_migrations().await?;
            info!("Database connection established and migrations are up-to-date.");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set; snapshots are held in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    // --- 4. Load the Curriculum ---
    let curriculum_raw = fs::read_to_string(&config.curriculum_path).with_context(|| {
        format!(
            "cannot read curriculum file {}",
            config.curriculum_path.display()
        )
    })?;
    let curriculum = Curriculum::from_json(&curriculum_raw).context("invalid curriculum")?;
    info!(path = %config.curriculum_path.display(), "curriculum loaded");

    // --- 5. Wire the Decision Layer and Panelist Voices ---
    let (decisions, voice): (Arc<dyn DecisionLayer>, Arc<dyn PanelistVoice>) =
        match &config.openai_api_key {
            Some(api_key) => {
                info!(model = %config.chat_model, "using OpenAI decision backend");
                let prompts = load_prompts(&config.prompts_path)?;
                let openai_config = OpenAIConfig::new()
                    .with_api_key(api_key)
                    .with_api_base("https://api.openai.com/v1/");
                (
                    Arc::new(OpenAiDecisionLayer::new(
                        openai_config.clone(),
                        config.chat_model.clone(),
                        prompts,
                    )),
                    Arc::new(OpenAiPanelistVoice::new(
                        openai_config,
                        config.chat_model.clone(),
                    )),
                )
            }
            None => {
                warn!("OPENAI_API_KEY not set; using scripted decision backend");
                (
                    Arc::new(ScriptedDecisionLayer::new()),
                    Arc::new(ScriptedVoice::new()),
                )
            }
        };

    let app_state = Arc::new(AppState {
        decisions,
        voice,
        store,
        curriculum,
        config: Arc::new(config.clone()),
    });

    // --- 6. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 7. Start Server ---
    info!(
        model = %config.chat_model,
        panelists = ?config.panelists,
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

    info!("Server has shut down.");
    Ok(())
}
