//! Main Entrypoint for the Tutor Relay Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the conversation store and the completion/speech clients.
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use tutor_api::{config::Config, router::create_router, state::AppState};
use tutor_core::{
    conversation::{ConversationStore, EvictionPolicy},
    llm_client::{CompletionGateway, OpenAICompatibleClient},
    prompt::TUTOR_SYSTEM_PROMPT,
    speech::{
        ElevenLabsSynthesizer, GOOGLE_DEFAULT_BASE_URL, GoogleSpeechSynthesizer,
        OpenAISpeechSynthesizer, SpeechProvider, SpeechSynthesizer,
    },
};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Reads `system_prompt.md` from the prompts directory, falling back to the
/// built-in tutor prompt.
fn load_system_prompt(prompts_path: &std::path::Path) -> String {
    let path = prompts_path.join("system_prompt.md");
    match std::fs::read_to_string(&path) {
        Ok(prompt) if !prompt.trim().is_empty() => {
            info!(path = %path.display(), "Loaded system prompt from file");
            prompt
        }
        _ => TUTOR_SYSTEM_PROMPT.to_string(),
    }
}

fn build_speech(config: &Config) -> anyhow::Result<Option<Arc<dyn SpeechSynthesizer>>> {
    let Some(provider) = config.speech_provider else {
        info!("Speech synthesis disabled.");
        return Ok(None);
    };

    let speech: Arc<dyn SpeechSynthesizer> = match provider {
        SpeechProvider::ElevenLabs => Arc::new(ElevenLabsSynthesizer::new(
            config
                .eleven_labs_api_key
                .clone()
                .context("ELEVEN_LABS_API_KEY is required for ElevenLabs speech")?,
            config.eleven_labs_base_url.clone(),
            config.eleven_labs_voice.clone(),
        )),
        SpeechProvider::OpenAI => Arc::new(OpenAISpeechSynthesizer::new(
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
        )),
        SpeechProvider::Google => Arc::new(GoogleSpeechSynthesizer::new(
            config
                .google_tts_api_key
                .clone()
                .context("GOOGLE_TTS_API_KEY is required for Google speech")?,
            GOOGLE_DEFAULT_BASE_URL.to_string(),
        )),
    };
    info!(?provider, "Speech synthesis enabled.");
    Ok(Some(speech))
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

    // --- 3. Initialize Shared Services ---
    let policy = EvictionPolicy {
        idle_ttl: config.session_idle_ttl,
        max_sessions: config.max_sessions,
    };
    let store = Arc::new(ConversationStore::new(
        load_system_prompt(&config.prompts_path),
        policy,
    ));

    let openai_config = OpenAIConfig::new()
        .with_api_key(config.openai_api_key.clone())
        .with_api_base(config.openai_base_url.clone());
    let gateway: Arc<dyn CompletionGateway> = Arc::new(OpenAICompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
    ));

    let speech = build_speech(&config)?;

    let app_state = Arc::new(AppState {
        store: store.clone(),
        gateway,
        speech,
        unbound_frame_policy: config.unbound_frame_policy,
    });

    // Otherwise idle sessions are only pruned when a new session is created.
    if let Some(ttl) = config.session_idle_ttl {
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(ttl);
            loop {
                sweep.tick().await;
                store.evict_idle().await;
            }
        });
    } else {
        warn!("SESSION_IDLE_TTL_SECS not set. Conversations are kept until shutdown.");
    }

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        model = %config.chat_model,
        bind_address = %config.bind_address,
        unbound_frame_policy = ?config.unbound_frame_policy,
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
