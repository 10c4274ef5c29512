pub mod api; // HTTP front-end: /health, /map
pub mod config;
pub mod pipeline;
pub mod pipeline_config;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, ConfigError, LlmProvider};
use crate::pipeline::llm::{LlmClient, LlmError, OllamaClient, OpenAiClient};
use crate::pipeline::mapping::MappingPipeline;
use crate::pipeline::ontology::{HttpOntologyClient, OntologyError};

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM client error: {0}")]
    Llm(#[from] LlmError),

    #[error("Ontology client error: {0}")]
    Ontology(#[from] OntologyError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Server error: {0}")]
    Server(String),
}

/// Wire the configured collaborators into a pipeline.
///
/// Both HTTP clients are blocking; build them outside any tokio runtime.
pub fn build_pipeline(config: &AppConfig) -> Result<MappingPipeline, StartupError> {
    let llm: Box<dyn LlmClient + Send + Sync> = match config.llm_provider {
        LlmProvider::Ollama => Box::new(OllamaClient::new(&config.llm_base_url, config.llm_timeout_secs)?),
        LlmProvider::OpenAi => Box::new(OpenAiClient::new(
            &config.llm_base_url,
            config.openai_api_key.clone(),
            config.llm_timeout_secs,
        )?),
    };
    let ontology = HttpOntologyClient::new(&config.ontology_base_url, config.ontology_timeout_secs)?;

    Ok(MappingPipeline::new(
        llm,
        Box::new(ontology),
        config.models.clone(),
        config.mapping_config(),
    ))
}

/// Warn early when the local Ollama server is down or lacks the default model.
fn probe_ollama(config: &AppConfig) {
    let client = match OllamaClient::new(&config.llm_base_url, 5) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot build Ollama probe client");
            return;
        }
    };
    let model = config.models.default_model();
    match client.is_model_available(model) {
        Ok(true) => tracing::info!(model, "Default model available"),
        Ok(false) => tracing::warn!(model, "Default model not installed on Ollama server"),
        Err(e) => tracing::warn!(url = %config.llm_base_url, error = %e, "Ollama not reachable, requests will degrade"),
    }
}

pub fn run() -> Result<(), StartupError> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let app_config = AppConfig::from_env()?;
    tracing::info!(
        provider = %app_config.llm_provider,
        llm_url = %app_config.llm_base_url,
        ontology_url = %app_config.ontology_base_url,
        variant = %app_config.variant,
        model = app_config.models.default_model(),
        "Configuration loaded"
    );

    if app_config.llm_provider == LlmProvider::Ollama {
        probe_ollama(&app_config);
    }

    let pipeline = Arc::new(build_pipeline(&app_config)?);
    let ctx = api::ApiContext::new(pipeline, Duration::from_secs(app_config.request_timeout_secs));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let mut server = api::start_server_on(ctx, app_config.bind_addr)
            .await
            .map_err(StartupError::Server)?;
        tracing::info!(addr = %server.session.server_addr, "Listening");

        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for shutdown signal: {e}");
        }
        server.shutdown();
        server.wait().await;
        Ok::<(), StartupError>(())
    })
}
