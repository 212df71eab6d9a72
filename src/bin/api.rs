use creative_catalyst::{api::start_server, CatalystConfig, PipelineOrchestrator};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load environment variables
    let config = CatalystConfig::from_env()?;

    info!("Creative Catalyst - API Server");
    info!(
        port = config.api_port,
        provider = ?config.model_provider,
        l1_threshold = config.l1_distance_threshold,
        "Configuration loaded"
    );

    let orchestrator = Arc::new(PipelineOrchestrator::from_config(&config)?);

    info!("Orchestrator initialized");
    info!("Starting API server...");

    start_server(orchestrator, config.api_port).await?;

    Ok(())
}
