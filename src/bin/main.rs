use creative_catalyst::{CatalystConfig, PipelineOrchestrator, RunResult};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let request = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if request.trim().is_empty() {
        eprintln!("usage: catalyst <creative request>");
        eprintln!("example: catalyst \"gothic pastoral knitwear for Fall/Winter\"");
        std::process::exit(2);
    }

    let config = CatalystConfig::from_env()?;
    info!(
        provider = ?config.model_provider,
        results_dir = %config.results_dir.display(),
        "Creative Catalyst starting"
    );

    let orchestrator = PipelineOrchestrator::from_config(&config)?;
    let result = orchestrator.run_pipeline(&request).await;

    println!("{}", serde_json::to_string_pretty(&result)?);

    match result {
        RunResult::Completed(_) => Ok(()),
        RunResult::Failed(run) => {
            eprintln!("Run {} failed: {}", run.run_id, run.message);
            std::process::exit(1);
        }
    }
}
