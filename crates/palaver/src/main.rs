use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use palaver::app::{load_inputs, run_with_client};
use palaver::cli::{Cli, Command};
use palaver::config::{check_endpoint, EndpointConfig};
use palaver::openai::OpenAiCompletion;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();

    match cli.command {
        Command::Validate(args) => {
            let inputs = load_inputs(&args)?;
            for phase in &inputs.plan {
                info!(id = %phase.id, phase_type = %phase.phase_type, max_turns = phase.max_turns, "  phase");
            }
            for persona in &inputs.personas {
                info!(name = %persona.name, "  persona");
            }
            info!("plan and personas are valid");
        }
        Command::Run(args) => {
            let endpoint =
                EndpointConfig::default().with_overrides(args.model.clone(), args.facilitator_model.clone());
            info!(url = %endpoint.url, model = %endpoint.model, "palaver starting");
            if !check_endpoint(&endpoint.url).await {
                warn!(url = %endpoint.url, "endpoint did not answer /models; continuing anyway");
            }
            let client = Arc::new(OpenAiCompletion::new(&endpoint));
            let report = run_with_client(&args, &endpoint, client).await?;
            info!(
                session_id = %report.session_id,
                phases = report.phases.len(),
                ideas = report.ideas.len(),
                cancelled = report.cancelled,
                "palaver finished"
            );
        }
    }
    Ok(())
}
