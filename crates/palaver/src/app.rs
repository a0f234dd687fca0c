//! Wiring from CLI arguments to a running session.
//!
//! ```text
//! plan file ──┐
//! personas/ ──┼──► Session::run ──► SessionReport ──► --report / stdout
//! config ─────┘         │
//!                       └──► EventBus ──► JSONL sink (--events)
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use deliberation::scheduler::{SharedTurnDecider, TurnPolicy};
use deliberation::{
    DeliberationConfig, EventBus, HeuristicFacilitator, LlmFacilitator, PersonaProfile, Phase,
    PhaseScheduler, Session, SessionReport, SharedCompletionClient,
};
use tracing::{info, warn};

use crate::cli::{InputArgs, RunArgs};
use crate::config::EndpointConfig;
use crate::personas::load_personas;
use crate::plan::load_plan;
use crate::telemetry::{spawn_event_sink, write_report};

/// Loaded and checked inputs.
#[derive(Debug, Clone)]
pub struct Inputs {
    pub plan: Vec<Phase>,
    pub personas: Vec<PersonaProfile>,
}

pub fn load_inputs(args: &InputArgs) -> Result<Inputs> {
    let plan = load_plan(&args.plan)?;
    let personas = load_personas(&args.personas)?;
    info!(phases = plan.len(), personas = personas.len(), "inputs loaded");
    Ok(Inputs { plan, personas })
}

/// Deliberation config from `--config` and `--mode`, with model names from
/// the endpoint.
pub fn build_config(args: &RunArgs, endpoint: &EndpointConfig) -> Result<DeliberationConfig> {
    let mut config = match &args.config {
        Some(path) => DeliberationConfig::load(path)?,
        None => DeliberationConfig::default(),
    };
    if let Some(mode) = args.mode {
        config = config.with_mode(mode);
    }
    config.models.participant = endpoint.model.clone();
    config.models.analysis = endpoint.model.clone();
    config.models.facilitator = endpoint
        .facilitator_model
        .clone()
        .unwrap_or_else(|| endpoint.model.clone());
    Ok(config)
}

/// Model-backed facilitator when a facilitator model is configured, the
/// heuristic one otherwise.
pub fn build_decider(
    args: &RunArgs,
    endpoint: &EndpointConfig,
    config: &DeliberationConfig,
    client: SharedCompletionClient,
) -> SharedTurnDecider {
    match (&endpoint.facilitator_model, args.heuristic_facilitator) {
        (Some(model), false) => {
            info!(model = %model, "using model facilitator");
            Arc::new(
                LlmFacilitator::new(client, model.clone(), config.scheduler.analysis_timeout())
                    .with_min_participants(config.scheduler.min_participants),
            )
        }
        _ => {
            info!("using heuristic facilitator");
            Arc::new(HeuristicFacilitator::new(TurnPolicy::new(&config.scheduler)))
        }
    }
}

/// Run a whole session against `client` and write its outputs.
pub async fn run_with_client(
    args: &RunArgs,
    endpoint: &EndpointConfig,
    client: SharedCompletionClient,
) -> Result<SessionReport> {
    let inputs = load_inputs(&args.input)?;
    let config = build_config(args, endpoint)?;
    let decider = build_decider(args, endpoint, &config, client.clone());

    let bus = EventBus::new().shared();
    let sink = args.events.clone().map(|path| spawn_event_sink(&bus, path));

    let scheduler = PhaseScheduler::new(client, decider, config, bus)
        .context("failed to build phase scheduler")?;
    let cancel = scheduler.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current turn");
            cancel.cancel();
        }
    });

    let mut session = Session::new(scheduler);
    if let Some(mode) = args.mode {
        session = session.with_mode(mode);
    }
    let pool: Vec<Arc<PersonaProfile>> = inputs.personas.into_iter().map(Arc::new).collect();
    let report = session.run(&inputs.plan, &pool).await;
    ctrl_c.abort();
    drop(session);

    if let Some(sink) = sink {
        match sink.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("event log incomplete: {e:#}"),
            Err(e) => warn!("event sink task failed: {e}"),
        }
    }

    match &args.report {
        Some(path) => write_report(&report, path)?,
        None => println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize session report")?
        ),
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::InputArgs;
    use deliberation::RunMode;
    use std::path::PathBuf;

    fn endpoint(facilitator: Option<&str>) -> EndpointConfig {
        EndpointConfig {
            url: "http://localhost:8080/v1".into(),
            api_key: None,
            model: "persona-model".into(),
            facilitator_model: facilitator.map(String::from),
        }
    }

    fn args() -> RunArgs {
        RunArgs {
            input: InputArgs {
                plan: PathBuf::from("plan.toml"),
                personas: PathBuf::from("personas"),
            },
            config: None,
            mode: None,
            events: None,
            report: None,
            model: None,
            facilitator_model: None,
            heuristic_facilitator: false,
        }
    }

    #[test]
    fn test_config_takes_models_from_endpoint() {
        let config = build_config(&args(), &endpoint(Some("judge"))).unwrap();
        assert_eq!(config.models.participant, "persona-model");
        assert_eq!(config.models.analysis, "persona-model");
        assert_eq!(config.models.facilitator, "judge");

        let config = build_config(&args(), &endpoint(None)).unwrap();
        assert_eq!(config.models.facilitator, "persona-model");
    }

    #[test]
    fn test_fast_mode_turns_off_summary_updates() {
        let mut args = args();
        args.mode = Some(RunMode::Fast);
        let config = build_config(&args, &endpoint(None)).unwrap();
        assert!(!config.update_summaries);
    }

    #[test]
    fn test_config_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deliberation.toml");
        std::fs::write(&path, "[scheduler]\nmax_participants = 4\n").unwrap();
        let mut args = args();
        args.config = Some(path);
        let config = build_config(&args, &endpoint(None)).unwrap();
        assert_eq!(config.scheduler.max_participants, 4);
        assert_eq!(config.scheduler.min_participants, 3);
    }
}
