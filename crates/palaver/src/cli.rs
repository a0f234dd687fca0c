use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use deliberation::RunMode;

#[derive(Debug, Parser)]
#[command(name = "palaver", version, about = "Run a facilitated multi-persona discussion")]
pub struct Cli {
    /// Raise the default log level to debug (RUST_LOG still wins).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every phase of a plan against a completion backend.
    Run(RunArgs),
    /// Load and check a plan and persona directory without calling the backend.
    Validate(InputArgs),
}

#[derive(Debug, Clone, Args)]
pub struct InputArgs {
    /// Phase plan (`.toml` with `[[phases]]`, or a `.json` array).
    #[arg(long)]
    pub plan: PathBuf,

    /// Directory of `*.json` persona profiles.
    #[arg(long)]
    pub personas: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Deliberation config overrides (TOML).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Run-mode preset: fast, medium, standard or deep.
    #[arg(long)]
    pub mode: Option<RunMode>,

    /// Append every discussion event to this JSONL file.
    #[arg(long)]
    pub events: Option<PathBuf>,

    /// Write the session report to this JSON file (stdout otherwise).
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Model for persona, mediator and analysis calls [env: PALAVER_MODEL].
    #[arg(long)]
    pub model: Option<String>,

    /// Model for facilitator calls [env: PALAVER_FACILITATOR_MODEL].
    #[arg(long)]
    pub facilitator_model: Option<String>,

    /// Use the model-free facilitator even when a facilitator model is set.
    #[arg(long)]
    pub heuristic_facilitator: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_all_flags() {
        let cli = Cli::try_parse_from([
            "palaver",
            "run",
            "--plan",
            "plan.toml",
            "--personas",
            "personas",
            "--mode",
            "fast",
            "--events",
            "events.jsonl",
            "--heuristic-facilitator",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.mode, Some(RunMode::Fast));
        assert_eq!(args.input.plan, PathBuf::from("plan.toml"));
        assert!(args.heuristic_facilitator);
        assert!(args.report.is_none());
    }

    #[test]
    fn test_bad_mode_rejected() {
        let parsed = Cli::try_parse_from([
            "palaver", "run", "--plan", "p.toml", "--personas", "d", "--mode", "slow",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_validate_requires_inputs() {
        assert!(Cli::try_parse_from(["palaver", "validate", "--plan", "p.toml"]).is_err());
        assert!(matches!(
            Cli::try_parse_from(["palaver", "validate", "--plan", "p.toml", "--personas", "d"])
                .unwrap()
                .command,
            Command::Validate(_)
        ));
    }
}
