//! End-to-end run through the CLI wiring with a scripted backend: inputs on
//! disk, events and report written back to disk.

use std::path::Path;

use deliberation::completion::ScriptedCompletion;
use palaver::app::{load_inputs, run_with_client};
use palaver::cli::{InputArgs, RunArgs};
use palaver::config::EndpointConfig;
use palaver::LoadError;

const PLAN: &str = r#"
[[phases]]
id = "problem_discovery"
goal = "Understand what rural clinics struggle with"
desired_outcome = "Ranked list of problems"
max_turns = 3

[[phases]]
id = "synthesis"
goal = "Merge the strongest ideas"
desired_outcome = "One concept"
max_turns = 2
phase_type = "integration"
"#;

fn write_inputs(dir: &Path) -> InputArgs {
    let personas = dir.join("personas");
    std::fs::create_dir(&personas).unwrap();
    for (file, name, role) in [
        ("ada.json", "Ada", "a pragmatic engineer"),
        ("bo.json", "Bo", "a rural clinician"),
        ("cy.json", "Cy", "a service designer"),
    ] {
        std::fs::write(
            personas.join(file),
            format!(r#"{{"name": "{name}", "role_description": "{role}"}}"#),
        )
        .unwrap();
    }
    let plan = dir.join("plan.toml");
    std::fs::write(&plan, PLAN).unwrap();
    InputArgs { plan, personas }
}

fn endpoint() -> EndpointConfig {
    EndpointConfig {
        url: "http://localhost:8080/v1".into(),
        api_key: None,
        model: "scripted".into(),
        facilitator_model: None,
    }
}

#[tokio::test]
async fn test_run_writes_events_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_inputs(dir.path());
    let events = dir.path().join("events.jsonl");
    let report_path = dir.path().join("report.json");
    let args = RunArgs {
        input,
        config: None,
        mode: None,
        events: Some(events.clone()),
        report: Some(report_path.clone()),
        model: None,
        facilitator_model: None,
        heuristic_facilitator: false,
    };
    let client = ScriptedCompletion::constant("Clinics lose a lot of time rescheduling missed visits.").shared();

    let report = run_with_client(&args, &endpoint(), client).await.unwrap();

    assert_eq!(report.phases.len(), 2);
    assert_eq!(report.phases[0].turns_taken(), 3);
    assert_eq!(report.phases[1].turns_taken(), 2);
    assert_eq!(report.exchange_count(), 5);
    assert!(!report.cancelled);

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(written["session_id"], report.session_id.as_str());
    assert_eq!(written["phases"].as_array().unwrap().len(), 2);

    let log = std::fs::read_to_string(&events).unwrap();
    let types: Vec<String> = log
        .lines()
        .map(|l| {
            serde_json::from_str::<serde_json::Value>(l).unwrap()["type"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(types.first().map(String::as_str), Some("phase_started"));
    assert_eq!(types.last().map(String::as_str), Some("session_completed"));
    assert_eq!(types.iter().filter(|t| *t == "exchange_recorded").count(), 5);
    assert_eq!(types.iter().filter(|t| *t == "phase_completed").count(), 2);
}

#[test]
fn test_validate_catches_duplicate_phases() {
    let dir = tempfile::tempdir().unwrap();
    let mut input = write_inputs(dir.path());
    let plan = dir.path().join("dup.json");
    std::fs::write(
        &plan,
        r#"[{"id": "a", "goal": "g", "desired_outcome": "o", "max_turns": 3},
            {"id": "a", "goal": "g", "desired_outcome": "o", "max_turns": 3}]"#,
    )
    .unwrap();
    input.plan = plan;
    let err = load_inputs(&input).unwrap_err();
    assert!(matches!(err.downcast_ref::<LoadError>(), Some(LoadError::DuplicatePhase(_))));
}

#[test]
fn test_validate_accepts_good_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = load_inputs(&write_inputs(dir.path())).unwrap();
    assert_eq!(inputs.plan.len(), 2);
    let names: Vec<&str> = inputs.personas.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Ada", "Bo", "Cy"]);
}
