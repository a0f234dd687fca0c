//! Output sinks for a run.
//!
//! - `--events <jsonl>`: append-only log, one `DiscussionEvent` per line,
//!   in the order the bus delivered them
//! - `--report <json>`: the final `SessionReport`, overwritten each run

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use deliberation::events::{DiscussionEvent, SharedEventBus};
use deliberation::SessionReport;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Drains the bus into a JSONL file until the session completes or the bus
/// closes. Subscribe happens before this returns, so nothing published
/// afterwards is missed.
pub fn spawn_event_sink(bus: &SharedEventBus, path: PathBuf) -> JoinHandle<Result<usize>> {
    let rx = bus.subscribe();
    tokio::spawn(write_events(rx, path))
}

async fn write_events(mut rx: Receiver<DiscussionEvent>, path: PathBuf) -> Result<usize> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open event log {}", path.display()))?;

    let mut written = 0usize;
    loop {
        match rx.recv().await {
            Ok(event) => {
                let line = serde_json::to_string(&event).context("failed to serialize event")?;
                writeln!(file, "{line}")
                    .with_context(|| format!("failed to append to {}", path.display()))?;
                written += 1;
                debug!(event_type = event.event_type(), phase = ?event.phase_id(), "event appended");
                if matches!(event, DiscussionEvent::SessionCompleted { .. }) {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event sink lagged; events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
    info!(path = %path.display(), events = written, "event log written");
    Ok(written)
}

/// Write the session report as pretty JSON.
pub fn write_report(report: &SessionReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialize session report")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write report {}", path.display()))?;
    info!(path = %path.display(), phases = report.phases.len(), "session report written");
    Ok(())
}
