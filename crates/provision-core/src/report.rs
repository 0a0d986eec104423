//! Run report rendering and persistence.
//!
//! Provides two outputs:
//! - a plain-text summary for the terminal
//! - `runs/<run_id>.json` plus `last-run.json` under the state directory

use crate::error::{ProvisionError, Result};
use crate::registry::PlannedStep;
use crate::run::{RunReport, RunState};
use crate::step::{Decision, StepStatus};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// File name of the most recent report under the state directory.
pub const LAST_RUN_FILE: &str = "last-run.json";

// ── text rendering ────────────────────────────────────────────────────────

/// One line per step, then totals and the final state. Failed steps
/// are followed by the rest of their diagnostic.
pub fn render_text(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Provisioning {} ({})", report.project, report.target_dir);
    for step in report.steps() {
        let _ = writeln!(
            out,
            "  {} {:<32} {:>8}  {}",
            step.status.glyph(),
            step.step_name,
            format_duration(step.duration_ms),
            first_line(&step.message)
        );
        if step.status == StepStatus::Failed {
            for line in step.message.lines().skip(1) {
                let _ = writeln!(out, "      {}", line);
            }
        }
    }

    let _ = writeln!(
        out,
        "{} succeeded, {} skipped, {} failed in {}",
        report.succeeded_count(),
        report.skipped_count(),
        report.failed_count(),
        format_duration(report.duration_ms())
    );

    let optional: Vec<&str> = report
        .optional_failures()
        .map(|s| s.step_name.as_str())
        .collect();
    if !optional.is_empty() {
        let _ = writeln!(out, "Optional steps failed: {}", optional.join(", "));
    }

    match report.state {
        RunState::Completed => {
            let _ = writeln!(out, "Run {}: completed", report.run_id);
        }
        state => {
            let _ = writeln!(
                out,
                "Run {}: {} ({})",
                report.run_id,
                state.as_str(),
                report.abort_reason.as_deref().unwrap_or("no reason recorded")
            );
        }
    }
    out
}

/// Dry-run table.
pub fn render_plan(planned: &[PlannedStep]) -> String {
    let mut out = String::new();
    for step in planned {
        let marker = match step.decision {
            Decision::Skip => "skip",
            Decision::Proceed => "run",
            Decision::Recreate => "RECREATE",
        };
        let _ = write!(
            out,
            "  {:<9} {}{}",
            marker,
            step.name,
            if step.mandatory { "" } else { " (optional)" }
        );
        if let Some(error) = &step.probe_error {
            let _ = write!(out, "  [probe failed: {}]", error);
        }
        out.push('\n');
    }
    let destructive = planned
        .iter()
        .filter(|p| p.decision == Decision::Recreate)
        .count();
    if destructive > 0 {
        let _ = writeln!(
            out,
            "{} step(s) would destroy existing state and need confirmation",
            destructive
        );
    }
    out
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or("")
}

fn format_duration(ms: u64) -> String {
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}

// ── persistence ───────────────────────────────────────────────────────────

/// Write the JSON report; returns the per-run file path.
pub async fn write_report(state_dir: &Path, report: &RunReport) -> Result<PathBuf> {
    let runs = state_dir.join("runs");
    tokio::fs::create_dir_all(&runs).await?;

    let json = serde_json::to_string_pretty(report)?;
    let path = runs.join(format!("{}.json", report.run_id));
    tokio::fs::write(&path, &json).await?;
    tokio::fs::write(state_dir.join(LAST_RUN_FILE), &json).await?;
    Ok(path)
}

/// Most recent report, if any run has been recorded.
pub async fn read_last_report(state_dir: &Path) -> Result<Option<RunReport>> {
    let path = state_dir.join(LAST_RUN_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ProvisionError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::Assessment;
    use crate::step::StepResult;
    use tempfile::tempdir;

    fn sample() -> RunReport {
        let mut report = RunReport::new("sd", "/opt/sd");
        report.start();
        report.record(StepResult::new(
            "Models dir",
            StepStatus::Succeeded,
            "created /opt/sd/models",
            true,
            Decision::Proceed,
            12,
        ));
        report.record(StepResult::new(
            "xformers",
            StepStatus::Failed,
            "`pip` exited with code 1:\nno matching distribution",
            false,
            Decision::Proceed,
            2_500,
        ));
        report.complete();
        report
    }

    #[test]
    fn test_render_text() {
        let text = render_text(&sample());
        assert!(text.contains("✓ Models dir"));
        assert!(text.contains("✗ xformers"));
        assert!(text.contains("2.5s"));
        assert!(text.contains("1 succeeded, 0 skipped, 1 failed"));
        assert!(text.contains("Optional steps failed: xformers"));
        assert!(text.contains(": completed"));
        // Diagnostic lines of failed steps follow the row, indented
        assert!(text.contains("\n      no matching distribution\n"));
    }

    #[test]
    fn test_render_aborted() {
        let mut report = RunReport::new("sd", "/opt/sd");
        report.start();
        report.abort("mandatory step 'env' failed: boom");
        let text = render_text(&report);
        assert!(text.contains("aborted (mandatory step 'env' failed: boom)"));
    }

    #[test]
    fn test_render_plan() {
        let planned = vec![
            PlannedStep {
                name: "env".to_string(),
                mandatory: true,
                assessment: Assessment::Partial,
                decision: Decision::Recreate,
                probe_error: None,
            },
            PlannedStep {
                name: "accel".to_string(),
                mandatory: false,
                assessment: Assessment::Absent,
                decision: Decision::Proceed,
                probe_error: Some("boom".to_string()),
            },
        ];
        let text = render_plan(&planned);
        assert!(text.contains("RECREATE  env"));
        assert!(text.contains("run       accel (optional)  [probe failed: boom]"));
        assert!(text.contains("1 step(s) would destroy"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(5), "5ms");
        assert_eq!(format_duration(1_500), "1.5s");
        assert_eq!(format_duration(125_000), "2m05s");
    }

    #[tokio::test]
    async fn test_write_and_read_last_report() {
        let dir = tempdir().unwrap();
        assert!(read_last_report(dir.path()).await.unwrap().is_none());

        let report = sample();
        let path = write_report(dir.path(), &report).await.unwrap();
        assert!(path.ends_with(format!("runs/{}.json", report.run_id)));

        let last = read_last_report(dir.path()).await.unwrap().unwrap();
        assert_eq!(last, report);
    }
}
