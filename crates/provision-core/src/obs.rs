//! Structured observability hooks for the provisioning run lifecycle.
//!
//! Provides a run-scoped span and emission functions for run start,
//! per-step outcome, and run end.

use crate::run::RunReport;
use crate::step::{StepResult, StepStatus};
use tracing::{info, warn};

/// Span tagging everything logged during a run with its id and project.
///
/// Attach it to the run future with `tracing::Instrument`.
pub fn run_span(run_id: &str, project: &str) -> tracing::Span {
    tracing::info_span!("provision.run", run_id = %run_id, project = %project)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, project: &str, steps: usize) {
    info!(event = "run.started", run_id = %run_id, project = %project, steps = steps);
}

/// Emit event: one step finished.
pub fn emit_step_finished(run_id: &str, result: &StepResult) {
    match result.status {
        StepStatus::Failed => warn!(
            event = "step.finished",
            run_id = %run_id,
            step = %result.step_name,
            status = result.status.as_str(),
            mandatory = result.mandatory,
            duration_ms = result.duration_ms,
        ),
        _ => info!(
            event = "step.finished",
            run_id = %run_id,
            step = %result.step_name,
            status = result.status.as_str(),
            decision = result.decision.as_str(),
            duration_ms = result.duration_ms,
        ),
    }
}

/// Emit event: run reached a terminal state.
pub fn emit_run_finished(report: &RunReport) {
    info!(
        event = "run.finished",
        run_id = %report.run_id,
        state = report.state.as_str(),
        succeeded = report.succeeded_count(),
        skipped = report.skipped_count(),
        failed = report.failed_count(),
        duration_ms = report.duration_ms(),
    );
}

/// Emit event: run aborted (warning level).
pub fn emit_run_aborted(run_id: &str, reason: &dyn std::fmt::Display) {
    warn!(event = "run.aborted", run_id = %run_id, reason = %reason);
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::step::Decision;

    #[test]
    fn test_run_span_create() {
        let span = run_span("test-run-id", "demo");
        let _entered = span.enter();
    }

    #[test]
    fn test_emitters_do_not_panic_without_subscriber() {
        let result = StepResult::new("s", StepStatus::Failed, "x", false, Decision::Proceed, 1);
        emit_step_finished("r", &result);
        emit_run_finished(&RunReport::new("p", "/t"));
        emit_run_aborted("r", &"reason");
    }
}
