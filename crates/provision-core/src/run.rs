//! Run lifecycle and the ordered run log.

use crate::step::{StepResult, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a run: `Pending → Running → {Completed, Aborted}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Pending, RunState::Running)
                | (RunState::Pending, RunState::Aborted)
                | (RunState::Running, RunState::Completed)
                | (RunState::Running, RunState::Aborted)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Aborted => "aborted",
        }
    }
}

/// Record of one provisioning run.
///
/// Step results are only ever appended; existing entries are never
/// modified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    pub project: String,
    pub target_dir: String,
    pub state: RunState,
    pub abort_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    steps: Vec<StepResult>,
}

impl RunReport {
    pub fn new(project: impl Into<String>, target_dir: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            project: project.into(),
            target_dir: target_dir.into(),
            state: RunState::Pending,
            abort_reason: None,
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
        }
    }

    /// Ordered step results.
    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    pub(crate) fn record(&mut self, result: StepResult) {
        self.steps.push(result);
    }

    pub(crate) fn start(&mut self) {
        self.transition(RunState::Running);
        self.started_at = Utc::now();
    }

    pub(crate) fn complete(&mut self) {
        self.transition(RunState::Completed);
    }

    pub(crate) fn abort(&mut self, reason: impl Into<String>) {
        self.transition(RunState::Aborted);
        self.abort_reason = Some(reason.into());
    }

    fn transition(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal run transition {:?} -> {:?}",
            self.state,
            next
        );
        if self.state.can_transition_to(next) {
            self.state = next;
            if next.is_terminal() {
                self.finished_at = Some(Utc::now());
            }
        }
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    pub fn succeeded_count(&self) -> usize {
        self.count(StepStatus::Succeeded)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(StepStatus::Skipped)
    }

    pub fn failed_count(&self) -> usize {
        self.count(StepStatus::Failed)
    }

    /// Optional steps that failed without halting the run.
    pub fn optional_failures(&self) -> impl Iterator<Item = &StepResult> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed && !s.mandatory)
    }

    pub fn duration_ms(&self) -> u64 {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }

    /// Process exit status: 0 only for a completed run.
    pub fn exit_code(&self) -> i32 {
        match self.state {
            RunState::Completed => 0,
            _ => 1,
        }
    }
}
