//! Step registry: ordered, strictly sequential execution of a run.

use crate::confirm::Confirm;
use crate::context::RunContext;
use crate::error::{ProvisionError, Result};
use crate::executor::BestEffortExecutor;
use crate::guard::{slug, Assessment, IdempotencyGuard};
use crate::obs;
use crate::run::RunReport;
use crate::step::{Decision, Step};
use serde::Serialize;
use tracing::{info, Instrument};

/// Dry-run verdict for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStep {
    pub name: String,
    pub mandatory: bool,
    pub assessment: Assessment,
    pub decision: Decision,
    pub probe_error: Option<String>,
}

/// Ordered collection of provisioning steps.
#[derive(Default)]
pub struct StepRegistry {
    steps: Vec<Box<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. Names must be unique, also after slugging, since
    /// they key the stamp files.
    pub fn push(&mut self, step: Box<dyn Step>) -> Result<()> {
        let new_slug = slug(step.name());
        if new_slug.is_empty() {
            return Err(ProvisionError::Config(format!(
                "step name '{}' has no usable characters",
                step.name()
            )));
        }
        if let Some(existing) = self.steps.iter().find(|s| slug(s.name()) == new_slug) {
            return Err(ProvisionError::Config(format!(
                "step name '{}' collides with '{}'",
                step.name(),
                existing.name()
            )));
        }
        self.steps.push(step);
        Ok(())
    }

    pub fn with_step(mut self, step: impl Step + 'static) -> Result<Self> {
        self.push(Box::new(step))?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Execute every step in order, stopping at the first abort.
    pub async fn run_all(&self, ctx: &RunContext, confirmer: &dyn Confirm) -> RunReport {
        let mut report = RunReport::new(ctx.project(), ctx.target_dir().to_string_lossy());
        let span = obs::run_span(&report.run_id, ctx.project());
        async {
            let guard = IdempotencyGuard::for_context(ctx);
            let executor = BestEffortExecutor::new(&guard, confirmer);

            report.start();
            obs::emit_run_started(&report.run_id, ctx.project(), self.steps.len());

            let mut abort = None;
            for step in &self.steps {
                let execution = executor.execute(step.as_ref(), ctx).await;
                obs::emit_step_finished(&report.run_id, &execution.result);
                report.record(execution.result);
                if let Some(reason) = execution.abort {
                    abort = Some(reason);
                    break;
                }
            }

            match abort {
                Some(reason) => {
                    obs::emit_run_aborted(&report.run_id, &reason);
                    report.abort(reason.to_string());
                }
                None => report.complete(),
            }
            obs::emit_run_finished(&report);
        }
        .instrument(span)
        .await;

        report
    }

    /// Probe every step without changing anything.
    ///
    /// Later steps are probed against the current host, so a step that
    /// depends on an earlier one may show `proceed` even though the
    /// earlier step would satisfy it.
    pub async fn plan(&self, ctx: &RunContext) -> Vec<PlannedStep> {
        let guard = IdempotencyGuard::for_context(ctx);
        let mut planned = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let verdict = guard.assess(step.as_ref(), ctx).await;
            planned.push(PlannedStep {
                name: step.name().to_string(),
                mandatory: step.policy().is_mandatory(),
                assessment: verdict.assessment,
                decision: verdict.decision,
                probe_error: verdict.probe_error,
            });
        }
        info!(
            steps = planned.len(),
            destructive = planned.iter().filter(|p| p.decision == Decision::Recreate).count(),
            "Plan computed"
        );
        planned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{Journal, ScriptedStep};

    #[test]
    fn test_duplicate_names_rejected() {
        let journal = Journal::new();
        let mut registry = StepRegistry::new();
        registry
            .push(Box::new(ScriptedStep::new("Fetch model", &journal)))
            .unwrap();
        let err = registry
            .push(Box::new(ScriptedStep::new("fetch-model", &journal)))
            .unwrap_err();
        assert!(err.to_string().contains("collides"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unusable_name_rejected() {
        let journal = Journal::new();
        let mut registry = StepRegistry::new();
        assert!(registry
            .push(Box::new(ScriptedStep::new("///", &journal)))
            .is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_names_keep_order() {
        let journal = Journal::new();
        let registry = StepRegistry::new()
            .with_step(ScriptedStep::new("b", &journal))
            .unwrap()
            .with_step(ScriptedStep::new("a", &journal))
            .unwrap();
        assert_eq!(registry.names(), vec!["b", "a"]);
    }
}
