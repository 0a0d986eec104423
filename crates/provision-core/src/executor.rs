//! Best-effort step execution.
//!
//! Runs one step under the guard's decision. Mandatory failures and
//! declined destructive actions produce an abort signal; optional
//! failures are recorded and the run moves on.

use crate::confirm::{Confirm, DestructiveAction};
use crate::context::RunContext;
use crate::error::ProvisionError;
use crate::guard::IdempotencyGuard;
use crate::step::{Decision, Step, StepResult, StepStatus};
use std::time::Instant;
use tracing::{info, warn};

/// Result of executing a single step.
#[derive(Debug)]
pub struct Execution {
    /// Record to append to the run log.
    pub result: StepResult,
    /// Set when the whole run must stop.
    pub abort: Option<ProvisionError>,
}

impl Execution {
    fn keep_going(result: StepResult) -> Self {
        Self {
            result,
            abort: None,
        }
    }
}

/// Executes steps one at a time.
pub struct BestEffortExecutor<'a> {
    guard: &'a IdempotencyGuard,
    confirmer: &'a dyn Confirm,
}

impl<'a> BestEffortExecutor<'a> {
    pub fn new(guard: &'a IdempotencyGuard, confirmer: &'a dyn Confirm) -> Self {
        Self { guard, confirmer }
    }

    pub async fn execute(&self, step: &dyn Step, ctx: &RunContext) -> Execution {
        let start = Instant::now();
        let name = step.name().to_string();
        let mandatory = step.policy().is_mandatory();
        let verdict = self.guard.assess(step, ctx).await;
        let elapsed = |start: Instant| start.elapsed().as_millis() as u64;

        if verdict.decision == Decision::Skip {
            info!(step = %name, "Already satisfied, skipping");
            return Execution::keep_going(StepResult::new(
                name,
                StepStatus::Skipped,
                "already satisfied",
                mandatory,
                Decision::Skip,
                elapsed(start),
            ));
        }

        if verdict.decision == Decision::Recreate {
            let action = DestructiveAction {
                step: name.clone(),
                target: step.teardown_target(ctx),
            };
            warn!(step = %name, target = %action.target, "Existing state will be destroyed and rebuilt");

            if !self.confirmer.confirm(&action).await {
                warn!(step = %name, "Recreation declined by operator");
                return Execution {
                    result: StepResult::new(
                        name.clone(),
                        StepStatus::Failed,
                        format!("recreation of {} declined by operator", action.target),
                        mandatory,
                        Decision::Recreate,
                        elapsed(start),
                    ),
                    abort: Some(ProvisionError::DestructiveActionDeclined { step: name }),
                };
            }

            // A torn-down target must not look satisfied if the rebuild fails
            if let Err(e) = self.guard.invalidate(step).await {
                warn!(step = %name, error = %e, "Failed to clear stamp");
            }
            if let Err(e) = step.teardown(ctx).await {
                let probe_error = verdict.probe_error.as_deref();
                return self.failure(step, e, probe_error, Decision::Recreate, elapsed(start));
            }
        }

        info!(step = %name, decision = verdict.decision.as_str(), "Applying step");
        match step.apply(ctx).await {
            Ok(message) => {
                if let Err(e) = self.guard.mark_done(step).await {
                    warn!(step = %name, error = %e, "Failed to write stamp; step will rerun next time");
                }
                let message = with_probe_note(message, verdict.probe_error.as_deref());
                Execution::keep_going(StepResult::new(
                    name,
                    StepStatus::Succeeded,
                    message,
                    mandatory,
                    verdict.decision,
                    elapsed(start),
                ))
            }
            Err(e) => self.failure(
                step,
                e,
                verdict.probe_error.as_deref(),
                verdict.decision,
                elapsed(start),
            ),
        }
    }

    fn failure(
        &self,
        step: &dyn Step,
        error: ProvisionError,
        probe_error: Option<&str>,
        decision: Decision,
        duration_ms: u64,
    ) -> Execution {
        let name = step.name().to_string();
        let diagnostic = with_probe_note(error.diagnostic(), probe_error);
        let mandatory = step.policy().is_mandatory();
        let result = StepResult::new(
            name.clone(),
            StepStatus::Failed,
            diagnostic.clone(),
            mandatory,
            decision,
            duration_ms,
        );

        if mandatory {
            tracing::error!(step = %name, error = %diagnostic, "Mandatory step failed, aborting run");
            Execution {
                result,
                abort: Some(ProvisionError::MandatoryStepFailure {
                    step: name,
                    diagnostic,
                }),
            }
        } else {
            let error = ProvisionError::OptionalStepFailure {
                step: name,
                diagnostic,
            };
            warn!(error = %error, "Optional step failed, continuing");
            Execution::keep_going(result)
        }
    }
}

/// Keeps a swallowed precondition error visible in the step message.
fn with_probe_note(message: String, probe_error: Option<&str>) -> String {
    match probe_error {
        Some(probe_error) => format!("{} (precondition check failed: {})", message, probe_error),
        None => message,
    }
}
