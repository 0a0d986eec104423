//! Provisioning step contract and per-step outcome types.

use crate::context::RunContext;
use crate::error::{ProvisionError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What happens to the run when a step fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Halt the whole run (mandatory step).
    Abort,
    /// Record the failure and continue (optional step).
    WarnAndContinue,
}

/// What happens when the step's target already exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExistsPolicy {
    /// Existing state is kept and the step is skipped.
    #[default]
    Reuse,
    /// Existing state without a matching stamp is torn down and rebuilt.
    Recreate,
}

/// Execution policy of a step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StepPolicy {
    pub failure: FailurePolicy,
    pub on_exists: ExistsPolicy,
}

impl StepPolicy {
    pub fn new(mandatory: bool, on_exists: ExistsPolicy) -> Self {
        Self {
            failure: if mandatory {
                FailurePolicy::Abort
            } else {
                FailurePolicy::WarnAndContinue
            },
            on_exists,
        }
    }

    pub fn mandatory() -> Self {
        Self::new(true, ExistsPolicy::Reuse)
    }

    pub fn optional() -> Self {
        Self::new(false, ExistsPolicy::Reuse)
    }

    pub fn recreate(mut self) -> Self {
        self.on_exists = ExistsPolicy::Recreate;
        self
    }

    pub fn is_mandatory(&self) -> bool {
        self.failure == FailurePolicy::Abort
    }
}

/// Result of a step's precondition probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// Target state observed on the host.
    Present,
    /// Target state observed to be missing.
    Absent,
    /// The step has no way to observe its target; the stamp decides.
    Unknown,
}

/// A named provisioning action.
///
/// `probe` is the precondition and must not change host state. `apply`
/// may mutate the host. `teardown` is only called on recreation, after
/// the operator confirmed it.
#[async_trait]
pub trait Step: Send + Sync {
    /// Unique step name.
    fn name(&self) -> &str;

    /// Failure and existence policy.
    fn policy(&self) -> StepPolicy;

    /// Digest of everything that defines this step's desired state.
    fn fingerprint(&self) -> String;

    /// Observe whether the target state exists.
    async fn probe(&self, ctx: &RunContext) -> Result<Presence>;

    /// Bring the host into the target state. Returns a short message.
    async fn apply(&self, ctx: &RunContext) -> Result<String>;

    /// Remove existing state before recreation.
    async fn teardown(&self, _ctx: &RunContext) -> Result<()> {
        Err(ProvisionError::RecreateUnsupported {
            step: self.name().to_string(),
        })
    }

    /// Human-readable description of what `teardown` destroys.
    fn teardown_target(&self, _ctx: &RunContext) -> String {
        self.name().to_string()
    }

    fn supports_recreate(&self) -> bool {
        false
    }
}

/// Outcome status of a step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Skipped,
    Succeeded,
    Failed,
}

impl StepStatus {
    pub fn glyph(&self) -> &'static str {
        match self {
            StepStatus::Skipped => "-",
            StepStatus::Succeeded => "✓",
            StepStatus::Failed => "✗",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Skipped => "skipped",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
        }
    }
}

/// Guard decision applied to a step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Already satisfied.
    Skip,
    /// Partially satisfied: tear down, then apply.
    Recreate,
    /// Absent: apply.
    Proceed,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Skip => "skip",
            Decision::Recreate => "recreate",
            Decision::Proceed => "proceed",
        }
    }
}

/// Immutable record of one executed step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step_name: String,
    pub status: StepStatus,
    pub message: String,
    pub mandatory: bool,
    pub decision: Decision,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl StepResult {
    pub fn new(
        step_name: impl Into<String>,
        status: StepStatus,
        message: impl Into<String>,
        mandatory: bool,
        decision: Decision,
        duration_ms: u64,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            status,
            message: message.into(),
            mandatory,
            decision,
            duration_ms,
            finished_at: Utc::now(),
        }
    }

    /// A failure that halts the run.
    pub fn is_fatal(&self) -> bool {
        self.status == StepStatus::Failed && self.mandatory
    }
}

/// Compute a deterministic digest of ordered string parts.
pub fn fingerprint_parts<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref().as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
