//! Provisioner Core Library
//!
//! Runs an ordered list of idempotent provisioning steps against a host:
//! each step is probed, skipped when already satisfied, applied (or torn
//! down and rebuilt after confirmation) otherwise, and every outcome lands
//! in a run report.

pub mod config;
pub mod confirm;
pub mod context;
pub mod error;
pub mod executor;
pub mod fakes;
pub mod fetch;
pub mod guard;
pub mod launcher;
pub mod obs;
pub mod registry;
pub mod report;
pub mod run;
pub mod step;
pub mod steps;
pub mod telemetry;

pub use config::{
    EnvironmentSpec, LauncherConfig, Overrides, ProjectConfig, ProvisionConfig, StepKind, StepSpec,
};
pub use confirm::{default_confirmer, AssumeYes, Confirm, Decline, DestructiveAction, TerminalPrompt};
pub use context::RunContext;
pub use error::{ProvisionError, Result};
pub use executor::{BestEffortExecutor, Execution};
pub use fetch::{
    ArtifactDescriptor, ArtifactFetcher, FetchOutcome, HttpTransport, PresenceCheck, Transport,
};
pub use guard::{classify, Assessment, GuardVerdict, IdempotencyGuard, StampStore};
pub use registry::{PlannedStep, StepRegistry};
pub use run::{RunReport, RunState};
pub use step::{
    Decision, ExistsPolicy, FailurePolicy, Presence, Step, StepPolicy, StepResult, StepStatus,
};
pub use steps::build_registry;
pub use telemetry::init_tracing;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
