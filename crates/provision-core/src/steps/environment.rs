use crate::context::RunContext;
use crate::error::Result;
use crate::guard::StampStore;
use crate::step::{Presence, Step, StepPolicy};
use async_trait::async_trait;
use provision_env::{environment_fingerprint, BackendKind};
use tracing::{debug, info};

/// The project's isolated environment (conda env or venv).
///
/// Steps installing into the environment are listed as dependents; their
/// stamps are cleared whenever the environment is (re)created so they
/// never skip against an empty environment.
#[derive(Debug, Clone)]
pub struct EnvironmentStep {
    name: String,
    policy: StepPolicy,
    backend: BackendKind,
    env_name: String,
    runtime_version: String,
    packages: Vec<String>,
    dependents: Vec<String>,
}

impl EnvironmentStep {
    pub fn new(
        name: impl Into<String>,
        policy: StepPolicy,
        env_name: impl Into<String>,
        runtime_version: impl Into<String>,
        packages: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            backend: BackendKind::default(),
            env_name: env_name.into(),
            runtime_version: runtime_version.into(),
            packages,
            dependents: Vec::new(),
        }
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_dependents(mut self, dependents: Vec<String>) -> Self {
        self.dependents = dependents;
        self
    }
}

#[async_trait]
impl Step for EnvironmentStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> StepPolicy {
        self.policy
    }

    fn fingerprint(&self) -> String {
        environment_fingerprint(
            self.backend,
            &self.env_name,
            &self.runtime_version,
            &self.packages,
        )
    }

    async fn probe(&self, ctx: &RunContext) -> Result<Presence> {
        let exists = ctx.env_manager().exists(&self.env_name).await?;
        Ok(if exists {
            Presence::Present
        } else {
            Presence::Absent
        })
    }

    async fn apply(&self, ctx: &RunContext) -> Result<String> {
        let manager = ctx.env_manager();
        let output = manager
            .create(&self.env_name, &self.runtime_version, &self.packages)
            .await?;

        let stamps = StampStore::new(ctx.stamps_dir());
        for dependent in &self.dependents {
            debug!(step = %dependent, "Clearing stamp of environment dependent");
            stamps.clear(dependent).await?;
        }

        info!(env = %self.env_name, backend = %manager.kind(), "Environment ready");
        Ok(format!(
            "created {} environment '{}' in {}ms",
            manager.kind(),
            self.env_name,
            output.duration_ms
        ))
    }

    async fn teardown(&self, ctx: &RunContext) -> Result<()> {
        Ok(ctx.env_manager().remove(&self.env_name).await?)
    }

    fn teardown_target(&self, ctx: &RunContext) -> String {
        format!("{} environment '{}'", ctx.env_manager().kind(), self.env_name)
    }

    fn supports_recreate(&self) -> bool {
        true
    }
}
