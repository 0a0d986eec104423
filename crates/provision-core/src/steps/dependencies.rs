use super::{execute, path_str};
use crate::context::RunContext;
use crate::error::Result;
use crate::step::{fingerprint_parts, Presence, Step, StepPolicy};
use async_trait::async_trait;
use provision_env::CommandSpec;
use std::path::PathBuf;
use tracing::info;

/// Python packages installed with pip inside the project environment.
///
/// pip has no cheap way to confirm a whole requirement set, so presence
/// is decided by the stamp alone.
#[derive(Debug, Clone)]
pub struct DependenciesStep {
    name: String,
    policy: StepPolicy,
    packages: Vec<String>,
    requirements: Vec<PathBuf>,
    editable: Vec<PathBuf>,
    index_url: Option<String>,
    extra_index_url: Option<String>,
    extra_args: Vec<String>,
    cwd: Option<PathBuf>,
    timeout_secs: u64,
}

impl DependenciesStep {
    pub fn new(name: impl Into<String>, policy: StepPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            packages: Vec::new(),
            requirements: Vec::new(),
            editable: Vec::new(),
            index_url: None,
            extra_index_url: None,
            extra_args: Vec::new(),
            cwd: None,
            timeout_secs: 0,
        }
    }

    pub fn packages(mut self, packages: Vec<String>) -> Self {
        self.packages = packages;
        self
    }

    pub fn requirement(mut self, file: impl Into<PathBuf>) -> Self {
        self.requirements.push(file.into());
        self
    }

    pub fn editable(mut self, path: impl Into<PathBuf>) -> Self {
        self.editable.push(path.into());
        self
    }

    pub fn index_url(mut self, url: impl Into<String>) -> Self {
        self.index_url = Some(url.into());
        self
    }

    pub fn extra_index_url(mut self, url: impl Into<String>) -> Self {
        self.extra_index_url = Some(url.into());
        self
    }

    pub fn extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// pip invocation before it is wrapped for the environment.
    pub fn pip_argv(&self) -> Vec<String> {
        let mut argv: Vec<String> = ["python", "-m", "pip", "install"]
            .into_iter()
            .map(String::from)
            .collect();
        if let Some(url) = &self.index_url {
            argv.push("--index-url".to_string());
            argv.push(url.clone());
        }
        if let Some(url) = &self.extra_index_url {
            argv.push("--extra-index-url".to_string());
            argv.push(url.clone());
        }
        argv.extend(self.extra_args.iter().cloned());
        for file in &self.requirements {
            argv.push("-r".to_string());
            argv.push(path_str(file));
        }
        for path in &self.editable {
            argv.push("-e".to_string());
            argv.push(path_str(path));
        }
        argv.extend(self.packages.iter().cloned());
        argv
    }
}

#[async_trait]
impl Step for DependenciesStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> StepPolicy {
        self.policy
    }

    fn fingerprint(&self) -> String {
        let mut parts = vec!["dependencies".to_string()];
        parts.extend(self.pip_argv());
        parts.push(format!("cwd={:?}", self.cwd));
        fingerprint_parts(parts)
    }

    async fn probe(&self, _ctx: &RunContext) -> Result<Presence> {
        Ok(Presence::Unknown)
    }

    async fn apply(&self, ctx: &RunContext) -> Result<String> {
        let mut spec = CommandSpec::new(ctx.in_env(&self.pip_argv())).timeout(self.timeout_secs);
        if let Some(cwd) = &self.cwd {
            spec = spec.current_dir(cwd);
        }
        info!(env = %ctx.env_name(), step = %self.name, "Installing Python dependencies");
        let output = execute(spec).await?;
        let count = self.packages.len() + self.requirements.len() + self.editable.len();
        Ok(format!(
            "installed {} requirement source(s) in {}ms",
            count, output.duration_ms
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provision_env::VenvManager;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_pip_argv() {
        let step = DependenciesStep::new("deps", StepPolicy::mandatory())
            .index_url("https://download.pytorch.org/whl/cu118")
            .requirement("/t/src/requirements.txt")
            .editable("/t/src")
            .packages(vec!["torch==2.0.1".to_string()])
            .extra_args(vec!["--no-cache-dir".to_string()]);
        assert_eq!(
            step.pip_argv().join(" "),
            "python -m pip install --index-url https://download.pytorch.org/whl/cu118 \
             --no-cache-dir -r /t/src/requirements.txt -e /t/src torch==2.0.1"
        );
    }

    #[tokio::test]
    async fn test_probe_is_stamp_only() {
        let dir = tempdir().unwrap();
        let ctx = RunContext::new(
            "t",
            dir.path(),
            "env",
            "",
            Arc::new(VenvManager::new(dir.path().join("envs"))),
            BTreeMap::new(),
        )
        .unwrap();
        let step = DependenciesStep::new("deps", StepPolicy::optional());
        assert_eq!(step.probe(&ctx).await.unwrap(), Presence::Unknown);
    }

    #[test]
    fn test_fingerprint_tracks_packages() {
        let a = DependenciesStep::new("d", StepPolicy::mandatory()).packages(vec!["a".into()]);
        let b = DependenciesStep::new("d", StepPolicy::mandatory()).packages(vec!["b".into()]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
