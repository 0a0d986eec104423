use super::{execute, path_str, probe_exit};
use crate::context::RunContext;
use crate::error::{ProvisionError, Result};
use crate::step::{fingerprint_parts, Presence, Step, StepPolicy};
use async_trait::async_trait;
use provision_env::CommandSpec;
use std::path::PathBuf;

/// A patch applied to a checkout with `git apply`.
///
/// Already applied means the patch reverses cleanly.
#[derive(Debug, Clone)]
pub struct PatchStep {
    name: String,
    policy: StepPolicy,
    patch: PathBuf,
    dir: PathBuf,
    timeout_secs: u64,
}

impl PatchStep {
    pub fn new(
        name: impl Into<String>,
        policy: StepPolicy,
        patch: impl Into<PathBuf>,
        dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            patch: patch.into(),
            dir: dir.into(),
            timeout_secs: 0,
        }
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn git_apply(&self, extra: &[&str]) -> CommandSpec {
        let mut argv = vec!["git".to_string(), "apply".to_string()];
        argv.extend(extra.iter().map(|s| s.to_string()));
        argv.push(path_str(&self.patch));
        CommandSpec::new(argv)
            .current_dir(&self.dir)
            .timeout(self.timeout_secs)
    }
}

#[async_trait]
impl Step for PatchStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> StepPolicy {
        self.policy
    }

    fn fingerprint(&self) -> String {
        fingerprint_parts(["patch".to_string(), path_str(&self.patch), path_str(&self.dir)])
    }

    async fn probe(&self, _ctx: &RunContext) -> Result<Presence> {
        if !self.dir.is_dir() {
            return Ok(Presence::Absent);
        }
        if !self.patch.is_file() {
            return Err(ProvisionError::PreconditionCheck {
                step: self.name.clone(),
                reason: format!("patch file {} not found", self.patch.display()),
            });
        }
        let applied = probe_exit(&self.name, self.git_apply(&["--reverse", "--check"])).await?;
        Ok(if applied {
            Presence::Present
        } else {
            Presence::Absent
        })
    }

    async fn apply(&self, _ctx: &RunContext) -> Result<String> {
        execute(self.git_apply(&[])).await?;
        Ok(format!("applied {} in {}", self.patch.display(), self.dir.display()))
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
    fn test_git_apply_command() {
        let step = PatchStep::new("fix", StepPolicy::mandatory(), "/p/fix.patch", "/t/src");
        let spec = step.git_apply(&["--reverse", "--check"]);
        assert_eq!(spec.display(), "git apply --reverse --check /p/fix.patch");
        assert_eq!(spec.cwd, Some(PathBuf::from("/t/src")));
    }

    #[tokio::test]
    async fn test_probe_without_checkout_is_absent() {
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
        let step = PatchStep::new(
            "fix",
            StepPolicy::mandatory(),
            dir.path().join("fix.patch"),
            dir.path().join("missing"),
        );
        assert_eq!(step.probe(&ctx).await.unwrap(), Presence::Absent);

        let existing = PatchStep::new("fix", StepPolicy::mandatory(), dir.path().join("fix.patch"), dir.path());
        assert!(matches!(
            existing.probe(&ctx).await,
            Err(ProvisionError::PreconditionCheck { .. })
        ));
    }
}
