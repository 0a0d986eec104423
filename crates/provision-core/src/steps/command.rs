use super::{execute, probe_exit};
use crate::context::RunContext;
use crate::error::Result;
use crate::step::{fingerprint_parts, Presence, Step, StepPolicy};
use async_trait::async_trait;
use provision_env::{is_binary_available, CommandSpec};
use std::path::PathBuf;

/// Arbitrary command line.
///
/// Presence comes from `requires_binary` (executable on PATH) or from a
/// `check` command exiting 0. Without either, only the stamp knows.
#[derive(Debug, Clone)]
pub struct CommandStep {
    name: String,
    policy: StepPolicy,
    argv: Vec<String>,
    check: Option<Vec<String>>,
    requires_binary: Option<String>,
    cwd: Option<PathBuf>,
    in_env: bool,
    env: Vec<(String, String)>,
    timeout_secs: u64,
}

impl CommandStep {
    pub fn new(name: impl Into<String>, policy: StepPolicy, argv: Vec<String>) -> Self {
        Self {
            name: name.into(),
            policy,
            argv,
            check: None,
            requires_binary: None,
            cwd: None,
            in_env: false,
            env: Vec::new(),
            timeout_secs: 0,
        }
    }

    pub fn check(mut self, argv: Vec<String>) -> Self {
        self.check = Some(argv);
        self
    }

    pub fn requires_binary(mut self, binary: impl Into<String>) -> Self {
        self.requires_binary = Some(binary.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn in_env(mut self, in_env: bool) -> Self {
        self.in_env = in_env;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn spec(&self, ctx: &RunContext, argv: &[String]) -> CommandSpec {
        let argv = if self.in_env {
            ctx.in_env(argv)
        } else {
            argv.to_vec()
        };
        let mut spec = CommandSpec::new(argv).timeout(self.timeout_secs);
        if let Some(cwd) = &self.cwd {
            spec = spec.current_dir(cwd);
        }
        for (key, value) in &self.env {
            spec = spec.env(key, value);
        }
        spec
    }
}

#[async_trait]
impl Step for CommandStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> StepPolicy {
        self.policy
    }

    fn fingerprint(&self) -> String {
        let mut parts = vec!["command".to_string()];
        parts.extend(self.argv.iter().cloned());
        parts.push(format!("check={:?}", self.check));
        parts.push(format!("cwd={:?}", self.cwd));
        parts.push(format!("in_env={}", self.in_env));
        parts.extend(self.env.iter().map(|(k, v)| format!("{}={}", k, v)));
        fingerprint_parts(parts)
    }

    async fn probe(&self, ctx: &RunContext) -> Result<Presence> {
        if let Some(binary) = &self.requires_binary {
            return Ok(if is_binary_available(binary) {
                Presence::Present
            } else {
                Presence::Absent
            });
        }
        match &self.check {
            Some(check) => {
                let present = probe_exit(&self.name, self.spec(ctx, check)).await?;
                Ok(if present {
                    Presence::Present
                } else {
                    Presence::Absent
                })
            }
            None => Ok(Presence::Unknown),
        }
    }

    async fn apply(&self, ctx: &RunContext) -> Result<String> {
        let spec = self.spec(ctx, &self.argv);
        let output = execute(spec).await?;
        Ok(format!("ran `{}` in {}ms", self.argv.join(" "), output.duration_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provision_env::VenvManager;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn ctx(dir: &std::path::Path) -> RunContext {
        RunContext::new(
            "t",
            dir,
            "env",
            "",
            Arc::new(VenvManager::new(dir.join("envs"))),
            BTreeMap::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_probe_without_check_is_unknown() {
        let dir = tempdir().unwrap();
        let step = CommandStep::new("c", StepPolicy::mandatory(), argv(&["true"]));
        assert_eq!(step.probe(&ctx(dir.path())).await.unwrap(), Presence::Unknown);
    }

    #[tokio::test]
    async fn test_probe_uses_check_exit_code() {
        let dir = tempdir().unwrap();
        let ctx = ctx(dir.path());
        let present = CommandStep::new("c", StepPolicy::mandatory(), argv(&["true"]))
            .check(argv(&["true"]));
        let absent = CommandStep::new("c", StepPolicy::mandatory(), argv(&["true"]))
            .check(argv(&["false"]));
        assert_eq!(present.probe(&ctx).await.unwrap(), Presence::Present);
        assert_eq!(absent.probe(&ctx).await.unwrap(), Presence::Absent);
    }

    #[tokio::test]
    async fn test_probe_missing_check_binary_is_error() {
        let dir = tempdir().unwrap();
        let step = CommandStep::new("c", StepPolicy::mandatory(), argv(&["true"]))
            .check(argv(&["definitely-not-a-real-binary-4242"]));
        assert!(step.probe(&ctx(dir.path())).await.is_err());
    }

    #[tokio::test]
    async fn test_requires_binary() {
        let dir = tempdir().unwrap();
        let ctx = ctx(dir.path());
        let sh = CommandStep::new("c", StepPolicy::mandatory(), argv(&["true"]))
            .requires_binary("sh");
        let missing = CommandStep::new("c", StepPolicy::mandatory(), argv(&["true"]))
            .requires_binary("definitely-not-a-real-binary-4242");
        assert_eq!(sh.probe(&ctx).await.unwrap(), Presence::Present);
        assert_eq!(missing.probe(&ctx).await.unwrap(), Presence::Absent);
    }

    #[tokio::test]
    async fn test_apply_runs_in_cwd_with_env() {
        let dir = tempdir().unwrap();
        let step = CommandStep::new(
            "write",
            StepPolicy::mandatory(),
            argv(&["sh", "-c", "printf %s \"$GREETING\" > out.txt"]),
        )
        .current_dir(dir.path())
        .env("GREETING", "hi");

        step.apply(&ctx(dir.path())).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_apply_failure_carries_diagnostic() {
        let dir = tempdir().unwrap();
        let step = CommandStep::new(
            "boom",
            StepPolicy::mandatory(),
            argv(&["sh", "-c", "echo broken >&2; exit 3"]),
        );
        let err = step.apply(&ctx(dir.path())).await.unwrap_err();
        let diagnostic = err.diagnostic();
        assert!(diagnostic.contains("code 3"));
        assert!(diagnostic.contains("broken"));
    }

    #[test]
    fn test_fingerprint_tracks_argv() {
        let a = CommandStep::new("c", StepPolicy::mandatory(), argv(&["pip", "install", "a"]));
        let b = CommandStep::new("c", StepPolicy::mandatory(), argv(&["pip", "install", "b"]));
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
    }
}
