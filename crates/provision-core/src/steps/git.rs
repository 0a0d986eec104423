use super::{execute, path_str, remove_tree};
use crate::context::RunContext;
use crate::error::Result;
use crate::step::{fingerprint_parts, Presence, Step, StepPolicy};
use async_trait::async_trait;
use provision_env::CommandSpec;
use std::path::PathBuf;
use tracing::info;

/// Clone of a source repository.
#[derive(Debug, Clone)]
pub struct GitStep {
    name: String,
    policy: StepPolicy,
    url: String,
    dest: PathBuf,
    branch: Option<String>,
    depth: Option<u32>,
    recursive: bool,
    timeout_secs: u64,
}

impl GitStep {
    pub fn new(
        name: impl Into<String>,
        policy: StepPolicy,
        url: impl Into<String>,
        dest: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            url: url.into(),
            dest: dest.into(),
            branch: None,
            depth: None,
            recursive: false,
            timeout_secs: 0,
        }
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn depth(mut self, depth: Option<u32>) -> Self {
        self.depth = depth;
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn clone_command(&self) -> CommandSpec {
        let mut argv = vec!["git".to_string(), "clone".to_string()];
        if let Some(branch) = &self.branch {
            argv.push("--branch".to_string());
            argv.push(branch.clone());
        }
        if let Some(depth) = self.depth {
            argv.push("--depth".to_string());
            argv.push(depth.to_string());
        }
        if self.recursive {
            argv.push("--recurse-submodules".to_string());
        }
        argv.push(self.url.clone());
        argv.push(path_str(&self.dest));
        CommandSpec::new(argv).timeout(self.timeout_secs)
    }
}

#[async_trait]
impl Step for GitStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> StepPolicy {
        self.policy
    }

    fn fingerprint(&self) -> String {
        fingerprint_parts([
            "git".to_string(),
            self.url.clone(),
            path_str(&self.dest),
            self.branch.clone().unwrap_or_default(),
            self.depth.map(|d| d.to_string()).unwrap_or_default(),
            self.recursive.to_string(),
        ])
    }

    /// A non-empty destination counts as present even without `.git`;
    /// cloning into it would fail anyway.
    async fn probe(&self, _ctx: &RunContext) -> Result<Presence> {
        if self.dest.join(".git").exists() {
            return Ok(Presence::Present);
        }
        let mut entries = match tokio::fs::read_dir(&self.dest).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Presence::Absent),
            Err(e) => return Err(e.into()),
        };
        Ok(if entries.next_entry().await?.is_some() {
            Presence::Present
        } else {
            Presence::Absent
        })
    }

    async fn apply(&self, _ctx: &RunContext) -> Result<String> {
        if let Some(parent) = self.dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        info!(url = %self.url, dest = ?self.dest, "Cloning repository");
        execute(self.clone_command()).await?;
        Ok(format!("cloned {} into {}", self.url, self.dest.display()))
    }

    async fn teardown(&self, _ctx: &RunContext) -> Result<()> {
        remove_tree(&self.dest).await
    }

    fn teardown_target(&self, _ctx: &RunContext) -> String {
        format!("checkout {}", self.dest.display())
    }

    fn supports_recreate(&self) -> bool {
        true
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
    fn test_clone_command() {
        let step = GitStep::new("src", StepPolicy::mandatory(), "https://h/r.git", "/t/src")
            .branch("v1.0")
            .depth(Some(1))
            .recursive(true);
        assert_eq!(
            step.clone_command().display(),
            "git clone --branch v1.0 --depth 1 --recurse-submodules https://h/r.git /t/src"
        );

        let plain = GitStep::new("src", StepPolicy::mandatory(), "https://h/r.git", "/t/src");
        assert_eq!(plain.clone_command().display(), "git clone https://h/r.git /t/src");
    }

    #[tokio::test]
    async fn test_probe() {
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
        let dest = dir.path().join("src");
        let step = GitStep::new("src", StepPolicy::mandatory(), "https://h/r.git", &dest);

        assert_eq!(step.probe(&ctx).await.unwrap(), Presence::Absent);
        std::fs::create_dir_all(&dest).unwrap();
        assert_eq!(step.probe(&ctx).await.unwrap(), Presence::Absent);
        std::fs::create_dir_all(dest.join(".git")).unwrap();
        assert_eq!(step.probe(&ctx).await.unwrap(), Presence::Present);

        step.teardown(&ctx).await.unwrap();
        assert!(!dest.exists());
    }

    #[test]
    fn test_fingerprint_tracks_branch() {
        let a = GitStep::new("src", StepPolicy::mandatory(), "u", "/d").branch("main");
        let b = GitStep::new("src", StepPolicy::mandatory(), "u", "/d").branch("dev");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
