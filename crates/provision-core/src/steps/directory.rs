use super::{path_str, remove_tree};
use crate::context::RunContext;
use crate::error::Result;
use crate::step::{fingerprint_parts, Presence, Step, StepPolicy};
use async_trait::async_trait;
use std::path::PathBuf;

/// A directory tree, e.g. the target directory or a models folder.
#[derive(Debug, Clone)]
pub struct DirectoryStep {
    name: String,
    policy: StepPolicy,
    path: PathBuf,
}

impl DirectoryStep {
    pub fn new(name: impl Into<String>, policy: StepPolicy, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            policy,
            path: path.into(),
        }
    }
}

#[async_trait]
impl Step for DirectoryStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> StepPolicy {
        self.policy
    }

    fn fingerprint(&self) -> String {
        fingerprint_parts(["directory".to_string(), path_str(&self.path)])
    }

    async fn probe(&self, _ctx: &RunContext) -> Result<Presence> {
        Ok(match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_dir() => Presence::Present,
            _ => Presence::Absent,
        })
    }

    async fn apply(&self, _ctx: &RunContext) -> Result<String> {
        tokio::fs::create_dir_all(&self.path).await?;
        Ok(format!("created {}", self.path.display()))
    }

    async fn teardown(&self, _ctx: &RunContext) -> Result<()> {
        remove_tree(&self.path).await
    }

    fn teardown_target(&self, _ctx: &RunContext) -> String {
        format!("directory {}", self.path.display())
    }

    fn supports_recreate(&self) -> bool {
        true
    }
}
