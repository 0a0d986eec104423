use super::path_str;
use crate::context::RunContext;
use crate::error::Result;
use crate::fetch::{ArtifactDescriptor, ArtifactFetcher, FetchOutcome, Transport};
use crate::step::{fingerprint_parts, Presence, Step, StepPolicy};
use async_trait::async_trait;
use std::sync::Arc;

/// Large remote file such as model weights.
pub struct ArtifactStep {
    name: String,
    policy: StepPolicy,
    artifact: ArtifactDescriptor,
    fetcher: ArtifactFetcher<Arc<dyn Transport>>,
}

impl ArtifactStep {
    pub fn new(
        name: impl Into<String>,
        policy: StepPolicy,
        artifact: ArtifactDescriptor,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            artifact,
            fetcher: ArtifactFetcher::new(transport),
        }
    }

    pub fn artifact(&self) -> &ArtifactDescriptor {
        &self.artifact
    }
}

#[async_trait]
impl Step for ArtifactStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> StepPolicy {
        self.policy
    }

    fn fingerprint(&self) -> String {
        fingerprint_parts([
            "artifact".to_string(),
            self.artifact.url.clone(),
            path_str(&self.artifact.destination),
            self.artifact.check.describe(),
        ])
    }

    async fn probe(&self, _ctx: &RunContext) -> Result<Presence> {
        let present = self
            .artifact
            .check
            .is_satisfied(&self.artifact.destination)
            .await?;
        Ok(if present {
            Presence::Present
        } else {
            Presence::Absent
        })
    }

    async fn apply(&self, _ctx: &RunContext) -> Result<String> {
        Ok(match self.fetcher.fetch(&self.artifact).await? {
            FetchOutcome::Skipped => format!("{} already present", self.artifact.destination.display()),
            FetchOutcome::Downloaded { bytes } => format!(
                "downloaded {} bytes to {}",
                bytes,
                self.artifact.destination.display()
            ),
        })
    }

    async fn teardown(&self, _ctx: &RunContext) -> Result<()> {
        match tokio::fs::remove_file(&self.artifact.destination).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn teardown_target(&self, _ctx: &RunContext) -> String {
        format!("file {}", self.artifact.destination.display())
    }

    fn supports_recreate(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryTransport;
    use crate::fetch::PresenceCheck;
    use provision_env::VenvManager;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_probe_apply_teardown() {
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
        let dest = dir.path().join("models").join("w.bin");
        let transport = Arc::new(MemoryTransport::new().with_body("https://h/w.bin", vec![7u8; 16]));
        let step = ArtifactStep::new(
            "weights",
            StepPolicy::mandatory(),
            ArtifactDescriptor::new("https://h/w.bin", &dest).with_check(PresenceCheck::MinSize(16)),
            transport.clone(),
        );

        assert_eq!(step.probe(&ctx).await.unwrap(), Presence::Absent);
        let message = step.apply(&ctx).await.unwrap();
        assert!(message.contains("downloaded 16 bytes"));
        assert_eq!(step.probe(&ctx).await.unwrap(), Presence::Present);
        assert_eq!(transport.calls(), 1);

        step.teardown(&ctx).await.unwrap();
        assert!(!dest.exists());
    }

    #[test]
    fn test_fingerprint_tracks_check() {
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
        let a = ArtifactStep::new(
            "w",
            StepPolicy::mandatory(),
            ArtifactDescriptor::new("https://h/w", "/m/w"),
            transport.clone(),
        );
        let b = ArtifactStep::new(
            "w",
            StepPolicy::mandatory(),
            ArtifactDescriptor::new("https://h/w", "/m/w").with_check(PresenceCheck::MinSize(10)),
            transport,
        );
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
