//! Idempotency guard and stamp store.
//!
//! Before a step runs, the guard combines the step's probe with the
//! stamp left by its last successful run to decide whether to skip it,
//! recreate it or simply proceed.

use crate::context::RunContext;
use crate::step::{Decision, ExistsPolicy, Presence, Step};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// How much of a step's target state already exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Assessment {
    /// Fully provisioned.
    Satisfied,
    /// Exists, but not known to match the current definition.
    Partial,
    /// Nothing there yet.
    Absent,
}

/// Guard verdict for a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardVerdict {
    pub assessment: Assessment,
    pub decision: Decision,
    /// Set when the probe failed and the step was treated as absent.
    pub probe_error: Option<String>,
}

/// Fingerprints of successfully applied steps, one file per step.
#[derive(Debug, Clone)]
pub struct StampStore {
    dir: PathBuf,
}

impl StampStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, step_name: &str) -> PathBuf {
        self.dir.join(format!("{}.stamp", slug(step_name)))
    }

    /// Stored fingerprint, if any. Unreadable stamps count as missing.
    pub async fn read(&self, step_name: &str) -> Option<String> {
        match tokio::fs::read_to_string(self.path_for(step_name)).await {
            Ok(content) => Some(content.trim().to_string()),
            Err(_) => None,
        }
    }

    pub async fn matches(&self, step_name: &str, fingerprint: &str) -> bool {
        self.read(step_name).await.as_deref() == Some(fingerprint)
    }

    pub async fn write(&self, step_name: &str, fingerprint: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.path_for(step_name), format!("{}\n", fingerprint)).await
    }

    pub async fn clear(&self, step_name: &str) -> std::io::Result<()> {
        match tokio::fs::remove_file(self.path_for(step_name)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// File-name-safe form of a step name.
pub fn slug(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    slug.trim_matches('-').to_string()
}

/// Combines probes and stamps into skip/recreate/proceed decisions.
#[derive(Debug, Clone)]
pub struct IdempotencyGuard {
    stamps: StampStore,
}

impl IdempotencyGuard {
    pub fn new(stamps: StampStore) -> Self {
        Self { stamps }
    }

    /// Guard backed by the context's stamp directory.
    pub fn for_context(ctx: &RunContext) -> Self {
        Self::new(StampStore::new(ctx.stamps_dir()))
    }

    pub fn stamps(&self) -> &StampStore {
        &self.stamps
    }

    /// Decide what to do with a step. Never mutates host state.
    pub async fn assess(&self, step: &dyn Step, ctx: &RunContext) -> GuardVerdict {
        let name = step.name();
        let (presence, probe_error) = match step.probe(ctx).await {
            Ok(presence) => (presence, None),
            Err(e) => {
                warn!(step = %name, error = %e, "Precondition check failed, treating as absent");
                (Presence::Absent, Some(e.to_string()))
            }
        };

        let stamped = self.stamps.matches(name, &step.fingerprint()).await;
        let assessment = classify(presence, stamped, step.policy().on_exists);
        let decision = match assessment {
            Assessment::Satisfied => Decision::Skip,
            Assessment::Partial => Decision::Recreate,
            Assessment::Absent => Decision::Proceed,
        };

        debug!(
            step = %name,
            presence = ?presence,
            stamped = stamped,
            decision = decision.as_str(),
            "Guard verdict"
        );

        GuardVerdict {
            assessment,
            decision,
            probe_error,
        }
    }

    /// Record a successful application.
    pub async fn mark_done(&self, step: &dyn Step) -> std::io::Result<()> {
        self.stamps.write(step.name(), &step.fingerprint()).await
    }

    /// Forget a step's stamp, e.g. before its state is torn down.
    pub async fn invalidate(&self, step: &dyn Step) -> std::io::Result<()> {
        self.stamps.clear(step.name()).await
    }
}

/// Pure decision table.
///
/// | presence | stamp | policy   | result    |
/// |----------|-------|----------|-----------|
/// | absent   | any   | any      | absent    |
/// | unknown  | yes   | any      | satisfied |
/// | unknown  | no    | any      | absent    |
/// | present  | any   | reuse    | satisfied |
/// | present  | yes   | recreate | satisfied |
/// | present  | no    | recreate | partial   |
pub fn classify(presence: Presence, stamped: bool, policy: ExistsPolicy) -> Assessment {
    match (presence, policy) {
        (Presence::Absent, _) => Assessment::Absent,
        (Presence::Unknown, _) if stamped => Assessment::Satisfied,
        (Presence::Unknown, _) => Assessment::Absent,
        (Presence::Present, ExistsPolicy::Reuse) => Assessment::Satisfied,
        (Presence::Present, ExistsPolicy::Recreate) if stamped => Assessment::Satisfied,
        (Presence::Present, ExistsPolicy::Recreate) => Assessment::Partial,
    }
}
