//! In-memory fakes for steps and transports (testing only)
//!
//! Provides `ScriptedStep`, `MemoryTransport` and `MemoryEnvironments`,
//! which satisfy the trait contracts without touching the network or
//! spawning processes.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::context::RunContext;
use crate::error::{ProvisionError, Result};
use crate::fetch::Transport;
use crate::step::{fingerprint_parts, Presence, Step, StepPolicy};
use provision_env::{BackendKind, CommandOutput, EnvError, EnvironmentManager};

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// Shared, ordered record of calls made on scripted steps.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: String) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Entries of one kind (`probe`, `apply`, `teardown`).
    pub fn calls(&self, kind: &str) -> Vec<String> {
        let prefix = format!("{}:", kind);
        self.entries()
            .into_iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ScriptedStep
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Script {
    /// `None` means the step cannot observe its target.
    present: Option<bool>,
    fail_apply: bool,
    probe_error: bool,
}

/// A step whose probe and apply behaviour is scripted.
///
/// Successful `apply` makes an observable target present; `teardown`
/// makes it absent again.
#[derive(Debug, Clone)]
pub struct ScriptedStep {
    name: String,
    policy: StepPolicy,
    revision: String,
    script: Arc<Mutex<Script>>,
    journal: Journal,
}

impl ScriptedStep {
    /// Mandatory, reuse-on-exists, target absent.
    pub fn new(name: impl Into<String>, journal: &Journal) -> Self {
        Self {
            name: name.into(),
            policy: StepPolicy::mandatory(),
            revision: "1".to_string(),
            script: Arc::new(Mutex::new(Script {
                present: Some(false),
                fail_apply: false,
                probe_error: false,
            })),
            journal: journal.clone(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.policy = StepPolicy::new(false, self.policy.on_exists);
        self
    }

    pub fn recreate(mut self) -> Self {
        self.policy = self.policy.recreate();
        self
    }

    pub fn present(self) -> Self {
        self.script.lock().unwrap().present = Some(true);
        self
    }

    /// Presence is decided by stamps only.
    pub fn unobservable(self) -> Self {
        self.script.lock().unwrap().present = None;
        self
    }

    pub fn failing(self) -> Self {
        self.script.lock().unwrap().fail_apply = true;
        self
    }

    pub fn probe_error(self) -> Self {
        self.script.lock().unwrap().probe_error = true;
        self
    }

    /// Change the definition so its fingerprint no longer matches old stamps.
    pub fn revised(mut self, revision: &str) -> Self {
        self.revision = revision.to_string();
        self
    }

    /// Whether the simulated target currently exists.
    pub fn is_present(&self) -> bool {
        self.script.lock().unwrap().present == Some(true)
    }
}

#[async_trait]
impl Step for ScriptedStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> StepPolicy {
        self.policy
    }

    fn fingerprint(&self) -> String {
        fingerprint_parts(["scripted", self.name.as_str(), self.revision.as_str()])
    }

    async fn probe(&self, _ctx: &RunContext) -> Result<Presence> {
        self.journal.push(format!("probe:{}", self.name));
        let script = self.script.lock().unwrap().clone();
        if script.probe_error {
            return Err(ProvisionError::PreconditionCheck {
                step: self.name.clone(),
                reason: "scripted probe error".to_string(),
            });
        }
        Ok(match script.present {
            Some(true) => Presence::Present,
            Some(false) => Presence::Absent,
            None => Presence::Unknown,
        })
    }

    async fn apply(&self, _ctx: &RunContext) -> Result<String> {
        self.journal.push(format!("apply:{}", self.name));
        let mut script = self.script.lock().unwrap();
        if script.fail_apply {
            return Err(ProvisionError::Config(format!(
                "scripted failure in {}",
                self.name
            )));
        }
        if script.present.is_some() {
            script.present = Some(true);
        }
        Ok(format!("{} applied", self.name))
    }

    async fn teardown(&self, _ctx: &RunContext) -> Result<()> {
        self.journal.push(format!("teardown:{}", self.name));
        let mut script = self.script.lock().unwrap();
        if script.present.is_some() {
            script.present = Some(false);
        }
        Ok(())
    }

    fn supports_recreate(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// MemoryTransport
// ---------------------------------------------------------------------------

/// Transport serving bodies from a map; unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    calls: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(self, url: &str, body: Vec<u8>) -> Self {
        self.bodies.lock().unwrap().insert(url.to_string(), body);
        self
    }

    /// Number of download attempts made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn download(&self, url: &str, sink: &mut File) -> std::result::Result<u64, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = self
            .bodies
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| format!("HTTP status client error (404 Not Found) for url ({})", url))?;
        sink.write_all(&body).await.map_err(|e| e.to_string())?;
        sink.flush().await.map_err(|e| e.to_string())?;
        Ok(body.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// MemoryEnvironments
// ---------------------------------------------------------------------------

/// Environment backend keeping named environments in a set.
#[derive(Debug, Default)]
pub struct MemoryEnvironments {
    envs: Mutex<BTreeSet<String>>,
    fail_create: bool,
    journal: Journal,
}

impl MemoryEnvironments {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            ..Self::default()
        }
    }

    pub fn with_env(self, env: &str) -> Self {
        self.envs.lock().unwrap().insert(env.to_string());
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn contains(&self, env: &str) -> bool {
        self.envs.lock().unwrap().contains(env)
    }
}

#[async_trait]
impl EnvironmentManager for MemoryEnvironments {
    fn kind(&self) -> BackendKind {
        BackendKind::Venv
    }

    async fn exists(&self, env: &str) -> provision_env::Result<bool> {
        Ok(self.contains(env))
    }

    async fn create(
        &self,
        env: &str,
        _runtime_version: &str,
        _packages: &[String],
    ) -> provision_env::Result<CommandOutput> {
        self.journal.push(format!("create:{}", env));
        if self.fail_create {
            return Err(EnvError::CommandFailed {
                program: "python3".to_string(),
                exit_code: 1,
                diagnostic: "No module named venv".to_string(),
            });
        }
        self.envs.lock().unwrap().insert(env.to_string());
        Ok(CommandOutput {
            program: "python3".to_string(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
        })
    }

    async fn remove(&self, env: &str) -> provision_env::Result<()> {
        self.journal.push(format!("remove:{}", env));
        self.envs.lock().unwrap().remove(env);
        Ok(())
    }

    fn wrap(&self, _env: &str, argv: &[String]) -> Vec<String> {
        argv.to_vec()
    }

    fn activation_lines(&self, env: &str) -> Vec<String> {
        vec![format!("# activate {}", env)]
    }

    fn location(&self, _env: &str) -> Option<PathBuf> {
        None
    }
}
