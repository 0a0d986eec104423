//! Environment manager abstraction
//!
//! An environment is an isolated, named installation of a language
//! runtime and its packages. Backends differ in how they create, probe,
//! remove and enter such environments.

use crate::exec::CommandOutput;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Supported environment backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// conda / mamba named environments
    #[default]
    Conda,
    /// `python -m venv` directories
    Venv,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Conda => "conda",
            BackendKind::Venv => "venv",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Operations every environment backend provides.
///
/// `exists` must not mutate host state; it backs the idempotency probe.
#[async_trait]
pub trait EnvironmentManager: Send + Sync {
    /// Backend kind.
    fn kind(&self) -> BackendKind;

    /// Whether the named environment is present.
    async fn exists(&self, env: &str) -> Result<bool>;

    /// Create the environment with the given runtime version and base packages.
    async fn create(
        &self,
        env: &str,
        runtime_version: &str,
        packages: &[String],
    ) -> Result<CommandOutput>;

    /// Remove the environment and everything installed into it.
    async fn remove(&self, env: &str) -> Result<()>;

    /// Rewrite a command line so that it runs inside the environment.
    fn wrap(&self, env: &str, argv: &[String]) -> Vec<String>;

    /// Shell lines that activate the environment (for launcher scripts).
    fn activation_lines(&self, env: &str) -> Vec<String>;

    /// Filesystem location of the environment, if the backend knows it.
    fn location(&self, env: &str) -> Option<std::path::PathBuf>;
}

/// Reject names that would escape the environment root or confuse the CLI.
pub fn validate_env_name(env: &str) -> Result<()> {
    let valid = !env.is_empty()
        && env != "."
        && env != ".."
        && !env.starts_with('-')
        && env
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(crate::EnvError::InvalidName(env.to_string()))
    }
}

/// Content-addressable fingerprint of an environment definition.
///
/// Order of packages is significant: installers resolve in order.
pub fn environment_fingerprint(
    kind: BackendKind,
    env: &str,
    runtime_version: &str,
    packages: &[String],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.name().as_bytes());
    hasher.update(b"\0");
    hasher.update(env.as_bytes());
    hasher.update(b"\0");
    hasher.update(runtime_version.as_bytes());
    hasher.update(b"\0");
    for pkg in packages {
        hasher.update(pkg.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

/// Python interpreter name for a runtime version (`3.10` -> `python3.10`).
pub fn python_for_version(runtime_version: &str) -> String {
    let version = runtime_version.trim();
    if version.is_empty() {
        return "python3".to_string();
    }
    // Only major.minor maps to an interpreter name on PATH
    let short: Vec<&str> = version.split('.').take(2).collect();
    format!("python{}", short.join("."))
}

/// Whether a path looks like a usable virtual environment.
pub fn is_venv_dir(path: &Path) -> bool {
    path.join("pyvenv.cfg").is_file()
}
