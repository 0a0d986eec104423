//! conda backend
//!
//! Drives the `conda` CLI (or a drop-in such as `mamba`) for named
//! environments.

use crate::error::EnvError;
use crate::exec::{run, run_checked, CommandOutput, CommandSpec};
use crate::manager::{validate_env_name, BackendKind, EnvironmentManager};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Output of `conda env list --json`
#[derive(Debug, Deserialize)]
struct EnvList {
    envs: Vec<PathBuf>,
}

/// conda environment manager
#[derive(Debug, Clone)]
pub struct CondaManager {
    executable: String,
}

impl Default for CondaManager {
    fn default() -> Self {
        CondaManager {
            executable: std::env::var("CONDA_EXE").unwrap_or_else(|_| "conda".to_string()),
        }
    }
}

impl CondaManager {
    /// Use a specific executable (`conda`, `mamba`, or an absolute path)
    pub fn new(executable: impl Into<String>) -> Self {
        CondaManager {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = vec![self.executable.clone()];
        argv.extend(args.into_iter().map(Into::into));
        CommandSpec::new(argv)
    }

    /// Command line used to create an environment
    pub fn create_command(&self, env: &str, runtime_version: &str, packages: &[String]) -> CommandSpec {
        let mut args = vec![
            "create".to_string(),
            "--yes".to_string(),
            "--name".to_string(),
            env.to_string(),
        ];
        if !runtime_version.trim().is_empty() {
            args.push(format!("python={}", runtime_version.trim()));
        }
        args.extend(packages.iter().cloned());
        self.command(args)
    }
}

/// Names of environments in a `conda env list --json` document.
///
/// The first entry is the root prefix and is reported as `base`.
pub fn parse_env_list(json: &str) -> Result<Vec<String>> {
    let list: EnvList = serde_json::from_str(json)?;
    let names = list
        .envs
        .iter()
        .enumerate()
        .map(|(i, path)| {
            if i == 0 {
                "base".to_string()
            } else {
                env_name_from_path(path)
            }
        })
        .collect();
    Ok(names)
}

fn env_name_from_path(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[async_trait]
impl EnvironmentManager for CondaManager {
    fn kind(&self) -> BackendKind {
        BackendKind::Conda
    }

    async fn exists(&self, env: &str) -> Result<bool> {
        validate_env_name(env)?;
        let output = run(&self.command(["env", "list", "--json"])).await?;
        if !output.success() {
            return Err(EnvError::UnexpectedOutput {
                manager: self.executable.clone(),
                reason: output.diagnostic(),
            });
        }
        let names = parse_env_list(&output.stdout)?;
        debug!(env = %env, known = names.len(), "conda environments listed");
        Ok(names.iter().any(|n| n == env))
    }

    async fn create(
        &self,
        env: &str,
        runtime_version: &str,
        packages: &[String],
    ) -> Result<CommandOutput> {
        validate_env_name(env)?;
        info!(env = %env, runtime_version = %runtime_version, "Creating conda environment");
        run_checked(&self.create_command(env, runtime_version, packages)).await
    }

    async fn remove(&self, env: &str) -> Result<()> {
        validate_env_name(env)?;
        info!(env = %env, "Removing conda environment");
        run_checked(&self.command(["env", "remove", "--yes", "--name", env])).await?;
        Ok(())
    }

    fn wrap(&self, env: &str, argv: &[String]) -> Vec<String> {
        let mut wrapped = vec![
            self.executable.clone(),
            "run".to_string(),
            "--no-capture-output".to_string(),
            "--name".to_string(),
            env.to_string(),
        ];
        wrapped.extend(argv.iter().cloned());
        wrapped
    }

    fn activation_lines(&self, env: &str) -> Vec<String> {
        vec![
            format!("eval \"$({} shell.bash hook)\"", self.executable),
            format!("conda activate {}", env),
        ]
    }

    fn location(&self, _env: &str) -> Option<PathBuf> {
        None
    }
}
