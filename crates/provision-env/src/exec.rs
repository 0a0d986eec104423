//! Subprocess execution with captured output.
//!
//! Every external collaborator (package managers, git, pip, conda) is
//! driven through [`run`]: argument list in, exit code plus captured
//! stdout/stderr out.

use crate::error::EnvError;
use crate::Result;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// Number of trailing output lines kept as a failure diagnostic.
pub const DIAGNOSTIC_LINES: usize = 20;

/// A command to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Command line (first element is the executable).
    pub argv: Vec<String>,

    /// Working directory, inherited when `None`.
    pub cwd: Option<PathBuf>,

    /// Extra environment variables.
    pub env: Vec<(String, String)>,

    /// Timeout in seconds (0 = no timeout).
    pub timeout_secs: u64,
}

impl CommandSpec {
    /// Create a command from an argument list.
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            env: Vec::new(),
            timeout_secs: 0,
        }
    }

    /// Run in the given directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the timeout in seconds.
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Executable name, or an empty string for an empty command.
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }

    /// Command line joined for display.
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Executable that ran.
    pub program: String,

    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last lines of stderr, falling back to stdout when stderr is empty.
    pub fn diagnostic(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        tail_lines(source, DIAGNOSTIC_LINES)
    }

    /// Convert a non-zero exit into [`EnvError::CommandFailed`].
    pub fn into_result(self) -> Result<CommandOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(EnvError::CommandFailed {
                program: self.program.clone(),
                exit_code: self.exit_code,
                diagnostic: self.diagnostic(),
            })
        }
    }
}

/// Execute a command and capture its output.
///
/// A non-zero exit is not an error here; callers decide via
/// [`CommandOutput::success`] or [`CommandOutput::into_result`].
pub async fn run(spec: &CommandSpec) -> Result<CommandOutput> {
    let start = Instant::now();

    let (exe, args) = spec.argv.split_first().ok_or(EnvError::EmptyCommand)?;

    let mut command = Command::new(exe);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }
    for (key, value) in &spec.env {
        command.env(key, value);
    }

    debug!(command = %spec.display(), "Spawning");
    let child = command.spawn().map_err(|source| EnvError::Spawn {
        program: exe.clone(),
        source,
    })?;

    let output = if spec.timeout_secs > 0 {
        tokio::time::timeout(
            Duration::from_secs(spec.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| EnvError::Timeout {
            program: exe.clone(),
            timeout_secs: spec.timeout_secs,
        })??
    } else {
        child.wait_with_output().await?
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    let exit_code = output.status.code().unwrap_or(-1);

    Ok(CommandOutput {
        program: exe.clone(),
        exit_code,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms,
    })
}

/// Execute a command and fail on non-zero exit.
pub async fn run_checked(spec: &CommandSpec) -> Result<CommandOutput> {
    run(spec).await?.into_result()
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_simple_command() {
        let spec = CommandSpec::new(["echo", "hello"]);
        let output = run(&spec).await.expect("execute failed");
        assert!(output.success());
        assert_eq!(output.exit_code, 0);
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let spec = CommandSpec::new(["false"]);
        let output = run(&spec).await.expect("execute failed");
        assert!(!output.success());
        assert_ne!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_run_checked_reports_diagnostic() {
        let spec = CommandSpec::new(["sh", "-c", "echo boom >&2; exit 3"]);
        let err = run_checked(&spec).await.unwrap_err();
        match err {
            EnvError::CommandFailed {
                exit_code,
                diagnostic,
                ..
            } => {
                assert_eq!(exit_code, 3);
                assert_eq!(diagnostic, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let spec = CommandSpec::new(Vec::<String>::new());
        assert!(matches!(run(&spec).await, Err(EnvError::EmptyCommand)));
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let spec = CommandSpec::new(["definitely-not-a-real-binary-xyz"]);
        assert!(matches!(run(&spec).await, Err(EnvError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_timeout() {
        let spec = CommandSpec::new(["sleep", "5"]).timeout(1);
        assert!(matches!(run(&spec).await, Err(EnvError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_cwd_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new(["sh", "-c", "pwd; echo $PROVISION_TEST_VAR"])
            .current_dir(dir.path())
            .env("PROVISION_TEST_VAR", "marker");
        let output = run(&spec).await.unwrap();
        assert!(output.stdout.contains("marker"));
    }

    #[test]
    fn test_diagnostic_falls_back_to_stdout() {
        let output = CommandOutput {
            program: "x".to_string(),
            exit_code: 1,
            stdout: "a\nb\n".to_string(),
            stderr: "  \n".to_string(),
            duration_ms: 1,
        };
        assert_eq!(output.diagnostic(), "a\nb");
    }

    #[test]
    fn test_tail_lines_keeps_last_n() {
        let text = (1..=30).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let tail = tail_lines(&text, DIAGNOSTIC_LINES);
        assert_eq!(tail.lines().count(), DIAGNOSTIC_LINES);
        assert!(tail.starts_with("11"));
        assert!(tail.ends_with("30"));
    }
}
