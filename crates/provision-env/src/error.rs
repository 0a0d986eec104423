//! Error types for provision-env

use thiserror::Error;

/// Errors that can occur while running external tools or managing environments
#[derive(Error, Debug)]
pub enum EnvError {
    /// Command line was empty
    #[error("Empty command line")]
    EmptyCommand,

    /// Executable could not be started
    #[error("Failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Command exceeded its timeout
    #[error("`{program}` timed out after {timeout_secs} seconds")]
    Timeout { program: String, timeout_secs: u64 },

    /// Command ran but exited non-zero
    #[error("`{program}` exited with code {exit_code}: {diagnostic}")]
    CommandFailed {
        program: String,
        exit_code: i32,
        diagnostic: String,
    },

    /// Environment manager binary not found on PATH
    #[error("{0} is not installed or not in PATH")]
    ManagerNotFound(String),

    /// Environment name is not usable
    #[error("Invalid environment name: {0}")]
    InvalidName(String),

    /// Unexpected output from the environment manager
    #[error("Unexpected output from {manager}: {reason}")]
    UnexpectedOutput { manager: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}
