//! Error taxonomy for provisioning runs.

use provision_env::EnvError;

/// Errors produced while configuring or executing a provisioning run.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// The current state could not be determined; callers treat it as absent.
    #[error("precondition check for '{step}' failed: {reason}")]
    PreconditionCheck { step: String, reason: String },

    #[error("mandatory step '{step}' failed: {diagnostic}")]
    MandatoryStepFailure { step: String, diagnostic: String },

    #[error("optional step '{step}' failed: {diagnostic}")]
    OptionalStepFailure { step: String, diagnostic: String },

    #[error("failed to fetch {url}: {reason}")]
    ArtifactFetch { url: String, reason: String },

    #[error("operator declined destructive action for step '{step}'")]
    DestructiveActionDeclined { step: String },

    #[error("step '{step}' does not support recreation")]
    RecreateUnsupported { step: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown placeholder '${{{name}}}' in '{input}'")]
    Template { name: String, input: String },

    #[error("unterminated placeholder in '{input}'")]
    UnterminatedPlaceholder { input: String },

    #[error("environment error: {0}")]
    Env(#[from] EnvError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProvisionError {
    /// Text recorded in the run log for a failed step.
    pub fn diagnostic(&self) -> String {
        match self {
            ProvisionError::Env(EnvError::CommandFailed {
                program,
                exit_code,
                diagnostic,
            }) => {
                if diagnostic.is_empty() {
                    format!("`{}` exited with code {}", program, exit_code)
                } else {
                    format!("`{}` exited with code {}:\n{}", program, exit_code, diagnostic)
                }
            }
            other => other.to_string(),
        }
    }
}

/// Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;
