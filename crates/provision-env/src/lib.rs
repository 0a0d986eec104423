//! Provision-Env: external tools and environment backends for Provisioner
//!
//! This crate is the layer that touches the host. It runs external
//! commands with captured output and manages isolated language
//! environments through conda or venv.
//!
//! ## Layer 0 - Environment/Tooling
//!
//! Focus: predictable subprocess behaviour and side-effect-free probes.

pub mod conda;
pub mod error;
pub mod exec;
pub mod manager;
pub mod venv;

pub use conda::{parse_env_list, CondaManager};
pub use error::EnvError;
pub use exec::{run, run_checked, CommandOutput, CommandSpec};
pub use manager::{
    environment_fingerprint, python_for_version, validate_env_name, BackendKind,
    EnvironmentManager,
};
pub use venv::VenvManager;

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result type for environment operations
pub type Result<T> = std::result::Result<T, EnvError>;

/// Locate an executable on `PATH`
///
/// Names containing a path separator are checked directly.
pub fn find_in_path(binary: &str) -> Option<PathBuf> {
    if binary.contains('/') {
        let path = Path::new(binary);
        return path.is_file().then(|| path.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|segment| segment.join(binary))
        .find(|candidate| candidate.is_file())
}

/// Check if an executable is available on `PATH`
pub fn is_binary_available(binary: &str) -> bool {
    find_in_path(binary).is_some()
}

/// Build the environment manager for a backend
///
/// `venv_root` is where venv environments are created; conda ignores it.
pub fn manager_for(
    kind: BackendKind,
    conda_executable: Option<&str>,
    venv_root: &Path,
) -> Arc<dyn EnvironmentManager> {
    match kind {
        BackendKind::Conda => match conda_executable {
            Some(exe) => Arc::new(CondaManager::new(exe)),
            None => Arc::new(CondaManager::default()),
        },
        BackendKind::Venv => Arc::new(VenvManager::new(venv_root)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_in_path_finds_shell() {
        assert!(is_binary_available("sh"));
        assert!(find_in_path("sh").unwrap().ends_with("sh"));
    }

    #[test]
    fn test_find_in_path_missing() {
        assert!(!is_binary_available("definitely-not-a-real-binary-xyz"));
    }

    #[test]
    fn test_find_in_path_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("tool");
        std::fs::write(&tool, "").unwrap();
        assert_eq!(find_in_path(tool.to_str().unwrap()), Some(tool));
    }

    #[test]
    fn test_manager_for_kinds() {
        let root = Path::new("/tmp/envs");
        assert_eq!(manager_for(BackendKind::Conda, None, root).kind(), BackendKind::Conda);
        let venv = manager_for(BackendKind::Venv, None, root);
        assert_eq!(venv.kind(), BackendKind::Venv);
        assert_eq!(venv.location("x"), Some(PathBuf::from("/tmp/envs/x")));
    }
}
