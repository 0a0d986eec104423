//! venv backend
//!
//! Environments are directories under a root, created with
//! `python<version> -m venv`.

use crate::exec::{run_checked, CommandOutput, CommandSpec};
use crate::manager::{
    is_venv_dir, python_for_version, validate_env_name, BackendKind, EnvironmentManager,
};
use crate::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

/// Virtualenv manager rooted at a directory
#[derive(Debug, Clone)]
pub struct VenvManager {
    root: PathBuf,
    python: Option<String>,
}

impl VenvManager {
    /// Environments live in `root/<name>`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        VenvManager {
            root: root.into(),
            python: None,
        }
    }

    /// Override the interpreter used to create environments
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = Some(python.into());
        self
    }

    fn env_dir(&self, env: &str) -> PathBuf {
        self.root.join(env)
    }

    fn bin_dir(&self, env: &str) -> PathBuf {
        self.env_dir(env).join("bin")
    }
}

#[async_trait]
impl EnvironmentManager for VenvManager {
    fn kind(&self) -> BackendKind {
        BackendKind::Venv
    }

    async fn exists(&self, env: &str) -> Result<bool> {
        validate_env_name(env)?;
        Ok(is_venv_dir(&self.env_dir(env)))
    }

    async fn create(
        &self,
        env: &str,
        runtime_version: &str,
        packages: &[String],
    ) -> Result<CommandOutput> {
        validate_env_name(env)?;
        let python = self
            .python
            .clone()
            .unwrap_or_else(|| python_for_version(runtime_version));
        let dir = self.env_dir(env);
        tokio::fs::create_dir_all(&self.root).await?;

        info!(env = %env, python = %python, path = ?dir, "Creating virtualenv");
        let mut output = run_checked(&CommandSpec::new([
            python,
            "-m".to_string(),
            "venv".to_string(),
            dir.to_string_lossy().to_string(),
        ]))
        .await?;

        if !packages.is_empty() {
            let mut argv = vec![
                self.bin_dir(env).join("python").to_string_lossy().to_string(),
                "-m".to_string(),
                "pip".to_string(),
                "install".to_string(),
            ];
            argv.extend(packages.iter().cloned());
            output = run_checked(&CommandSpec::new(argv)).await?;
        }

        Ok(output)
    }

    async fn remove(&self, env: &str) -> Result<()> {
        validate_env_name(env)?;
        let dir = self.env_dir(env);
        if dir.exists() {
            info!(env = %env, path = ?dir, "Removing virtualenv");
            tokio::fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }

    fn wrap(&self, env: &str, argv: &[String]) -> Vec<String> {
        let mut wrapped = argv.to_vec();
        if let Some(first) = wrapped.first_mut() {
            if !first.contains('/') {
                let candidate = self.bin_dir(env).join(first.as_str());
                if candidate.exists() {
                    *first = candidate.to_string_lossy().to_string();
                }
            }
        }
        wrapped
    }

    fn activation_lines(&self, env: &str) -> Vec<String> {
        vec![format!(
            "source \"{}\"",
            self.bin_dir(env).join("activate").display()
        )]
    }

    fn location(&self, env: &str) -> Option<PathBuf> {
        Some(self.env_dir(env))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fake_venv(root: &std::path::Path, env: &str) {
        let dir = root.join(env);
        std::fs::create_dir_all(dir.join("bin")).unwrap();
        std::fs::write(dir.join("pyvenv.cfg"), "home = /usr/bin\n").unwrap();
        std::fs::write(dir.join("bin").join("python"), "").unwrap();
    }

    #[tokio::test]
    async fn test_exists_detects_pyvenv_cfg() {
        let dir = tempdir().unwrap();
        let venv = VenvManager::new(dir.path());
        assert!(!venv.exists("demo").await.unwrap());

        fake_venv(dir.path(), "demo");
        assert!(venv.exists("demo").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_deletes_directory() {
        let dir = tempdir().unwrap();
        fake_venv(dir.path(), "demo");
        let venv = VenvManager::new(dir.path());

        venv.remove("demo").await.unwrap();
        assert!(!dir.path().join("demo").exists());

        // Removing again is a no-op
        venv.remove("demo").await.unwrap();
    }

    #[test]
    fn test_wrap_prefers_env_binaries() {
        let dir = tempdir().unwrap();
        fake_venv(dir.path(), "demo");
        let venv = VenvManager::new(dir.path());

        let wrapped = venv.wrap("demo", &["python".to_string(), "-V".to_string()]);
        assert!(wrapped[0].ends_with("demo/bin/python"));
        assert_eq!(wrapped[1], "-V");

        let untouched = venv.wrap("demo", &["git".to_string()]);
        assert_eq!(untouched, vec!["git"]);
    }

    #[test]
    fn test_activation_and_location() {
        let venv = VenvManager::new("/srv/envs");
        assert_eq!(
            venv.activation_lines("demo"),
            vec!["source \"/srv/envs/demo/bin/activate\"".to_string()]
        );
        assert_eq!(venv.location("demo"), Some(PathBuf::from("/srv/envs/demo")));
    }
}
