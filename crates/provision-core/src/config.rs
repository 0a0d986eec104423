//! Provisioning configuration (TOML).
//!
//! A config names the project, its isolated environment, and the ordered
//! list of steps. Package lists, URLs and model files are plain data here.

use crate::context::RunContext;
use crate::error::{ProvisionError, Result};
use crate::step::ExistsPolicy;
use provision_env::{validate_env_name, BackendKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisionConfig {
    pub project: ProjectConfig,
    #[serde(default)]
    pub environment: EnvironmentSpec,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub launcher: Option<LauncherConfig>,
    /// Directory relative paths in this file are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    pub name: String,
    /// Defaults to `$HOME/<name>`.
    #[serde(default)]
    pub target_dir: Option<String>,
}

/// The isolated environment the project runs in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentSpec {
    /// Defaults to the project name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub runtime_version: String,
    /// Packages installed when the environment is created.
    #[serde(default)]
    pub packages: Vec<String>,
    /// What to do when the environment exists but was not created by us.
    #[serde(default = "default_env_on_exists")]
    pub on_exists: ExistsPolicy,
    #[serde(default)]
    pub conda_executable: Option<String>,
    /// Where venv environments are created; defaults to `${target_dir}/envs`.
    #[serde(default)]
    pub venv_root: Option<String>,
}

impl Default for EnvironmentSpec {
    fn default() -> Self {
        Self {
            name: None,
            backend: BackendKind::default(),
            runtime_version: String::new(),
            packages: Vec::new(),
            on_exists: default_env_on_exists(),
            conda_executable: None,
            venv_root: None,
        }
    }
}

fn default_env_on_exists() -> ExistsPolicy {
    ExistsPolicy::Recreate
}

fn default_true() -> bool {
    true
}

fn default_apt() -> String {
    "apt-get".to_string()
}

fn default_launcher_path() -> String {
    "run.sh".to_string()
}

/// One `[[steps]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepSpec {
    pub name: String,
    /// Defaults to `true`.
    #[serde(default)]
    pub mandatory: Option<bool>,
    #[serde(default)]
    pub on_exists: Option<ExistsPolicy>,
    /// Subprocess timeout, 0 = none.
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl StepSpec {
    pub fn is_mandatory(&self) -> bool {
        self.mandatory.unwrap_or(true)
    }
}

/// Step kinds and their parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    Command {
        command: Vec<String>,
        /// Exit 0 means the step's target already exists.
        #[serde(default)]
        check: Option<Vec<String>>,
        /// Present when this executable is on PATH.
        #[serde(default)]
        requires_binary: Option<String>,
        #[serde(default)]
        cwd: Option<String>,
        /// Run inside the project environment.
        #[serde(default)]
        in_env: bool,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    SystemPackages {
        packages: Vec<String>,
        #[serde(default = "default_apt")]
        manager: String,
        #[serde(default)]
        sudo: bool,
        #[serde(default = "default_true")]
        update: bool,
    },
    Directory {
        path: String,
    },
    Environment,
    Git {
        url: String,
        dest: String,
        #[serde(default)]
        branch: Option<String>,
        #[serde(default)]
        depth: Option<u32>,
        #[serde(default)]
        recursive: bool,
    },
    Dependencies {
        #[serde(default)]
        packages: Vec<String>,
        #[serde(default)]
        requirements: Vec<String>,
        #[serde(default)]
        editable: Vec<String>,
        #[serde(default)]
        index_url: Option<String>,
        #[serde(default)]
        extra_index_url: Option<String>,
        #[serde(default)]
        extra_args: Vec<String>,
        #[serde(default)]
        cwd: Option<String>,
    },
    Artifact {
        url: String,
        dest: String,
        #[serde(default)]
        sha256: Option<String>,
        #[serde(default)]
        min_size: Option<u64>,
    },
    Patch {
        patch: String,
        dir: String,
    },
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Command { .. } => "command",
            StepKind::SystemPackages { .. } => "system_packages",
            StepKind::Directory { .. } => "directory",
            StepKind::Environment => "environment",
            StepKind::Git { .. } => "git",
            StepKind::Dependencies { .. } => "dependencies",
            StepKind::Artifact { .. } => "artifact",
            StepKind::Patch { .. } => "patch",
        }
    }

    /// Kinds whose existing state can be torn down.
    pub fn supports_recreate(&self) -> bool {
        matches!(
            self,
            StepKind::Directory { .. }
                | StepKind::Environment
                | StepKind::Git { .. }
                | StepKind::Artifact { .. }
        )
    }
}

/// Generated launcher script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LauncherConfig {
    /// Relative to the target directory.
    #[serde(default = "default_launcher_path")]
    pub path: String,
    /// Default invocation; extra launcher arguments are appended.
    pub command: Vec<String>,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Command-line or environment overrides applied on top of the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub target_dir: Option<PathBuf>,
    pub env_name: Option<String>,
    pub runtime_version: Option<String>,
}

impl ProvisionConfig {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProvisionError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_toml_str(&content, base_dir)
    }

    /// Parse and validate a config document.
    pub fn from_toml_str(content: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut config: ProvisionConfig = toml::from_str(content)?;
        config.base_dir = base_dir.into();
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that do not need the host.
    pub fn validate(&self) -> Result<()> {
        if self.project.name.trim().is_empty() {
            return Err(ProvisionError::Config("project.name is empty".to_string()));
        }
        validate_env_name(&self.env_name(&Overrides::default()))?;

        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(ProvisionError::Config(format!(
                    "a {} step has an empty name",
                    step.kind.name()
                )));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(ProvisionError::Config(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
            if step.on_exists == Some(ExistsPolicy::Recreate) && !step.kind.supports_recreate() {
                return Err(ProvisionError::Config(format!(
                    "step '{}': on_exists = \"recreate\" is not supported for {} steps",
                    step.name,
                    step.kind.name()
                )));
            }
            validate_kind(&step.name, &step.kind)?;
        }

        if let Some(launcher) = &self.launcher {
            if launcher.command.is_empty() {
                return Err(ProvisionError::Config(
                    "launcher.command is empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Environment name after overrides.
    pub fn env_name(&self, overrides: &Overrides) -> String {
        overrides
            .env_name
            .clone()
            .or_else(|| self.environment.name.clone())
            .unwrap_or_else(|| self.project.name.clone())
    }

    /// Runtime version after overrides.
    pub fn runtime_version(&self, overrides: &Overrides) -> String {
        overrides
            .runtime_version
            .clone()
            .unwrap_or_else(|| self.environment.runtime_version.clone())
    }

    /// Target directory after overrides, `~` expanded, made absolute.
    pub fn target_dir(&self, overrides: &Overrides) -> Result<PathBuf> {
        let raw = match (&overrides.target_dir, &self.project.target_dir) {
            (Some(dir), _) => dir.clone(),
            (None, Some(dir)) => expand_home(dir)?,
            (None, None) => home_dir()?.join(&self.project.name),
        };
        if raw.is_absolute() {
            Ok(raw)
        } else {
            Ok(self.base_dir.join(raw))
        }
    }

    /// Resolve everything a run needs into an immutable context.
    pub fn build_context(&self, overrides: &Overrides) -> Result<RunContext> {
        let target_dir = self.target_dir(overrides)?;
        let env_name = self.env_name(overrides);
        validate_env_name(&env_name)?;

        let venv_root = match &self.environment.venv_root {
            Some(root) => {
                let expanded = target_relative(&target_dir, root);
                PathBuf::from(expanded)
            }
            None => target_dir.join("envs"),
        };
        let manager = provision_env::manager_for(
            self.environment.backend,
            self.environment.conda_executable.as_deref(),
            &venv_root,
        );

        RunContext::new(
            self.project.name.clone(),
            target_dir,
            env_name,
            self.runtime_version(overrides),
            manager,
            self.vars.clone(),
        )
    }
}

fn validate_kind(step: &str, kind: &StepKind) -> Result<()> {
    let invalid = |what: &str| {
        Err(ProvisionError::Config(format!("step '{}': {}", step, what)))
    };
    match kind {
        StepKind::Command { command, check, .. } => {
            if command.is_empty() {
                return invalid("command is empty");
            }
            if check.as_ref().is_some_and(|c| c.is_empty()) {
                return invalid("check is empty");
            }
        }
        StepKind::SystemPackages { packages, .. } if packages.is_empty() => {
            return invalid("packages is empty");
        }
        StepKind::Dependencies {
            packages,
            requirements,
            editable,
            ..
        } if packages.is_empty() && requirements.is_empty() && editable.is_empty() => {
            return invalid("nothing to install");
        }
        StepKind::Artifact { url, sha256, .. } => {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return invalid("artifact url must be http(s)");
            }
            if let Some(hash) = sha256 {
                if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                    return invalid("sha256 must be 64 hex characters");
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// `${target_dir}` is the only placeholder usable before the context exists.
fn target_relative(target_dir: &Path, raw: &str) -> String {
    let replaced = raw.replace("${target_dir}", &target_dir.to_string_lossy());
    if Path::new(&replaced).is_absolute() {
        replaced
    } else {
        target_dir.join(replaced).to_string_lossy().to_string()
    }
}

fn home_dir() -> Result<PathBuf> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .ok_or_else(|| ProvisionError::Config("cannot determine home directory".to_string()))
}

fn expand_home(raw: &str) -> Result<PathBuf> {
    if raw == "~" {
        home_dir()
    } else if let Some(rest) = raw.strip_prefix("~/") {
        Ok(home_dir()?.join(rest))
    } else {
        Ok(PathBuf::from(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[project]
name = "stable-diffusion"
target_dir = "/opt/sd"

[environment]
name = "sd"
backend = "venv"
runtime_version = "3.10"
packages = ["pip", "wheel"]

[vars]
models = "${target_dir}/models"

[[steps]]
kind = "system_packages"
name = "System packages"
packages = ["git", "wget"]
sudo = true

[[steps]]
kind = "environment"
name = "Create environment"

[[steps]]
kind = "git"
name = "Fetch source"
url = "https://github.com/example/sd.git"
dest = "src"
depth = 1
on_exists = "recreate"

[[steps]]
kind = "dependencies"
name = "xformers"
mandatory = false
packages = ["xformers==0.0.22"]

[[steps]]
kind = "artifact"
name = "Model weights"
url = "https://example.com/v1-5.ckpt"
dest = "${models}/v1-5.ckpt"
min_size = 1024

[launcher]
command = ["python", "launch.py"]
workdir = "src"
"#;

    #[test]
    fn test_parse_sample() {
        let config = ProvisionConfig::from_toml_str(SAMPLE, "/cfg").unwrap();
        assert_eq!(config.project.name, "stable-diffusion");
        assert_eq!(config.environment.backend, BackendKind::Venv);
        assert_eq!(config.environment.on_exists, ExistsPolicy::Recreate);
        assert_eq!(config.steps.len(), 5);
        assert_eq!(config.steps[1].kind, StepKind::Environment);
        assert!(!config.steps[3].is_mandatory());
        assert!(config.steps[4].is_mandatory());
        assert_eq!(config.steps[2].on_exists, Some(ExistsPolicy::Recreate));
        match &config.steps[0].kind {
            StepKind::SystemPackages {
                manager,
                sudo,
                update,
                ..
            } => {
                assert_eq!(manager, "apt-get");
                assert!(*sudo);
                assert!(*update);
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(config.launcher.as_ref().unwrap().path, "run.sh");
    }

    #[test]
    fn test_overrides() {
        let config = ProvisionConfig::from_toml_str(SAMPLE, "/cfg").unwrap();
        let overrides = Overrides {
            target_dir: Some(PathBuf::from("/elsewhere")),
            env_name: Some("other".to_string()),
            runtime_version: Some("3.11".to_string()),
        };
        assert_eq!(config.target_dir(&overrides).unwrap(), PathBuf::from("/elsewhere"));
        assert_eq!(config.env_name(&overrides), "other");
        assert_eq!(config.runtime_version(&overrides), "3.11");
        assert_eq!(config.env_name(&Overrides::default()), "sd");
    }

    #[test]
    fn test_build_context_resolves_vars() {
        let config = ProvisionConfig::from_toml_str(SAMPLE, "/cfg").unwrap();
        let ctx = config.build_context(&Overrides::default()).unwrap();
        assert_eq!(ctx.expand("${models}").unwrap(), "/opt/sd/models");
        assert_eq!(ctx.expand("${env_dir}").unwrap(), "/opt/sd/envs/sd");
        assert_eq!(ctx.runtime_version(), "3.10");
    }

    #[test]
    fn test_vars_may_reference_later_keys() {
        let toml = r#"
[project]
name = "demo"
target_dir = "/opt/demo"

[vars]
models = "${root}/models"
root = "/data"
"#;
        let config = ProvisionConfig::from_toml_str(toml, "/cfg").unwrap();
        let ctx = config.build_context(&Overrides::default()).unwrap();
        assert_eq!(ctx.expand("${models}").unwrap(), "/data/models");
    }

    #[test]
    fn test_relative_target_dir_uses_base_dir() {
        let toml = "[project]\nname = \"demo\"\ntarget_dir = \"work\"\n";
        let config = ProvisionConfig::from_toml_str(toml, "/cfg").unwrap();
        assert_eq!(
            config.target_dir(&Overrides::default()).unwrap(),
            PathBuf::from("/cfg/work")
        );
    }

    #[test]
    fn test_default_target_dir_under_home() {
        let toml = "[project]\nname = \"demo\"\n";
        let config = ProvisionConfig::from_toml_str(toml, "/cfg").unwrap();
        let dir = config.target_dir(&Overrides::default()).unwrap();
        assert!(dir.ends_with("demo"));
        assert!(dir.is_absolute());
    }

    #[test]
    fn test_recreate_rejected_for_command_steps() {
        let toml = r#"
[project]
name = "demo"

[[steps]]
kind = "command"
name = "x"
command = ["true"]
on_exists = "recreate"
"#;
        let err = ProvisionConfig::from_toml_str(toml, "/cfg").unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn test_duplicate_step_names_rejected() {
        let toml = r#"
[project]
name = "demo"

[[steps]]
kind = "directory"
name = "dir"
path = "a"

[[steps]]
kind = "directory"
name = "dir"
path = "b"
"#;
        assert!(ProvisionConfig::from_toml_str(toml, "/cfg").is_err());
    }

    #[test]
    fn test_bad_sha256_rejected() {
        let toml = r#"
[project]
name = "demo"

[[steps]]
kind = "artifact"
name = "w"
url = "https://example.com/w"
dest = "w"
sha256 = "xyz"
"#;
        assert!(ProvisionConfig::from_toml_str(toml, "/cfg").is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let toml = r#"
[project]
name = "demo"

[[steps]]
kind = "teleport"
name = "x"
"#;
        assert!(matches!(
            ProvisionConfig::from_toml_str(toml, "/cfg"),
            Err(ProvisionError::Toml(_))
        ));
    }

    #[test]
    fn test_invalid_env_name_rejected() {
        let toml = "[project]\nname = \"demo\"\n[environment]\nname = \"../x\"\n";
        assert!(matches!(
            ProvisionConfig::from_toml_str(toml, "/cfg"),
            Err(ProvisionError::Env(_))
        ));
    }
}
