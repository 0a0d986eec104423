//! Immutable run context shared by every step.
//!
//! Carries resolved paths and names explicitly instead of relying on
//! process-wide state such as environment variables or the working
//! directory.

use crate::error::{ProvisionError, Result};
use provision_env::EnvironmentManager;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory under the target that holds stamps, reports and logs.
pub const STATE_DIR_NAME: &str = ".provision";

/// Resolved, read-only inputs of a provisioning run.
#[derive(Clone)]
pub struct RunContext {
    project: String,
    target_dir: PathBuf,
    state_dir: PathBuf,
    env_name: String,
    runtime_version: String,
    env_manager: Arc<dyn EnvironmentManager>,
    vars: BTreeMap<String, String>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("project", &self.project)
            .field("target_dir", &self.target_dir)
            .field("env_name", &self.env_name)
            .field("runtime_version", &self.runtime_version)
            .field("backend", &self.env_manager.kind())
            .finish()
    }
}

impl RunContext {
    /// Build a context. User variables may not shadow builtin ones.
    pub fn new(
        project: impl Into<String>,
        target_dir: impl Into<PathBuf>,
        env_name: impl Into<String>,
        runtime_version: impl Into<String>,
        env_manager: Arc<dyn EnvironmentManager>,
        user_vars: BTreeMap<String, String>,
    ) -> Result<Self> {
        let project = project.into();
        let target_dir = target_dir.into();
        let state_dir = target_dir.join(STATE_DIR_NAME);
        let env_name = env_name.into();
        let runtime_version = runtime_version.into();

        let mut vars = BTreeMap::new();
        vars.insert("project".to_string(), project.clone());
        vars.insert(
            "target_dir".to_string(),
            target_dir.to_string_lossy().to_string(),
        );
        vars.insert(
            "state_dir".to_string(),
            state_dir.to_string_lossy().to_string(),
        );
        vars.insert("env_name".to_string(), env_name.clone());
        vars.insert("runtime_version".to_string(), runtime_version.clone());
        if let Some(location) = env_manager.location(&env_name) {
            vars.insert(
                "env_dir".to_string(),
                location.to_string_lossy().to_string(),
            );
        }

        if let Some(key) = user_vars.keys().find(|k| vars.contains_key(*k)) {
            return Err(ProvisionError::Config(format!(
                "variable '{}' shadows a builtin variable",
                key
            )));
        }
        resolve_user_vars(&mut vars, user_vars)?;

        Ok(Self {
            project,
            target_dir,
            state_dir,
            env_name,
            runtime_version,
            env_manager,
            vars,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn stamps_dir(&self) -> PathBuf {
        self.state_dir.join("stamps")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.state_dir.join("runs")
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    pub fn env_manager(&self) -> &Arc<dyn EnvironmentManager> {
        &self.env_manager
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Replace `${name}` placeholders with context variables.
    pub fn expand(&self, input: &str) -> Result<String> {
        expand_with(&self.vars, input)
    }

    /// Expand every element of an argument list.
    pub fn expand_all(&self, inputs: &[String]) -> Result<Vec<String>> {
        inputs.iter().map(|s| self.expand(s)).collect()
    }

    /// Expand a path; relative results are anchored at the target directory.
    pub fn resolve_path(&self, input: &str) -> Result<PathBuf> {
        let expanded = PathBuf::from(self.expand(input)?);
        if expanded.is_absolute() {
            Ok(expanded)
        } else {
            Ok(self.target_dir.join(expanded))
        }
    }

    /// Rewrite a command line so that it runs inside the run's environment.
    pub fn in_env(&self, argv: &[String]) -> Vec<String> {
        self.env_manager.wrap(&self.env_name, argv)
    }
}

/// Expand user variables into `vars`, in whatever order their references
/// allow. A variable waiting on another pending one is retried on the next
/// pass; a pass that resolves nothing means the rest form a cycle.
fn resolve_user_vars(
    vars: &mut BTreeMap<String, String>,
    mut pending: BTreeMap<String, String>,
) -> Result<()> {
    while !pending.is_empty() {
        let mut resolved = Vec::new();
        for (key, value) in &pending {
            match expand_with(vars, value) {
                Ok(expanded) => resolved.push((key.clone(), expanded)),
                Err(ProvisionError::Template { ref name, .. }) if pending.contains_key(name) => {}
                Err(e) => return Err(e),
            }
        }
        if resolved.is_empty() {
            let names: Vec<&str> = pending.keys().map(String::as_str).collect();
            return Err(ProvisionError::Config(format!(
                "variables reference each other in a cycle: {}",
                names.join(", ")
            )));
        }
        for (key, expanded) in resolved {
            pending.remove(&key);
            vars.insert(key, expanded);
        }
    }
    Ok(())
}

/// Placeholder expansion against an explicit variable map.
///
/// `$$` yields a literal `$`; a `$` not followed by `{` is kept as is.
pub fn expand_with(vars: &BTreeMap<String, String>, input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        if let Some(stripped) = after.strip_prefix('$') {
            out.push('$');
            rest = stripped;
        } else if let Some(body) = after.strip_prefix('{') {
            let end = body
                .find('}')
                .ok_or_else(|| ProvisionError::UnterminatedPlaceholder {
                    input: input.to_string(),
                })?;
            let name = &body[..end];
            let value = vars.get(name).ok_or_else(|| ProvisionError::Template {
                name: name.to_string(),
                input: input.to_string(),
            })?;
            out.push_str(value);
            rest = &body[end + 1..];
        } else {
            out.push('$');
            rest = after;
        }
    }
    out.push_str(rest);
    Ok(out)
}
