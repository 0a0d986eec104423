//! Concrete step kinds and the builder that turns config entries into them.
//!
//! Placeholders are expanded while building, so an unknown `${name}`
//! surfaces as a configuration error before anything runs and
//! fingerprints cover the resolved values.

mod artifact;
mod command;
mod dependencies;
mod directory;
mod environment;
mod git;
mod patch;
mod system;

pub use artifact::ArtifactStep;
pub use command::CommandStep;
pub use dependencies::DependenciesStep;
pub use directory::DirectoryStep;
pub use environment::EnvironmentStep;
pub use git::GitStep;
pub use patch::PatchStep;
pub use system::SystemPackagesStep;

use crate::config::{ProvisionConfig, StepKind, StepSpec};
use crate::context::RunContext;
use crate::error::{ProvisionError, Result};
use crate::fetch::{ArtifactDescriptor, PresenceCheck, Transport};
use crate::registry::StepRegistry;
use crate::step::{ExistsPolicy, Step, StepPolicy};
use provision_env::{run, run_checked, CommandOutput, CommandSpec};
use std::path::Path;
use std::sync::Arc;

/// Build the ordered registry for a config against a resolved context.
pub fn build_registry(
    config: &ProvisionConfig,
    ctx: &RunContext,
    transport: Arc<dyn Transport>,
) -> Result<StepRegistry> {
    let mut registry = StepRegistry::new();
    for spec in &config.steps {
        let step = build_step(spec, config, ctx, transport.clone())
            .map_err(|e| match e {
                ProvisionError::Template { .. }
                | ProvisionError::UnterminatedPlaceholder { .. } => ProvisionError::Config(format!(
                    "step '{}': {}",
                    spec.name, e
                )),
                other => other,
            })?;
        registry.push(step)?;
    }
    Ok(registry)
}

fn build_step(
    spec: &StepSpec,
    config: &ProvisionConfig,
    ctx: &RunContext,
    transport: Arc<dyn Transport>,
) -> Result<Box<dyn Step>> {
    let default_on_exists = match spec.kind {
        StepKind::Environment => config.environment.on_exists,
        _ => ExistsPolicy::Reuse,
    };
    let policy = StepPolicy::new(
        spec.is_mandatory(),
        spec.on_exists.unwrap_or(default_on_exists),
    );
    let name = spec.name.clone();

    let step: Box<dyn Step> = match &spec.kind {
        StepKind::Command {
            command,
            check,
            requires_binary,
            cwd,
            in_env,
            env,
        } => {
            let mut step = CommandStep::new(name, policy, ctx.expand_all(command)?)
                .in_env(*in_env)
                .timeout(spec.timeout_secs);
            if let Some(check) = check {
                step = step.check(ctx.expand_all(check)?);
            }
            if let Some(binary) = requires_binary {
                step = step.requires_binary(ctx.expand(binary)?);
            }
            if let Some(cwd) = cwd {
                step = step.current_dir(ctx.resolve_path(cwd)?);
            }
            for (key, value) in env {
                step = step.env(key, ctx.expand(value)?);
            }
            Box::new(step)
        }
        StepKind::SystemPackages {
            packages,
            manager,
            sudo,
            update,
        } => Box::new(
            SystemPackagesStep::new(name, policy, ctx.expand(manager)?, ctx.expand_all(packages)?)
                .sudo(*sudo)
                .update(*update)
                .timeout(spec.timeout_secs),
        ),
        StepKind::Directory { path } => {
            Box::new(DirectoryStep::new(name, policy, ctx.resolve_path(path)?))
        }
        StepKind::Environment => {
            let dependents = config
                .steps
                .iter()
                .filter(|s| runs_in_environment(&s.kind))
                .map(|s| s.name.clone())
                .collect();
            Box::new(
                EnvironmentStep::new(
                    name,
                    policy,
                    ctx.env_name(),
                    ctx.runtime_version(),
                    ctx.expand_all(&config.environment.packages)?,
                )
                .backend(config.environment.backend)
                .with_dependents(dependents),
            )
        }
        StepKind::Git {
            url,
            dest,
            branch,
            depth,
            recursive,
        } => {
            let mut step = GitStep::new(name, policy, ctx.expand(url)?, ctx.resolve_path(dest)?)
                .depth(*depth)
                .recursive(*recursive)
                .timeout(spec.timeout_secs);
            if let Some(branch) = branch {
                step = step.branch(ctx.expand(branch)?);
            }
            Box::new(step)
        }
        StepKind::Dependencies {
            packages,
            requirements,
            editable,
            index_url,
            extra_index_url,
            extra_args,
            cwd,
        } => {
            let mut step = DependenciesStep::new(name, policy)
                .packages(ctx.expand_all(packages)?)
                .extra_args(ctx.expand_all(extra_args)?)
                .timeout(spec.timeout_secs);
            for file in requirements {
                step = step.requirement(ctx.resolve_path(file)?);
            }
            for path in editable {
                step = step.editable(ctx.resolve_path(path)?);
            }
            if let Some(url) = index_url {
                step = step.index_url(ctx.expand(url)?);
            }
            if let Some(url) = extra_index_url {
                step = step.extra_index_url(ctx.expand(url)?);
            }
            if let Some(cwd) = cwd {
                step = step.current_dir(ctx.resolve_path(cwd)?);
            }
            Box::new(step)
        }
        StepKind::Artifact {
            url,
            dest,
            sha256,
            min_size,
        } => {
            let check = match (sha256, min_size) {
                (Some(hash), _) => PresenceCheck::Sha256(hash.to_ascii_lowercase()),
                (None, Some(min)) => PresenceCheck::MinSize(*min),
                (None, None) => PresenceCheck::NonEmpty,
            };
            let descriptor =
                ArtifactDescriptor::new(ctx.expand(url)?, ctx.resolve_path(dest)?).with_check(check);
            Box::new(ArtifactStep::new(name, policy, descriptor, transport))
        }
        StepKind::Patch { patch, dir } => Box::new(
            PatchStep::new(name, policy, ctx.resolve_path(patch)?, ctx.resolve_path(dir)?)
                .timeout(spec.timeout_secs),
        ),
    };
    Ok(step)
}

/// Steps whose effects live inside the project environment.
fn runs_in_environment(kind: &StepKind) -> bool {
    matches!(
        kind,
        StepKind::Dependencies { .. } | StepKind::Command { in_env: true, .. }
    )
}

/// Run a command, turning a non-zero exit into an error.
async fn execute(spec: CommandSpec) -> Result<CommandOutput> {
    Ok(run_checked(&spec).await?)
}

/// Run a probe command: exit 0 means present, any other exit absent.
/// Failing to start the command at all is a precondition error.
async fn probe_exit(step: &str, spec: CommandSpec) -> Result<bool> {
    match run(&spec).await {
        Ok(output) => Ok(output.success()),
        Err(e) => Err(ProvisionError::PreconditionCheck {
            step: step.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Remove a directory tree; a missing tree is fine.
async fn remove_tree(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Overrides;
    use crate::fakes::MemoryTransport;

    fn config(steps: &str) -> ProvisionConfig {
        let toml = format!(
            "[project]\nname = \"demo\"\ntarget_dir = \"/srv/demo\"\n\n\
             [environment]\nbackend = \"venv\"\nruntime_version = \"3.10\"\n\n\
             [vars]\nmodels = \"${{target_dir}}/models\"\n\n{}",
            steps
        );
        ProvisionConfig::from_toml_str(&toml, "/cfg").unwrap()
    }

    #[test]
    fn test_build_registry_in_config_order() {
        let config = config(
            r#"
[[steps]]
kind = "directory"
name = "Models dir"
path = "${models}"

[[steps]]
kind = "environment"
name = "Environment"

[[steps]]
kind = "artifact"
name = "Weights"
url = "https://example.com/w.bin"
dest = "${models}/w.bin"
"#,
        );
        let ctx = config.build_context(&Overrides::default()).unwrap();
        let registry =
            build_registry(&config, &ctx, Arc::new(MemoryTransport::new())).unwrap();
        assert_eq!(registry.names(), vec!["Models dir", "Environment", "Weights"]);
    }

    #[test]
    fn test_unknown_placeholder_is_config_error() {
        let config = config(
            r#"
[[steps]]
kind = "directory"
name = "Broken"
path = "${nowhere}/x"
"#,
        );
        let ctx = config.build_context(&Overrides::default()).unwrap();
        let err = build_registry(&config, &ctx, Arc::new(MemoryTransport::new()))
            .err()
            .unwrap();
        assert!(matches!(err, ProvisionError::Config(_)));
        assert!(err.to_string().contains("Broken"));
        assert!(err.to_string().contains("${nowhere}"));
    }

    #[test]
    fn test_environment_step_defaults_to_recreate() {
        let config = config("[[steps]]\nkind = \"environment\"\nname = \"Env\"\n");
        let ctx = config.build_context(&Overrides::default()).unwrap();
        let step = build_step(
            &config.steps[0],
            &config,
            &ctx,
            Arc::new(MemoryTransport::new()),
        )
        .unwrap();
        assert_eq!(step.policy().on_exists, ExistsPolicy::Recreate);
        assert!(step.supports_recreate());
    }

    #[test]
    fn test_runs_in_environment() {
        let dependencies = StepKind::Dependencies {
            packages: vec!["x".to_string()],
            requirements: vec![],
            editable: vec![],
            index_url: None,
            extra_index_url: None,
            extra_args: vec![],
            cwd: None,
        };
        assert!(runs_in_environment(&dependencies));
        assert!(!runs_in_environment(&StepKind::Directory {
            path: "x".to_string()
        }));
    }
}
