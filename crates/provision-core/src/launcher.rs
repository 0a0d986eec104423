//! Launcher script emitter.
//!
//! The launcher activates the project environment, changes into the
//! working directory and execs the default command, forwarding any
//! extra arguments.

use crate::config::LauncherConfig;
use crate::context::RunContext;
use crate::error::{ProvisionError, Result};
use crate::run::{RunReport, RunState};
use std::path::PathBuf;
use tracing::info;

/// Render the launcher script for a context.
pub fn render(ctx: &RunContext, launcher: &LauncherConfig) -> Result<String> {
    let command = ctx.expand_all(&launcher.command)?;
    let workdir = match &launcher.workdir {
        Some(dir) => ctx.resolve_path(dir)?,
        None => ctx.target_dir().to_path_buf(),
    };

    let mut lines = vec![
        "#!/usr/bin/env bash".to_string(),
        format!("# Launcher for {}", ctx.project()),
        "set -euo pipefail".to_string(),
        String::new(),
    ];
    lines.extend(ctx.env_manager().activation_lines(ctx.env_name()));
    for (key, value) in &launcher.env {
        lines.push(format!("export {}={}", key, shell_quote(&ctx.expand(value)?)));
    }
    lines.push(format!("cd {}", shell_quote(&workdir.to_string_lossy())));

    let quoted: Vec<String> = command.iter().map(|arg| shell_quote(arg)).collect();
    lines.push(format!("exec {} \"$@\"", quoted.join(" ")));

    let mut script = lines.join("\n");
    script.push('\n');
    Ok(script)
}

/// Write the launcher if the run completed. Returns the path written.
pub async fn emit(
    ctx: &RunContext,
    launcher: &LauncherConfig,
    report: &RunReport,
) -> Result<Option<PathBuf>> {
    if report.state != RunState::Completed {
        info!(state = report.state.as_str(), "Run not completed, launcher not written");
        return Ok(None);
    }

    let path = ctx.resolve_path(&launcher.path)?;
    if path.is_dir() {
        return Err(ProvisionError::Config(format!(
            "launcher path {} is a directory",
            path.display()
        )));
    }
    let script = render(ctx, launcher)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, script).await?;
    make_executable(&path).await?;

    info!(path = ?path, "Launcher written");
    Ok(Some(path))
}

#[cfg(unix)]
async fn make_executable(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn make_executable(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

/// Quote a value for POSIX shells; plain words are left alone.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "-_.:/%+=,@".contains(ch))
    {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\"'\"'"))
    }
}
