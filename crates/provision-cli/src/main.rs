//! Provisioner CLI
//!
//! The `provision` command brings a host to a known-good state for a
//! project described by a TOML config.
//!
//! ## Commands
//!
//! - `run`: Execute every step, skipping what is already provisioned
//! - `plan`: Show what `run` would do without changing anything
//! - `validate`: Check a config file and its placeholders
//! - `report`: Print the last recorded run report

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use provision_core::{
    build_registry, default_confirmer, launcher, report, HttpTransport, Overrides,
    ProvisionConfig, RunContext, RunState, StepRegistry,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "provision")]
#[command(author = "Provisioner Contributors")]
#[command(version = provision_core::VERSION)]
#[command(about = "Idempotent environment provisioning", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Path to the provisioning config (TOML)
    #[arg(short, long, env = "PROVISION_CONFIG", default_value = "provision.toml")]
    config: PathBuf,
}

#[derive(Args, Debug, Default)]
struct OverrideArgs {
    /// Target directory (default: $HOME/<project>)
    #[arg(long, env = "PROVISION_TARGET_DIR")]
    target_dir: Option<PathBuf>,

    /// Environment name
    #[arg(long, env = "PROVISION_ENV_NAME")]
    env_name: Option<String>,

    /// Runtime (Python) version for the environment
    #[arg(long, env = "PROVISION_RUNTIME_VERSION")]
    runtime_version: Option<String>,
}

impl From<OverrideArgs> for Overrides {
    fn from(args: OverrideArgs) -> Self {
        Overrides {
            target_dir: args.target_dir,
            env_name: args.env_name,
            runtime_version: args.runtime_version,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the target, skipping steps that are already satisfied
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        overrides: OverrideArgs,

        /// Confirm destructive recreation without prompting
        #[arg(
            short,
            long,
            env = "PROVISION_ASSUME_YES",
            value_parser = clap::builder::BoolishValueParser::new()
        )]
        yes: bool,

        /// Do not write the launcher script
        #[arg(long)]
        no_launcher: bool,
    },

    /// Show what `run` would do without changing anything
    Plan {
        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Validate a config file
    Validate {
        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Print the last run report (JSON)
    Report {
        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        overrides: OverrideArgs,

        /// Print the text summary instead of JSON
        #[arg(long)]
        summary: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    provision_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            config,
            overrides,
            yes,
            no_launcher,
        } => cmd_run(&config.config, overrides.into(), yes, no_launcher).await,
        Commands::Plan { config, overrides } => cmd_plan(&config.config, overrides.into()).await,
        Commands::Validate { config, overrides } => cmd_validate(&config.config, overrides.into()),
        Commands::Report {
            config,
            overrides,
            summary,
        } => cmd_report(&config.config, overrides.into(), summary).await,
    }
}

/// Load the config and resolve everything a run needs.
fn prepare(path: &Path, overrides: &Overrides) -> Result<(ProvisionConfig, RunContext, StepRegistry)> {
    let config = ProvisionConfig::load(path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    let ctx = config
        .build_context(overrides)
        .context("Failed to resolve run context")?;
    let transport = Arc::new(HttpTransport::new().context("Failed to create HTTP transport")?);
    let registry = build_registry(&config, &ctx, transport).context("Invalid step definitions")?;
    Ok((config, ctx, registry))
}

/// Execute a provisioning run
async fn cmd_run(path: &Path, overrides: Overrides, yes: bool, no_launcher: bool) -> Result<()> {
    let (config, ctx, registry) = prepare(path, &overrides)?;
    info!(
        project = %ctx.project(),
        target_dir = ?ctx.target_dir(),
        env = %ctx.env_name(),
        steps = registry.len(),
        "Starting provisioning run"
    );

    let confirmer = default_confirmer(yes);
    let run = registry.run_all(&ctx, confirmer.as_ref()).await;

    let report_path = report::write_report(ctx.state_dir(), &run)
        .await
        .context("Failed to write run report")?;

    print!("{}", report::render_text(&run));
    println!("Report: {}", report_path.display());

    if !no_launcher {
        if let Some(launcher_config) = &config.launcher {
            let written = launcher::emit(&ctx, launcher_config, &run)
                .await
                .context("Failed to write launcher")?;
            if let Some(path) = written {
                println!("Launcher: {}", path.display());
            }
        }
    }

    if run.state != RunState::Completed {
        anyhow::bail!(
            "Provisioning aborted: {}",
            run.abort_reason.as_deref().unwrap_or("unknown reason")
        );
    }
    Ok(())
}

/// Dry run: probe every step and print the decisions
async fn cmd_plan(path: &Path, overrides: Overrides) -> Result<()> {
    let (_config, ctx, registry) = prepare(path, &overrides)?;
    let planned = registry.plan(&ctx).await;

    println!("Plan for {} ({})", ctx.project(), ctx.target_dir().display());
    print!("{}", report::render_plan(&planned));
    Ok(())
}

/// Validate config, placeholders and step names
fn cmd_validate(path: &Path, overrides: Overrides) -> Result<()> {
    let (config, ctx, registry) = prepare(path, &overrides)?;

    println!("Config OK: {}", path.display());
    println!("Project: {}", ctx.project());
    println!("Target: {}", ctx.target_dir().display());
    println!(
        "Environment: {} ({}, runtime {})",
        ctx.env_name(),
        ctx.env_manager().kind(),
        if ctx.runtime_version().is_empty() {
            "default"
        } else {
            ctx.runtime_version()
        }
    );
    println!("Steps ({}):", registry.len());
    for spec in &config.steps {
        println!(
            "  {:<16} {}{}",
            spec.kind.name(),
            spec.name,
            if spec.is_mandatory() { "" } else { " (optional)" }
        );
    }
    if config.launcher.is_some() {
        println!("Launcher: enabled");
    }
    Ok(())
}

/// Show the last recorded run
async fn cmd_report(path: &Path, overrides: Overrides, summary: bool) -> Result<()> {
    let config = ProvisionConfig::load(path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    let ctx = config
        .build_context(&overrides)
        .context("Failed to resolve run context")?;

    let last = report::read_last_report(ctx.state_dir())
        .await
        .context("Failed to read last run report")?;
    let Some(last) = last else {
        anyhow::bail!("No run recorded under {}", ctx.state_dir().display());
    };

    if summary {
        print!("{}", report::render_text(&last));
    } else {
        println!("{}", serde_json::to_string_pretty(&last)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "provision",
            "run",
            "--config",
            "sd.toml",
            "--target-dir",
            "/opt/sd",
            "--yes",
            "--no-launcher",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                config,
                overrides,
                yes,
                no_launcher,
            } => {
                assert_eq!(config.config, PathBuf::from("sd.toml"));
                assert_eq!(overrides.target_dir, Some(PathBuf::from("/opt/sd")));
                assert!(yes);
                assert!(no_launcher);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_overrides_conversion() {
        let overrides: Overrides = OverrideArgs {
            target_dir: None,
            env_name: Some("sd".to_string()),
            runtime_version: Some("3.10".to_string()),
        }
        .into();
        assert_eq!(overrides.env_name.as_deref(), Some("sd"));
        assert_eq!(overrides.runtime_version.as_deref(), Some("3.10"));
        assert!(overrides.target_dir.is_none());
    }
}
