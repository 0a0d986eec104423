//! Config file → registry → run → report/launcher, on real subprocesses.

#![cfg(unix)]

use provision_core::fakes::MemoryTransport;
use provision_core::{
    build_registry, launcher, report, AssumeYes, Overrides, ProvisionConfig, ProvisionError,
    RunState, StepStatus,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::tempdir;

const CONFIG: &str = r#"
[project]
name = "demo"

[environment]
name = "demo-env"
backend = "venv"
runtime_version = "3.10"

[vars]
models = "${target_dir}/models"

[[steps]]
kind = "directory"
name = "Models dir"
path = "${models}"

[[steps]]
kind = "command"
name = "Write marker"
command = ["sh", "-c", "echo ${project} > marker.txt"]
cwd = "${target_dir}"
check = ["test", "-f", "${target_dir}/marker.txt"]

[[steps]]
kind = "command"
name = "Accelerator"
mandatory = false
command = ["sh", "-c", "echo 'no GPU found' >&2; exit 1"]

[[steps]]
kind = "artifact"
name = "Weights"
url = "https://example.com/w.bin"
dest = "${models}/w.bin"
min_size = 4

[launcher]
command = ["python", "app.py"]
workdir = "${target_dir}"
"#;

fn write_config(dir: &std::path::Path, content: &str) -> PathBuf {
    let path = dir.join("provision.toml");
    std::fs::write(&path, content).unwrap();
    path
}

/// Test: full pipeline from a config file
#[tokio::test]
async fn test_config_driven_run() {
    let cfg_dir = tempdir().unwrap();
    let target = tempdir().unwrap();
    let config = ProvisionConfig::load(&write_config(cfg_dir.path(), CONFIG)).unwrap();
    let overrides = Overrides {
        target_dir: Some(target.path().to_path_buf()),
        ..Overrides::default()
    };
    let ctx = config.build_context(&overrides).unwrap();
    let transport = Arc::new(MemoryTransport::new().with_body("https://example.com/w.bin", b"weights".to_vec()));
    let registry = build_registry(&config, &ctx, transport.clone()).unwrap();

    let run = registry.run_all(&ctx, &AssumeYes).await;

    assert_eq!(run.state, RunState::Completed);
    let statuses: Vec<StepStatus> = run.steps().iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            StepStatus::Succeeded,
            StepStatus::Succeeded,
            StepStatus::Failed,
            StepStatus::Succeeded
        ]
    );
    assert!(run.steps()[2].message.contains("no GPU found"));
    assert_eq!(
        std::fs::read_to_string(target.path().join("marker.txt")).unwrap(),
        "demo\n"
    );

    report::write_report(ctx.state_dir(), &run).await.unwrap();
    let last = report::read_last_report(ctx.state_dir()).await.unwrap().unwrap();
    assert_eq!(last.run_id, run.run_id);

    let launcher_path = launcher::emit(&ctx, config.launcher.as_ref().unwrap(), &run)
        .await
        .unwrap()
        .unwrap();
    let script = std::fs::read_to_string(launcher_path).unwrap();
    assert!(script.ends_with("exec python app.py \"$@\"\n"));

    // Second run: everything already there except the optional step,
    // which has no probe and no stamp, so it is attempted again.
    let registry = build_registry(&config, &ctx, transport.clone()).unwrap();
    let rerun = registry.run_all(&ctx, &AssumeYes).await;
    let statuses: Vec<StepStatus> = rerun.steps().iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            StepStatus::Skipped,
            StepStatus::Skipped,
            StepStatus::Failed,
            StepStatus::Skipped
        ]
    );
    assert_eq!(transport.calls(), 1);
}

/// Test: unknown placeholder is rejected before anything runs
#[tokio::test]
async fn test_unknown_placeholder_rejected() {
    let cfg_dir = tempdir().unwrap();
    let target = tempdir().unwrap();
    let content = CONFIG.replace("${models}/w.bin", "${weights_dir}/w.bin");
    let config = ProvisionConfig::load(&write_config(cfg_dir.path(), &content)).unwrap();
    let overrides = Overrides {
        target_dir: Some(target.path().to_path_buf()),
        ..Overrides::default()
    };
    let ctx = config.build_context(&overrides).unwrap();

    let err = build_registry(&config, &ctx, Arc::new(MemoryTransport::new()))
        .err()
        .unwrap();
    assert!(matches!(err, ProvisionError::Config(_)));
    assert!(err.to_string().contains("weights_dir"));
    assert!(!target.path().join("models").exists());
}

/// Test: missing config file is a config error
#[test]
fn test_missing_config_file() {
    let dir = tempdir().unwrap();
    let err = ProvisionConfig::load(&dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, ProvisionError::Config(_)));
}
