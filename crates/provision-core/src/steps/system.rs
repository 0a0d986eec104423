use super::{execute, probe_exit};
use crate::context::RunContext;
use crate::error::Result;
use crate::step::{fingerprint_parts, Presence, Step, StepPolicy};
use async_trait::async_trait;
use provision_env::{is_binary_available, CommandSpec};
use tracing::info;

const APT_FRONTEND: (&str, &str) = ("DEBIAN_FRONTEND", "noninteractive");

/// OS packages through the host package manager.
#[derive(Debug, Clone)]
pub struct SystemPackagesStep {
    name: String,
    policy: StepPolicy,
    manager: String,
    packages: Vec<String>,
    sudo: bool,
    update: bool,
    timeout_secs: u64,
}

impl SystemPackagesStep {
    pub fn new(
        name: impl Into<String>,
        policy: StepPolicy,
        manager: impl Into<String>,
        packages: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            manager: manager.into(),
            packages,
            sudo: false,
            update: true,
            timeout_secs: 0,
        }
    }

    pub fn sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    pub fn update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn is_apt(&self) -> bool {
        matches!(self.manager.as_str(), "apt-get" | "apt")
    }

    /// sudo resets the environment, so under sudo the apt frontend
    /// setting travels on the command line through `env`.
    fn privileged(&self, args: Vec<String>) -> CommandSpec {
        let mut argv = Vec::with_capacity(args.len() + 4);
        if self.sudo {
            argv.push("sudo".to_string());
            if self.is_apt() {
                argv.push("env".to_string());
                argv.push(format!("{}={}", APT_FRONTEND.0, APT_FRONTEND.1));
            }
        }
        argv.push(self.manager.clone());
        argv.extend(args);
        let spec = CommandSpec::new(argv).timeout(self.timeout_secs);
        if self.is_apt() && !self.sudo {
            spec.env(APT_FRONTEND.0, APT_FRONTEND.1)
        } else {
            spec
        }
    }

    /// Index refresh command, if the manager has one worth running.
    pub fn update_command(&self) -> Option<CommandSpec> {
        if !self.update {
            return None;
        }
        match self.manager.as_str() {
            "apt-get" | "apt" | "apk" => Some(self.privileged(vec!["update".to_string()])),
            "pacman" => Some(self.privileged(vec!["-Sy".to_string()])),
            _ => None,
        }
    }

    pub fn install_command(&self) -> CommandSpec {
        let mut args: Vec<String> = match self.manager.as_str() {
            "apt-get" | "apt" | "dnf" | "yum" | "zypper" => vec!["install", "-y"],
            "pacman" => vec!["-S", "--noconfirm", "--needed"],
            "apk" => vec!["add"],
            _ => vec!["install"],
        }
        .into_iter()
        .map(String::from)
        .collect();
        args.extend(self.packages.iter().cloned());
        self.privileged(args)
    }
}

#[async_trait]
impl Step for SystemPackagesStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> StepPolicy {
        self.policy
    }

    fn fingerprint(&self) -> String {
        let mut parts = vec!["system_packages".to_string(), self.manager.clone()];
        parts.extend(self.packages.iter().cloned());
        fingerprint_parts(parts)
    }

    /// Debian-family hosts are queried through `dpkg -s`; other managers
    /// rely on the stamp.
    async fn probe(&self, _ctx: &RunContext) -> Result<Presence> {
        if !self.is_apt() || !is_binary_available("dpkg") {
            return Ok(Presence::Unknown);
        }
        let mut argv = vec!["dpkg".to_string(), "-s".to_string()];
        argv.extend(self.packages.iter().cloned());
        let installed = probe_exit(&self.name, CommandSpec::new(argv)).await?;
        Ok(if installed {
            Presence::Present
        } else {
            Presence::Absent
        })
    }

    async fn apply(&self, _ctx: &RunContext) -> Result<String> {
        if let Some(update) = self.update_command() {
            info!(manager = %self.manager, "Refreshing package index");
            execute(update).await?;
        }
        info!(manager = %self.manager, packages = ?self.packages, "Installing system packages");
        execute(self.install_command()).await?;
        Ok(format!(
            "installed {} package(s) with {}",
            self.packages.len(),
            self.manager
        ))
    }
}
