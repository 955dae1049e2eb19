//! Container sandbox: one long-lived container per worker.
//!
//! `start` runs a detached container with the workspace bind-mounted at
//! `/workspace` and keeps it alive with `tail -f /dev/null`; every command is
//! an `exec` into it. A healthy container left over under the same name is
//! reused instead of recreated. `stop` always removes the container.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{ExecutionResult, Sandbox, run_with_timeout};
use crate::config::{ContainerConfig, SandboxKind};
use crate::error::SandboxError;

/// Engines probed in order.
const ENGINES: [&str; 2] = ["docker", "podman"];

/// Mount point of the workspace inside the container.
const CONTAINER_WORKDIR: &str = "/workspace";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PROVISION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug)]
pub struct ContainerSandbox {
    name: String,
    workspace: PathBuf,
    config: ContainerConfig,
    container_name: String,
    engine: Option<String>,
    running: bool,
}

impl ContainerSandbox {
    pub fn new(workspace: PathBuf, name: &str, config: ContainerConfig) -> Self {
        Self {
            container_name: format!("agentpool-{}-{}", name, std::process::id()),
            name: name.to_string(),
            workspace,
            config,
            engine: None,
            running: false,
        }
    }

    /// Name of the container this sandbox manages.
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Arguments to the engine's `run` command for a fresh container.
    pub fn run_args(&self) -> Vec<String> {
        let host_dir =
            std::path::absolute(&self.workspace).unwrap_or_else(|_| self.workspace.clone());
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            self.container_name.clone(),
            "--memory".into(),
            self.config.memory_limit.clone(),
            "--cpus".into(),
            self.config.cpu_limit.clone(),
            "--security-opt".into(),
            "no-new-privileges".into(),
            "-v".into(),
            format!("{}:{CONTAINER_WORKDIR}:rw", host_dir.display()),
            "-w".into(),
            CONTAINER_WORKDIR.into(),
        ];
        if let Some(network) = &self.config.network {
            args.push("--network".into());
            args.push(network.clone());
        }
        args.push(self.config.image.clone());
        args.extend(["tail", "-f", "/dev/null"].map(String::from));
        args
    }

    fn exec_command(&self, engine: &str, command: &str) -> Command {
        let mut cmd = Command::new(engine);
        cmd.args(["exec", self.container_name.as_str(), "sh", "-c", command]);
        cmd
    }

    async fn engine_status(&self, engine: &str, args: &[&str]) -> Result<bool, SandboxError> {
        let mut cmd = Command::new(engine);
        cmd.args(args);
        let result = run_with_timeout(cmd, PROBE_TIMEOUT).await?;
        Ok(result.ok())
    }

    async fn is_healthy(&self, engine: &str) -> bool {
        match run_with_timeout(self.exec_command(engine, "echo ok"), PROBE_TIMEOUT).await {
            Ok(result) => result.ok() && result.stdout.contains("ok"),
            Err(_) => false,
        }
    }

    async fn remove(&self, engine: &str) -> Result<(), SandboxError> {
        self.engine_status(engine, &["rm", "-f", &self.container_name])
            .await
            .map(|_| ())
    }
}

/// First available container engine.
async fn detect_engine() -> Result<String, SandboxError> {
    for engine in ENGINES {
        let mut cmd = Command::new(engine);
        cmd.arg("--version");
        if let Ok(result) = run_with_timeout(cmd, PROBE_TIMEOUT).await {
            if result.ok() {
                debug!(engine, "Detected container engine");
                return Ok(engine.to_string());
            }
        }
    }
    Err(SandboxError::RuntimeMissing)
}

#[async_trait]
impl Sandbox for ContainerSandbox {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SandboxKind {
        SandboxKind::Container
    }

    fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn is_running(&self) -> bool {
        self.running
    }

    async fn start(&mut self) -> Result<(), SandboxError> {
        tokio::fs::create_dir_all(&self.workspace).await?;
        let engine = detect_engine().await?;

        if self
            .engine_status(&engine, &["inspect", &self.container_name])
            .await?
        {
            if self.is_healthy(&engine).await {
                info!(sandbox = %self.name, container = %self.container_name, "Reusing existing container");
                self.engine = Some(engine);
                self.running = true;
                return Ok(());
            }
            warn!(container = %self.container_name, "Existing container unhealthy, recreating");
            self.remove(&engine).await?;
        }

        let mut cmd = Command::new(&engine);
        cmd.args(self.run_args());
        let result = run_with_timeout(cmd, PROVISION_TIMEOUT).await?;
        if !result.ok() {
            return Err(SandboxError::ProvisionFailed {
                name: self.container_name.clone(),
                reason: result.stderr.trim().to_string(),
            });
        }

        info!(
            sandbox = %self.name,
            container = %self.container_name,
            image = %self.config.image,
            memory = %self.config.memory_limit,
            "Container sandbox started"
        );
        self.engine = Some(engine);
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SandboxError> {
        self.running = false;
        if let Some(engine) = self.engine.take() {
            self.remove(&engine).await?;
            info!(sandbox = %self.name, container = %self.container_name, "Container sandbox stopped");
        }
        Ok(())
    }

    async fn execute(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, SandboxError> {
        let engine = match (&self.engine, self.running) {
            (Some(engine), true) => engine,
            _ => {
                return Err(SandboxError::NotStarted {
                    name: self.name.clone(),
                });
            }
        };
        run_with_timeout(self.exec_command(engine, command), timeout).await
    }
}
