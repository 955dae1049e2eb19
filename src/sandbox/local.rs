//! Host sandbox: no isolation, commands run in the workspace directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ExecutionResult, Sandbox, run_with_timeout};
use crate::config::SandboxKind;
use crate::error::SandboxError;

#[derive(Debug)]
pub struct LocalSandbox {
    name: String,
    workspace: PathBuf,
    running: bool,
}

impl LocalSandbox {
    pub fn new(workspace: PathBuf, name: &str) -> Self {
        Self {
            name: name.to_string(),
            workspace,
            running: false,
        }
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SandboxKind {
        SandboxKind::Local
    }

    fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn is_running(&self) -> bool {
        self.running
    }

    async fn start(&mut self) -> Result<(), SandboxError> {
        tokio::fs::create_dir_all(&self.workspace).await?;
        self.running = true;
        info!(sandbox = %self.name, workspace = %self.workspace.display(), "Local sandbox started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SandboxError> {
        self.running = false;
        debug!(sandbox = %self.name, "Local sandbox stopped");
        Ok(())
    }

    async fn execute(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, SandboxError> {
        if !self.running {
            return Err(SandboxError::NotStarted {
                name: self.name.clone(),
            });
        }

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&self.workspace);

        let result = run_with_timeout(cmd, timeout).await?;
        debug!(sandbox = %self.name, exit_code = result.exit_code, "Command finished");
        Ok(result)
    }
}
