//! What a worker is asked to do.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::SandboxKind;
use crate::runtime::{ToolServerConfig, ToolServers};

/// A prompt plus per-worker overrides of the pool defaults.
#[derive(Debug, Clone, Default)]
pub struct WorkerTask {
    pub prompt: String,
    /// Assigned by the pool (`agent-N`) when unset.
    pub worker_id: Option<String>,
    pub model: Option<String>,
    pub sandbox: Option<SandboxKind>,
    pub workspace: Option<PathBuf>,
    pub system_prompt: Option<String>,
    pub timeout: Option<Duration>,
    /// Extra tool servers, merged over the pool's own.
    pub tool_servers: ToolServers,
}

impl WorkerTask {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = Some(id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_sandbox(mut self, kind: SandboxKind) -> Self {
        self.sandbox = Some(kind);
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_tool_server(mut self, name: impl Into<String>, server: ToolServerConfig) -> Self {
        self.tool_servers.insert(name.into(), server);
        self
    }
}
