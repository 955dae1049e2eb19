//! Configuration types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Hard ceiling on concurrent workers, applied regardless of configuration.
pub const MAX_AGENTS_CEILING: usize = 8;

/// Which sandbox implementation a worker runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxKind {
    /// Direct execution on the host.
    #[default]
    Local,
    /// Persistent container with the workspace bind-mounted.
    Container,
}

impl SandboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Container => "container",
        }
    }
}

impl std::fmt::Display for SandboxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SandboxKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "container" | "docker" | "podman" => Ok(Self::Container),
            other => Err(ConfigError::InvalidValue {
                key: "sandbox".to_string(),
                message: format!("unknown sandbox kind '{other}' (expected local or container)"),
            }),
        }
    }
}

/// Container sandbox settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Image the worker container is created from.
    pub image: String,
    /// Memory limit passed to the container engine (e.g. `1g`).
    pub memory_limit: String,
    /// CPU limit passed to the container engine (e.g. `1.0`).
    pub cpu_limit: String,
    /// Network to attach; `None` uses the engine default.
    pub network: Option<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: "agentpool-worker:latest".to_string(),
            memory_limit: "1g".to_string(),
            cpu_limit: "1.0".to_string(),
            network: None,
        }
    }
}

/// Top-level pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of workers running at once (clamped to [`MAX_AGENTS_CEILING`]).
    pub max_agents: usize,
    /// Sandbox used when a task does not pick one.
    pub default_sandbox: SandboxKind,
    /// Model used when a task does not pick one.
    pub default_model: String,
    /// Per-worker deadline in seconds.
    pub timeout_secs: u64,
    /// Container sandbox settings.
    pub container: ContainerConfig,
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Optional JSON-lines log file.
    pub log_file: Option<PathBuf>,
    /// If set, every workspace must live under this directory.
    pub workspace_root: Option<PathBuf>,
    /// Executable that serves the coordination protocol over stdio.
    pub coordinator_command: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_agents: 4,
            default_sandbox: SandboxKind::Local,
            default_model: "claude-sonnet-4-5".to_string(),
            timeout_secs: 300,
            container: ContainerConfig::default(),
            log_level: "info".to_string(),
            log_file: None,
            workspace_root: None,
            coordinator_command: "agentpool-coordinator".to_string(),
        }
    }
}

impl PoolConfig {
    /// Set the worker cap, clamped to `1..=MAX_AGENTS_CEILING`.
    pub fn with_max_agents(mut self, max_agents: usize) -> Self {
        self.max_agents = clamp_agents(max_agents);
        self
    }

    /// Set the per-worker deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Worker cap after applying the hard ceiling.
    pub fn effective_max_agents(&self) -> usize {
        clamp_agents(self.max_agents)
    }

    /// Per-worker deadline as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Load configuration from a JSON document; missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: PoolConfig = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
        let max_agents = config.max_agents;
        Ok(config.with_max_agents(max_agents))
    }

    /// Defaults overlaid with `AGENTPOOL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = lookup("AGENTPOOL_MAX_AGENTS") {
            config.max_agents = parse_number("AGENTPOOL_MAX_AGENTS", &v)?;
        }
        if let Some(v) = lookup("AGENTPOOL_SANDBOX") {
            config.default_sandbox = v.parse()?;
        }
        if let Some(v) = lookup("AGENTPOOL_MODEL") {
            config.default_model = v;
        }
        if let Some(v) = lookup("AGENTPOOL_TIMEOUT") {
            config.timeout_secs = parse_number("AGENTPOOL_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("AGENTPOOL_LOG_LEVEL") {
            config.log_level = v;
        }
        if let Some(v) = lookup("AGENTPOOL_LOG_FILE") {
            config.log_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("AGENTPOOL_WORKSPACE_ROOT") {
            config.workspace_root = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("AGENTPOOL_COORDINATOR") {
            config.coordinator_command = v;
        }
        if let Some(v) = lookup("AGENTPOOL_CONTAINER_IMAGE") {
            config.container.image = v;
        }
        if let Some(v) = lookup("AGENTPOOL_CONTAINER_MEMORY") {
            config.container.memory_limit = v;
        }
        if let Some(v) = lookup("AGENTPOOL_CONTAINER_CPUS") {
            config.container.cpu_limit = v;
        }
        if let Some(v) = lookup("AGENTPOOL_CONTAINER_NETWORK") {
            config.container.network = Some(v);
        }

        let max_agents = config.max_agents;
        Ok(config.with_max_agents(max_agents))
    }
}

fn clamp_agents(n: usize) -> usize {
    n.clamp(1, MAX_AGENTS_CEILING)
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected a non-negative integer, got '{value}'"),
    })
}
