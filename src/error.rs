//! Error types for agentpool.

use std::path::PathBuf;

/// Top-level error type for the pool.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Security error: {0}")]
    Security(#[from] SecurityError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared task queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Task not found: {id}")]
    NotFound { id: String },

    #[error("Cannot {action} task {id}: status is {status}")]
    InvalidState {
        id: String,
        action: &'static str,
        status: String,
    },

    #[error("Queue file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Message channel errors (file-backed variant only; the in-process bus never fails).
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Message log {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sandbox lifecycle and execution errors.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Sandbox {name} not started")]
    NotStarted { name: String },

    #[error("No container runtime found. Install Docker or Podman.")]
    RuntimeMissing,

    #[error("Failed to provision sandbox {name}: {reason}")]
    ProvisionFailed { name: String, reason: String },

    #[error("Failed to spawn command: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Workspace validation errors.
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("Workspace path rejected: {path} ({reason})")]
    BlockedPath { path: PathBuf, reason: String },

    #[error("Workspace {path} is not under allowed root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

/// Agent runtime invocation errors.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Failed to launch agent runtime {program}: {reason}")]
    Launch { program: String, reason: String },

    #[error("Agent runtime failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coordination protocol transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request handler failed: {0}")]
    Handler(#[from] tokio::task::JoinError),
}

/// Pipeline construction errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Pipeline requires at least one stage")]
    NoStages,
}

/// Result type alias for the pool.
pub type Result<T> = std::result::Result<T, Error>;
