//! Execution sandboxes.
//!
//! A sandbox owns one workspace directory and runs shell commands against it:
//! - [`LocalSandbox`] runs directly on the host
//! - [`ContainerSandbox`] keeps one container alive for the worker's lifetime
//!   and runs every command inside it
//!
//! Commands that outlive their timeout are killed and reported as a synthetic
//! result (`exit_code = -1`, `stderr = "Timed out"`) instead of an error.

pub mod container;
pub mod local;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

pub use container::ContainerSandbox;
pub use local::LocalSandbox;

use crate::config::{ContainerConfig, SandboxKind};
use crate::error::SandboxError;

/// Maximum output size per stream before truncation (64KB).
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Output of one sandboxed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecutionResult {
    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }

    pub(crate) fn timed_out() -> Self {
        Self {
            stdout: String::new(),
            stderr: "Timed out".to_string(),
            exit_code: -1,
        }
    }
}

/// Isolated command execution bound to one workspace.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Identity, usually the worker id.
    fn name(&self) -> &str;

    fn kind(&self) -> SandboxKind;

    /// Host directory the worker reads and writes.
    fn workspace(&self) -> &Path;

    fn is_running(&self) -> bool;

    /// Prepare the sandbox. Must be called before [`execute`](Self::execute).
    async fn start(&mut self) -> Result<(), SandboxError>;

    /// Tear the sandbox down. Safe to call on a sandbox that never started.
    async fn stop(&mut self) -> Result<(), SandboxError>;

    /// Run `command` through `sh -c`, killing it after `timeout`.
    async fn execute(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, SandboxError>;
}

/// Build the sandbox for `kind`. Nothing is provisioned until `start`.
pub fn create(
    kind: SandboxKind,
    workspace: PathBuf,
    name: &str,
    config: &ContainerConfig,
) -> Box<dyn Sandbox> {
    match kind {
        SandboxKind::Local => Box::new(LocalSandbox::new(workspace, name)),
        SandboxKind::Container => {
            Box::new(ContainerSandbox::new(workspace, name, config.clone()))
        }
    }
}

/// Builds the sandbox for one worker from its kind, workspace and name.
pub type SandboxFactory = Arc<dyn Fn(SandboxKind, PathBuf, &str) -> Box<dyn Sandbox> + Send + Sync>;

/// Factory that calls [`create`] with `container` settings.
pub fn default_factory(container: ContainerConfig) -> SandboxFactory {
    Arc::new(move |kind: SandboxKind, workspace: PathBuf, name: &str| {
        create(kind, workspace, name, &container)
    })
}

/// Spawn `command` with piped output and wait at most `timeout` for it.
///
/// The child is spawned with `kill_on_drop`, so abandoning the wait on
/// timeout terminates it.
pub(crate) async fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
) -> Result<ExecutionResult, SandboxError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .map_err(|e| SandboxError::Spawn(e.to_string()))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ExecutionResult {
            stdout: truncate_output(&String::from_utf8_lossy(&output.stdout)),
            stderr: truncate_output(&String::from_utf8_lossy(&output.stderr)),
            exit_code: output.status.code().unwrap_or(-1),
        }),
        Ok(Err(e)) => Err(SandboxError::Io(e)),
        Err(_) => Ok(ExecutionResult::timed_out()),
    }
}

/// Truncate output to fit within limits (UTF-8 safe).
fn truncate_output(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_SIZE {
        return s.to_string();
    }
    let half = MAX_OUTPUT_SIZE / 2;
    let head_end = floor_char_boundary(s, half);
    let tail_start = floor_char_boundary(s, s.len() - half);
    format!(
        "{}\n\n... [truncated {} bytes] ...\n\n{}",
        &s[..head_end],
        tail_start - head_end,
        &s[tail_start..]
    )
}

/// Largest byte index <= `i` that is a char boundary.
fn floor_char_boundary(s: &str, i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    let mut pos = i;
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_means_zero_exit() {
        let result = ExecutionResult {
            stdout: "hi".into(),
            stderr: String::new(),
            exit_code: 0,
        };
        assert!(result.ok());
        assert!(!ExecutionResult::timed_out().ok());
        assert_eq!(ExecutionResult::timed_out().stderr, "Timed out");
    }

    #[test]
    fn truncation_keeps_head_and_tail() {
        let s = format!("{}{}", "a".repeat(MAX_OUTPUT_SIZE), "b".repeat(1000));
        let out = truncate_output(&s);
        assert!(out.starts_with('a'));
        assert!(out.ends_with('b'));
        assert!(out.contains("[truncated 1000 bytes]"));
        assert_eq!(truncate_output("short"), "short");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "é".repeat(MAX_OUTPUT_SIZE);
        let out = truncate_output(&s);
        assert!(out.contains("[truncated"));
        assert!(out.starts_with('é'));
    }

    #[test]
    fn char_boundary_floor() {
        assert_eq!(floor_char_boundary("hello", 3), 3);
        assert_eq!(floor_char_boundary("hello", 100), 5);
        assert_eq!(floor_char_boundary("café", 4), 3);
    }

    #[test]
    fn factory_picks_variant() {
        let dir = tempfile::tempdir().unwrap();
        let config = ContainerConfig::default();

        let local = create(SandboxKind::Local, dir.path().to_path_buf(), "w1", &config);
        assert_eq!(local.kind(), SandboxKind::Local);
        assert_eq!(local.name(), "w1");
        assert!(!local.is_running());

        let container = create(SandboxKind::Container, dir.path().to_path_buf(), "w2", &config);
        assert_eq!(container.kind(), SandboxKind::Container);
        assert_eq!(container.workspace(), dir.path());

        let factory = default_factory(config);
        let built = factory(SandboxKind::Container, dir.path().to_path_buf(), "w3");
        assert_eq!(built.kind(), SandboxKind::Container);
        assert_eq!(built.name(), "w3");
    }
}
