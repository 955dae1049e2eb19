//! Agent runtime boundary.
//!
//! The pool never executes a task itself; it hands a prompt, model, working
//! directory, and tool-server configuration to an [`AgentRuntime`] and gets
//! back the response text plus usage metadata.

pub mod claude;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use claude::ClaudeCliRuntime;

use crate::error::RuntimeError;

/// How to launch one stdio tool server for the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Tool servers keyed by name.
pub type ToolServers = BTreeMap<String, ToolServerConfig>;

/// One agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub worker_id: String,
    pub prompt: String,
    pub model: String,
    pub working_dir: PathBuf,
    /// Empty when the agent should use its built-in system prompt.
    pub system_prompt: String,
    pub tool_servers: ToolServers,
}

/// What an agent produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub text: String,
    pub model_used: String,
    pub tokens_used: Option<u64>,
    /// Tool names in invocation order.
    pub tool_uses: Vec<String>,
}

/// Executes a prompt to completion.
///
/// Implementations must stop any external process they started when the
/// returned future is dropped; that is how deadlines are enforced.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, request: AgentRequest) -> Result<AgentResponse, RuntimeError>;
}
