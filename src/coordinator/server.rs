//! Line-delimited JSON-RPC loop exposing the queue and message log.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::protocol::{
    CallToolResult, METHOD_NOT_FOUND, PROTOCOL_VERSION, RpcRequest, RpcResponse, SERVER_NAME,
};
use super::tools::{ToolCall, ToolCallError, tool_definitions};
use crate::error::{ProtocolError, QueueError};
use crate::messages::MessageLog;
use crate::queue::TaskQueue;

/// Environment variable naming the shared state directory.
pub const STATE_DIR_ENV: &str = "AGENTPOOL_STATE_DIR";
/// Environment variable naming the worker this server acts for.
pub const AGENT_ID_ENV: &str = "AGENTPOOL_AGENT_ID";

/// Coordination server bound to one worker identity.
///
/// Holds no state of its own beyond handles on the shared files, so one
/// instance per worker can run side by side. Clones share the same handles.
#[derive(Debug, Clone)]
pub struct CoordinatorServer {
    worker_id: String,
    state_dir: PathBuf,
    queue: Arc<TaskQueue>,
    messages: MessageLog,
}

impl CoordinatorServer {
    pub fn open(state_dir: &Path, worker_id: impl Into<String>) -> Result<Self, QueueError> {
        Ok(Self {
            worker_id: worker_id.into(),
            state_dir: state_dir.to_path_buf(),
            queue: Arc::new(TaskQueue::open(state_dir)?),
            messages: MessageLog::new(state_dir),
        })
    }

    /// Configure from `AGENTPOOL_STATE_DIR` and `AGENTPOOL_AGENT_ID`.
    pub fn from_env() -> Result<Self, QueueError> {
        let state_dir = std::env::var_os(STATE_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("agentpool"));
        let worker_id = std::env::var(AGENT_ID_ENV).unwrap_or_else(|_| "unknown".to_string());
        Self::open(&state_dir, worker_id)
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Serve requests until `reader` reaches EOF.
    ///
    /// Blank or unparseable lines are skipped. Notifications get no reply.
    /// Each line is handled on the blocking pool, since tool calls take the
    /// file lock and touch the state files.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<(), ProtocolError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(worker_id = %self.worker_id, state_dir = %self.state_dir.display(), "Coordinator serving");

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let server = self.clone();
            let reply = tokio::task::spawn_blocking(move || server.handle_line(&line)).await?;
            let Some(reply) = reply else {
                continue;
            };
            let mut out = serde_json::to_string(&reply)?;
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;
        }

        debug!(worker_id = %self.worker_id, "Coordinator input closed");
        Ok(())
    }

    /// Handle one raw input line.
    pub fn handle_line(&self, line: &str) -> Option<RpcResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => self.handle_request(request),
            Err(e) => {
                debug!(error = %e, "Skipping malformed request line");
                None
            }
        }
    }

    /// Dispatch one request. `None` for notifications.
    pub fn handle_request(&self, request: RpcRequest) -> Option<RpcResponse> {
        let RpcRequest {
            id, method, params, ..
        } = request;

        match method.as_str() {
            "initialize" => Some(RpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {
                        "name": SERVER_NAME,
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )),
            "notifications/initialized" => None,
            "tools/list" => Some(RpcResponse::success(
                id,
                json!({ "tools": tool_definitions() }),
            )),
            "tools/call" => {
                let params = params.unwrap_or(Value::Null);
                let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
                let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                let result = CallToolResult::json(&self.call_tool(name, &args));
                Some(RpcResponse::success(id, json!(result)))
            }
            other => {
                warn!(method = other, "Unknown method");
                Some(RpcResponse::failure(
                    id,
                    METHOD_NOT_FOUND,
                    format!("Unknown method: {other}"),
                ))
            }
        }
    }

    /// Run a coordination tool and return its JSON payload.
    pub fn call_tool(&self, name: &str, args: &Value) -> Value {
        let call = match ToolCall::parse(name, args) {
            Ok(call) => call,
            Err(e @ ToolCallError::UnknownTool(_)) => {
                return json!({ "error": e.to_string() });
            }
            Err(e @ ToolCallError::MissingArgument(_)) => {
                return json!({ "success": false, "error": e.to_string() });
            }
        };
        debug!(worker_id = %self.worker_id, tool = name, "Tool call");

        match call {
            ToolCall::ClaimTask => match self.queue.claim(&self.worker_id) {
                Ok(Some(item)) => json!({
                    "claimed": true,
                    "task_id": item.id,
                    "description": item.description,
                }),
                Ok(None) => json!({ "claimed": false, "message": "No tasks available" }),
                Err(e) => json!({ "claimed": false, "error": e.to_string() }),
            },
            ToolCall::CompleteTask { task_id, result } => {
                outcome(self.queue.complete(&task_id, result))
            }
            ToolCall::FailTask { task_id, error } => outcome(self.queue.fail(&task_id, &error)),
            ToolCall::ListTasks => match self.queue.status() {
                Ok(items) => json!({ "tasks": items }),
                Err(e) => json!({ "error": e.to_string() }),
            },
            ToolCall::SendMessage { to, content } => {
                sent(self.messages.post(&self.worker_id, &to, &content))
            }
            ToolCall::BroadcastMessage { content } => {
                sent(self.messages.broadcast(&self.worker_id, &content))
            }
            ToolCall::CheckMessages => match self.messages.check(&self.worker_id) {
                Ok(messages) => {
                    let messages: Vec<Value> = messages
                        .into_iter()
                        .map(|m| {
                            json!({
                                "from": m.from,
                                "content": m.content,
                                "timestamp": m.timestamp,
                            })
                        })
                        .collect();
                    json!({ "messages": messages })
                }
                Err(e) => json!({ "messages": [], "error": e.to_string() }),
            },
        }
    }
}

fn outcome(result: Result<(), QueueError>) -> Value {
    match result {
        Ok(()) => json!({ "success": true }),
        Err(e) => json!({ "success": false, "error": e.to_string() }),
    }
}

fn sent(result: Result<(), crate::error::MessageError>) -> Value {
    match result {
        Ok(()) => json!({ "sent": true }),
        Err(e) => json!({ "sent": false, "error": e.to_string() }),
    }
}
