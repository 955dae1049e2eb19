//! Command-line agent runtime (`claude -p` with streaming JSON output).

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{AgentRequest, AgentResponse, AgentRuntime, ToolServers};
use crate::error::RuntimeError;

/// Launches a Claude-compatible CLI per request.
#[derive(Debug, Clone)]
pub struct ClaudeCliRuntime {
    program: String,
    permission_mode: String,
    extra_args: Vec<String>,
}

impl Default for ClaudeCliRuntime {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            permission_mode: "bypassPermissions".to_string(),
            extra_args: Vec::new(),
        }
    }
}

impl ClaudeCliRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_permission_mode(mut self, mode: impl Into<String>) -> Self {
        self.permission_mode = mode.into();
        self
    }

    /// Arguments appended after the generated ones.
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Full argument list for `request`.
    pub fn build_args(&self, request: &AgentRequest) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            request.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--model".to_string(),
            request.model.clone(),
            "--permission-mode".to_string(),
            self.permission_mode.clone(),
        ];
        if !request.system_prompt.is_empty() {
            args.push("--append-system-prompt".to_string());
            args.push(request.system_prompt.clone());
        }
        if !request.tool_servers.is_empty() {
            args.push("--mcp-config".to_string());
            args.push(mcp_config(&request.tool_servers).to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

fn mcp_config(servers: &ToolServers) -> Value {
    json!({ "mcpServers": servers })
}

/// Accumulates the events of one streamed session.
#[derive(Debug, Default)]
struct StreamState {
    text: String,
    tool_uses: Vec<String>,
    model: Option<String>,
    tokens: Option<u64>,
    final_result: Option<String>,
    is_error: bool,
}

impl StreamState {
    fn feed(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            debug!("Ignoring non-JSON agent output line");
            return;
        };

        match event.get("type").and_then(|t| t.as_str()) {
            Some("assistant") => {
                let Some(message) = event.get("message") else {
                    return;
                };
                if let Some(model) = message.get("model").and_then(|m| m.as_str()) {
                    self.model = Some(model.to_string());
                }
                let blocks = message
                    .get("content")
                    .and_then(|c| c.as_array())
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                for block in blocks {
                    match block.get("type").and_then(|t| t.as_str()) {
                        Some("text") => {
                            if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                                self.text.push_str(text);
                            }
                        }
                        Some("tool_use") => {
                            if let Some(name) = block.get("name").and_then(|n| n.as_str()) {
                                self.tool_uses.push(name.to_string());
                            }
                        }
                        _ => {}
                    }
                }
            }
            Some("result") => {
                self.is_error = event
                    .get("is_error")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                self.final_result = event
                    .get("result")
                    .and_then(|r| r.as_str())
                    .map(String::from);
                if let Some(usage) = event.get("usage") {
                    let total: u64 = ["input_tokens", "output_tokens"]
                        .iter()
                        .filter_map(|k| usage.get(*k).and_then(|v| v.as_u64()))
                        .sum();
                    self.tokens = Some(total);
                }
            }
            _ => {}
        }
    }

    fn finish(self, requested_model: &str) -> Result<AgentResponse, RuntimeError> {
        if self.is_error {
            return Err(RuntimeError::Failed(
                self.final_result
                    .unwrap_or_else(|| "agent reported an error".to_string()),
            ));
        }
        let text = if self.text.is_empty() {
            self.final_result.unwrap_or_default()
        } else {
            self.text
        };
        Ok(AgentResponse {
            text,
            model_used: self.model.unwrap_or_else(|| requested_model.to_string()),
            tokens_used: self.tokens,
            tool_uses: self.tool_uses,
        })
    }
}

#[async_trait]
impl AgentRuntime for ClaudeCliRuntime {
    fn name(&self) -> &str {
        &self.program
    }

    async fn run(&self, request: AgentRequest) -> Result<AgentResponse, RuntimeError> {
        let mut child = Command::new(&self.program)
            .args(self.build_args(&request))
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::Launch {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        info!(worker_id = %request.worker_id, model = %request.model, "Agent session started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Failed("agent stdout not captured".to_string()))?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let mut state = StreamState::default();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            state.feed(&line);
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() && state.final_result.is_none() {
            warn!(worker_id = %request.worker_id, code = ?status.code(), "Agent process failed");
            let reason = stderr.trim();
            return Err(RuntimeError::Failed(if reason.is_empty() {
                format!("{} exited with {status}", self.program)
            } else {
                reason.to_string()
            }));
        }

        let response = state.finish(&request.model)?;
        info!(
            worker_id = %request.worker_id,
            tools = response.tool_uses.len(),
            tokens = response.tokens_used.unwrap_or(0),
            "Agent session complete"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use super::*;
    use crate::runtime::ToolServerConfig;

    fn request() -> AgentRequest {
        AgentRequest {
            worker_id: "worker-1".into(),
            prompt: "fix the bug".into(),
            model: "claude-sonnet-4-5".into(),
            working_dir: PathBuf::from("/tmp"),
            system_prompt: String::new(),
            tool_servers: ToolServers::new(),
        }
    }

    #[test]
    fn args_minimal() {
        let args = ClaudeCliRuntime::new().build_args(&request());
        assert_eq!(&args[..2], ["-p", "fix the bug"]);
        assert!(args.windows(2).any(|w| w == ["--output-format", "stream-json"]));
        assert!(args.windows(2).any(|w| w == ["--permission-mode", "bypassPermissions"]));
        assert!(!args.contains(&"--mcp-config".to_string()));
        assert!(!args.contains(&"--append-system-prompt".to_string()));
    }

    #[test]
    fn args_with_tools_and_system_prompt() {
        let mut req = request();
        req.system_prompt = "be brief".into();
        req.tool_servers.insert(
            "agentpool-coordinator".into(),
            ToolServerConfig {
                command: "agentpool-coordinator".into(),
                args: vec![],
                env: BTreeMap::from([("AGENTPOOL_AGENT_ID".to_string(), "worker-1".to_string())]),
            },
        );

        let args = ClaudeCliRuntime::new()
            .with_extra_args(vec!["--max-turns".into(), "5".into()])
            .build_args(&req);
        let pos = args.iter().position(|a| a == "--mcp-config").unwrap();
        let config: Value = serde_json::from_str(&args[pos + 1]).unwrap();
        assert_eq!(
            config["mcpServers"]["agentpool-coordinator"]["env"]["AGENTPOOL_AGENT_ID"],
            "worker-1"
        );
        assert!(args.windows(2).any(|w| w == ["--append-system-prompt", "be brief"]));
        assert_eq!(&args[args.len() - 2..], ["--max-turns", "5"]);
    }

    #[test]
    fn stream_collects_text_tools_and_usage() {
        let mut state = StreamState::default();
        state.feed(r#"{"type":"system","subtype":"init"}"#);
        state.feed(
            r#"{"type":"assistant","message":{"model":"claude-x","content":[{"type":"text","text":"Looking. "},{"type":"tool_use","name":"Bash","input":{}}]}}"#,
        );
        state.feed("not json at all");
        state.feed(
            r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"hm"},{"type":"text","text":"Done."},{"type":"tool_use","name":"Edit"}]}}"#,
        );
        state.feed(
            r#"{"type":"result","subtype":"success","is_error":false,"result":"Done.","usage":{"input_tokens":100,"output_tokens":20}}"#,
        );

        let resp = state.finish("fallback").unwrap();
        assert_eq!(resp.text, "Looking. Done.");
        assert_eq!(resp.tool_uses, vec!["Bash", "Edit"]);
        assert_eq!(resp.model_used, "claude-x");
        assert_eq!(resp.tokens_used, Some(120));
    }

    #[test]
    fn result_text_used_when_no_assistant_text() {
        let mut state = StreamState::default();
        state.feed(r#"{"type":"result","is_error":false,"result":"42"}"#);
        let resp = state.finish("claude-sonnet-4-5").unwrap();
        assert_eq!(resp.text, "42");
        assert_eq!(resp.model_used, "claude-sonnet-4-5");
        assert!(resp.tokens_used.is_none());
    }

    #[test]
    fn error_result_is_failure() {
        let mut state = StreamState::default();
        state.feed(r#"{"type":"result","is_error":true,"result":"rate limited"}"#);
        let err = state.finish("m").unwrap_err();
        assert!(matches!(err, RuntimeError::Failed(msg) if msg == "rate limited"));
    }

    #[tokio::test]
    async fn missing_program_is_launch_error() {
        let runtime = ClaudeCliRuntime::new().with_program("/nonexistent/agentpool-test-cli");
        let err = runtime.run(request()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Launch { .. }));
    }
}
