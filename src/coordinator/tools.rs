//! The coordination tools exposed over `tools/call`.

use serde_json::{Value, json};

use super::protocol::ToolDefinition;

/// A parsed `tools/call` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    ClaimTask,
    CompleteTask {
        task_id: String,
        result: Option<String>,
    },
    FailTask {
        task_id: String,
        error: String,
    },
    ListTasks,
    SendMessage {
        to: String,
        content: String,
    },
    BroadcastMessage {
        content: String,
    },
    CheckMessages,
}

/// Why a `tools/call` could not be turned into a [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolCallError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("missing argument '{0}'")]
    MissingArgument(&'static str),
}

impl ToolCall {
    /// Parse a tool name and its `arguments` object.
    pub fn parse(name: &str, args: &Value) -> Result<Self, ToolCallError> {
        match name {
            "claim_task" => Ok(Self::ClaimTask),
            "complete_task" => Ok(Self::CompleteTask {
                task_id: require_str(args, "task_id")?,
                result: optional_str(args, "result"),
            }),
            "fail_task" => Ok(Self::FailTask {
                task_id: require_str(args, "task_id")?,
                error: optional_str(args, "error").unwrap_or_else(|| "Unknown error".to_string()),
            }),
            "list_tasks" => Ok(Self::ListTasks),
            "send_message" => Ok(Self::SendMessage {
                to: require_str(args, "to")?,
                content: require_str(args, "content")?,
            }),
            "broadcast_message" => Ok(Self::BroadcastMessage {
                content: require_str(args, "content")?,
            }),
            "check_messages" => Ok(Self::CheckMessages),
            other => Err(ToolCallError::UnknownTool(other.to_string())),
        }
    }
}

fn require_str(args: &Value, key: &'static str) -> Result<String, ToolCallError> {
    optional_str(args, key).ok_or(ToolCallError::MissingArgument(key))
}

fn optional_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(String::from)
}

/// Definitions returned by `tools/list`.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    let no_args = json!({"type": "object", "properties": {}, "required": []});
    vec![
        ToolDefinition {
            name: "claim_task".into(),
            description: "Claim the next available task from the shared task board. \
                          Returns the task description, or claimed=false if none is available."
                .into(),
            input_schema: no_args.clone(),
        },
        ToolDefinition {
            name: "complete_task".into(),
            description: "Mark a task as completed. Call this after you finish implementing a task."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "task_id": {"type": "string", "description": "The task ID to complete"},
                    "result": {"type": "string", "description": "Summary of what was done"}
                },
                "required": ["task_id"]
            }),
        },
        ToolDefinition {
            name: "fail_task".into(),
            description: "Mark a task as failed if you cannot complete it.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "task_id": {"type": "string", "description": "The task ID"},
                    "error": {"type": "string", "description": "What went wrong"}
                },
                "required": ["task_id", "error"]
            }),
        },
        ToolDefinition {
            name: "list_tasks".into(),
            description: "List all tasks on the board with their current status.".into(),
            input_schema: no_args.clone(),
        },
        ToolDefinition {
            name: "send_message".into(),
            description: "Send a message to another agent. Use this to share findings, \
                          ask questions, or coordinate."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "to": {"type": "string", "description": "Target agent ID"},
                    "content": {"type": "string", "description": "Message content"}
                },
                "required": ["to", "content"]
            }),
        },
        ToolDefinition {
            name: "broadcast_message".into(),
            description: "Send a message to ALL other agents. Use sparingly.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "content": {"type": "string", "description": "Message content"}
                },
                "required": ["content"]
            }),
        },
        ToolDefinition {
            name: "check_messages".into(),
            description: "Check your inbox for messages from other agents.".into(),
            input_schema: no_args,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seven_tools_with_unique_names() {
        let defs = tool_definitions();
        let mut names: Vec<_> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names.len(), 7);
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 7);
        for def in &defs {
            assert_eq!(def.input_schema["type"], "object");
        }
    }

    #[test]
    fn every_definition_parses() {
        let args = json!({"task_id": "t", "error": "e", "to": "w", "content": "c"});
        for def in tool_definitions() {
            assert!(ToolCall::parse(&def.name, &args).is_ok(), "{}", def.name);
        }
    }

    #[test]
    fn parse_arguments() {
        assert_eq!(
            ToolCall::parse("complete_task", &json!({"task_id": "abc"})).unwrap(),
            ToolCall::CompleteTask {
                task_id: "abc".into(),
                result: None
            }
        );
        assert_eq!(
            ToolCall::parse("fail_task", &json!({"task_id": "abc"})).unwrap(),
            ToolCall::FailTask {
                task_id: "abc".into(),
                error: "Unknown error".into()
            }
        );
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            ToolCall::parse("send_message", &json!({"to": "w"})),
            Err(ToolCallError::MissingArgument("content"))
        );
        assert_eq!(
            ToolCall::parse("complete_task", &json!({})),
            Err(ToolCallError::MissingArgument("task_id"))
        );
        assert_eq!(
            ToolCall::parse("rm_rf", &json!({})),
            Err(ToolCallError::UnknownTool("rm_rf".into()))
        );
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            ToolCallError::MissingArgument("task_id").to_string(),
            "missing argument 'task_id'"
        );
        assert_eq!(
            ToolCallError::UnknownTool("deploy".into()).to_string(),
            "Unknown tool: deploy"
        );
    }
}
