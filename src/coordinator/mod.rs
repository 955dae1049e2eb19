//! Coordination server: the task queue and message log over stdio JSON-RPC.
//!
//! Out-of-process workers reach the shared queue through a small set of
//! tools (`claim_task`, `complete_task`, `fail_task`, `list_tasks`,
//! `send_message`, `broadcast_message`, `check_messages`). Each worker gets
//! its own server process, launched with the state directory and worker id in
//! its environment.

pub mod protocol;
pub mod server;
pub mod tools;

pub use protocol::{RpcRequest, RpcResponse, SERVER_NAME};
pub use server::{AGENT_ID_ENV, CoordinatorServer, STATE_DIR_ENV};
pub use tools::{ToolCall, tool_definitions};
