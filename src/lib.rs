//! agentpool: bounded pools of agent workers.
//!
//! Workers run in sandboxes and can coordinate through a shared task queue
//! and message channel, exposed to out-of-process agents by the coordinator.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod messages;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod runtime;
pub mod sandbox;
pub mod security;
pub mod store;
pub mod worker;

pub use config::{PoolConfig, SandboxKind};
pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineResult, Stage};
pub use pool::{AgentPool, PoolEvent, PoolMode, PoolObserver, TeamPlan};
pub use queue::{QueueItem, QueueStatus, TaskQueue};
pub use runtime::{AgentRequest, AgentResponse, AgentRuntime, ClaudeCliRuntime};
pub use worker::{WorkerResult, WorkerStatus, WorkerTask};
