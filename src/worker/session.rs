//! One agent invocation, converted into a [`WorkerResult`].

use std::time::Instant;

use tracing::{error, info};

use super::state::WorkerResult;
use crate::runtime::{AgentRequest, AgentRuntime};

/// Run `request` to completion. Runtime failures become an `Error` result.
///
/// No deadline is applied here; callers wrap this in `tokio::time::timeout`
/// and dropping the future stops the agent.
pub async fn run_session(runtime: &dyn AgentRuntime, request: AgentRequest) -> WorkerResult {
    let started = Instant::now();
    let worker_id = request.worker_id.clone();

    match runtime.run(request).await {
        Ok(response) => {
            let result = WorkerResult::completed(&worker_id, response, started.elapsed());
            info!(
                worker_id = %worker_id,
                duration_secs = result.duration_seconds,
                tools = result.tool_uses.len(),
                "Session complete"
            );
            result
        }
        Err(e) => {
            error!(worker_id = %worker_id, error = %e, "Session error");
            WorkerResult::error(&worker_id, e.to_string(), started.elapsed())
        }
    }
}
