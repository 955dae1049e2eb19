//! Team mode: one lead plus workers sharing the queue and message log.

/// Appended to every system prompt in team mode.
pub(crate) const TEAM_INSTRUCTIONS: &str = "\n\n## Team Coordination\n\
You have access to coordination tools:\n\
- `claim_task`: get your next task from the shared board\n\
- `complete_task`: mark a task as done\n\
- `fail_task`: mark a task as failed when you cannot finish it\n\
- `list_tasks`: see all tasks and their status\n\
- `send_message`: send a message to another agent\n\
- `broadcast_message`: send to all agents\n\
- `check_messages`: check your inbox\n";

pub(crate) const LEAD_ID: &str = "lead";

pub(crate) const LEAD_SYSTEM_PROMPT: &str = "You are the team lead. Your job is to break down \
the task, track subtasks on the shared task board, and coordinate workers via messaging. \
Workers will claim tasks independently.";

pub(crate) const DEFAULT_WORKER_PROMPT: &str = "Claim and implement tasks from the task board.";

pub(crate) fn worker_id(index: usize) -> String {
    format!("worker-{index}")
}

pub(crate) fn worker_system_prompt(worker_id: &str) -> String {
    format!(
        "You are {worker_id}. Use claim_task to get your assignment from the shared task board. \
         Implement each task, then call complete_task. \
         Use send_message to share findings with other agents. \
         Use check_messages to see if other agents have sent you information."
    )
}

/// Parameters for [`AgentPool::run_team`](super::AgentPool::run_team).
#[derive(Debug, Clone)]
pub struct TeamPlan {
    pub lead_prompt: String,
    pub worker_prompt: String,
    /// Defaults to one less than the worker cap.
    pub num_workers: Option<usize>,
    pub lead_model: Option<String>,
    pub worker_model: Option<String>,
}

impl TeamPlan {
    pub fn new(lead_prompt: impl Into<String>) -> Self {
        Self {
            lead_prompt: lead_prompt.into(),
            worker_prompt: DEFAULT_WORKER_PROMPT.to_string(),
            num_workers: None,
            lead_model: None,
            worker_model: None,
        }
    }

    pub fn with_worker_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.worker_prompt = prompt.into();
        self
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.num_workers = Some(n);
        self
    }

    pub fn with_lead_model(mut self, model: impl Into<String>) -> Self {
        self.lead_model = Some(model.into());
        self
    }

    pub fn with_worker_model(mut self, model: impl Into<String>) -> Self {
        self.worker_model = Some(model.into());
        self
    }

    /// Worker count for a pool capped at `max_agents`: at least one, and
    /// never more than leaves room for the lead.
    pub(crate) fn worker_count(&self, max_agents: usize) -> usize {
        let room = max_agents.saturating_sub(1);
        self.num_workers.unwrap_or(room).min(room).max(1)
    }
}
