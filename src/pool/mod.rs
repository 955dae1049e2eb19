//! Bounded-concurrency agent pool.
//!
//! Each submitted [`WorkerTask`] becomes one agent run. At most
//! `max_agents` runs hold a permit at once. Per worker the pool:
//!
//! 1. validates the workspace (before anything is allocated)
//! 2. creates the sandbox and registers the worker on the message bus
//! 3. in team mode, points the agent at a coordinator tool server bound to
//!    the shared state directory
//! 4. starts the sandbox and runs the agent under the deadline
//! 5. always unregisters, stops the sandbox, and releases queue claims
//!
//! Failures in one worker never abort its siblings, and a panicking runtime
//! still gets the full cleanup. Dropping the `run` future aborts its workers;
//! [`AgentPool::shutdown`] then stops any sandbox they left behind.

pub mod team;

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

pub use team::TeamPlan;

use crate::config::{PoolConfig, SandboxKind};
use crate::coordinator::{AGENT_ID_ENV, SERVER_NAME, STATE_DIR_ENV};
use crate::error::{QueueError, Result};
use crate::messages::MessageBus;
use crate::queue::TaskQueue;
use crate::runtime::{AgentRequest, AgentRuntime, ToolServerConfig, ToolServers};
use crate::sandbox::{self, Sandbox, SandboxFactory};
use crate::security::validate_workspace;
use crate::worker::state::format_secs;
use crate::worker::{WorkerResult, WorkerStatus, WorkerTask, run_session};

/// How workers relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolMode {
    /// Independent tasks, no shared state.
    #[default]
    Parallel,
    /// Workers share the task queue and message log.
    Team,
}

/// Lifecycle notification delivered to a [`PoolObserver`].
#[derive(Debug, Clone)]
pub enum PoolEvent {
    Started {
        worker_id: String,
        model: String,
        sandbox: SandboxKind,
    },
    /// Sent exactly once per worker, whatever the outcome.
    Completed(WorkerResult),
}

#[async_trait]
pub trait PoolObserver: Send + Sync {
    async fn on_event(&self, event: PoolEvent);
}

type StatusMap = Arc<Mutex<HashMap<String, WorkerStatus>>>;
type SharedSandbox = Arc<tokio::sync::Mutex<Box<dyn Sandbox>>>;
/// Sandboxes created by workers and not yet stopped, by worker id.
type LiveSandboxes = Arc<Mutex<HashMap<String, SharedSandbox>>>;

/// Everything a spawned worker needs, shared across one `run`.
struct WorkerContext {
    config: PoolConfig,
    mode: PoolMode,
    runtime: Arc<dyn AgentRuntime>,
    workspace: PathBuf,
    state_dir: PathBuf,
    queue: Arc<TaskQueue>,
    bus: Arc<MessageBus>,
    observer: Option<Arc<dyn PoolObserver>>,
    statuses: StatusMap,
    sandbox_factory: SandboxFactory,
    sandboxes: LiveSandboxes,
}

/// Runs submitted tasks with a concurrency bound.
pub struct AgentPool {
    config: PoolConfig,
    mode: PoolMode,
    runtime: Arc<dyn AgentRuntime>,
    workspace: PathBuf,
    state_dir: PathBuf,
    queue: Arc<TaskQueue>,
    bus: Arc<MessageBus>,
    observer: Option<Arc<dyn PoolObserver>>,
    statuses: StatusMap,
    sandbox_factory: SandboxFactory,
    sandboxes: LiveSandboxes,
    tasks: Vec<WorkerTask>,
    counter: usize,
}

impl AgentPool {
    /// Pool whose coordination state lives in a fresh `agentpool-<id>`
    /// directory under the system temp dir.
    pub fn new(config: PoolConfig, mode: PoolMode, runtime: Arc<dyn AgentRuntime>) -> Result<Self> {
        let short = uuid::Uuid::new_v4().simple().to_string();
        let state_dir = std::env::temp_dir().join(format!("agentpool-{}", &short[..8]));
        Self::with_state_dir(config, mode, runtime, state_dir)
    }

    /// Pool sharing coordination state in `state_dir`.
    pub fn with_state_dir(
        config: PoolConfig,
        mode: PoolMode,
        runtime: Arc<dyn AgentRuntime>,
        state_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let state_dir = state_dir.into();
        std::fs::create_dir_all(&state_dir).map_err(QueueError::from)?;

        let mut queue = TaskQueue::open(&state_dir)?;
        if mode == PoolMode::Team {
            queue = queue.with_stale_timeout(config.timeout());
        }
        let workspace = std::env::current_dir().unwrap_or_else(|_| state_dir.clone());

        info!(
            mode = ?mode,
            max_agents = config.effective_max_agents(),
            state_dir = %state_dir.display(),
            runtime = runtime.name(),
            "Agent pool created"
        );

        Ok(Self {
            sandbox_factory: sandbox::default_factory(config.container.clone()),
            config,
            mode,
            runtime,
            workspace,
            state_dir,
            queue: Arc::new(queue),
            bus: MessageBus::new(),
            observer: None,
            statuses: Arc::new(Mutex::new(HashMap::new())),
            sandboxes: Arc::new(Mutex::new(HashMap::new())),
            tasks: Vec::new(),
            counter: 0,
        })
    }

    /// Default workspace for tasks that do not name one.
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PoolObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Replace how worker sandboxes are built.
    pub fn with_sandbox_factory(mut self, factory: SandboxFactory) -> Self {
        self.sandbox_factory = factory;
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn mode(&self) -> PoolMode {
        self.mode
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn message_bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Number of tasks waiting for the next `run`.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Queue `task` and return its worker id (`agent-N` unless set).
    pub fn submit(&mut self, mut task: WorkerTask) -> String {
        self.counter += 1;
        let worker_id = task
            .worker_id
            .clone()
            .unwrap_or_else(|| format!("agent-{}", self.counter));
        task.worker_id = Some(worker_id.clone());

        lock_statuses(&self.statuses).insert(worker_id.clone(), WorkerStatus::Pending);
        info!(worker_id = %worker_id, "Task submitted: {}", preview(&task.prompt));
        self.tasks.push(task);
        worker_id
    }

    /// Add descriptions to the shared task queue.
    pub fn add_tasks<I, S>(&self, descriptions: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ids = Vec::new();
        for description in descriptions {
            ids.push(self.queue.add(description, Vec::new(), 0)?);
        }
        Ok(ids)
    }

    /// Snapshot of every submitted worker's status.
    pub fn statuses(&self) -> HashMap<String, WorkerStatus> {
        lock_statuses(&self.statuses).clone()
    }

    /// Ids of workers whose sandbox has not been stopped yet.
    pub fn live_sandboxes(&self) -> Vec<String> {
        let mut ids: Vec<_> = lock_sandboxes(&self.sandboxes).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Tear down workers abandoned by a cancelled `run`.
    ///
    /// Stops every sandbox still registered, unregisters its worker and, in
    /// team mode, releases its queue claims. Returns how many were stopped.
    pub async fn shutdown(&self) -> usize {
        let live: Vec<(String, SharedSandbox)> = lock_sandboxes(&self.sandboxes).drain().collect();
        for (worker_id, sandbox) in &live {
            stop_sandbox(sandbox, worker_id).await;
            self.bus.unregister(worker_id).await;
            if self.mode == PoolMode::Team {
                release_claims(&self.queue, worker_id).await;
            }
        }
        if !live.is_empty() {
            info!(stopped = live.len(), "Pool shut down");
        }
        live.len()
    }

    /// Run every submitted task and return results in submission order.
    ///
    /// Submitted tasks are consumed; a second `run` only sees tasks
    /// submitted after the first.
    pub async fn run(&mut self) -> Vec<WorkerResult> {
        let tasks = std::mem::take(&mut self.tasks);
        if tasks.is_empty() {
            warn!("No tasks submitted");
            return Vec::new();
        }

        let max_agents = self.config.effective_max_agents();
        let started = Instant::now();
        info!(
            tasks = tasks.len(),
            max_agents,
            mode = ?self.mode,
            "Starting pool"
        );

        let ctx = Arc::new(WorkerContext {
            config: self.config.clone(),
            mode: self.mode,
            runtime: self.runtime.clone(),
            workspace: self.workspace.clone(),
            state_dir: self.state_dir.clone(),
            queue: self.queue.clone(),
            bus: self.bus.clone(),
            observer: self.observer.clone(),
            statuses: self.statuses.clone(),
            sandbox_factory: self.sandbox_factory.clone(),
            sandboxes: self.sandboxes.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(max_agents));

        let handles: Vec<_> = tasks
            .into_iter()
            .map(|task| {
                let ctx = ctx.clone();
                let semaphore = semaphore.clone();
                let worker_id = task.worker_id.clone().unwrap_or_default();
                let handle = tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return WorkerResult::error(
                            task.worker_id.clone().unwrap_or_default(),
                            "worker pool shut down",
                            Duration::ZERO,
                        );
                    };
                    ctx.run_worker(task).await
                });
                (worker_id, handle)
            })
            .collect();

        let (ids, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let _abort = AbortOnDrop(handles.iter().map(|h| h.abort_handle()).collect());
        let results: Vec<WorkerResult> = join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, worker_id)| match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(worker_id = %worker_id, error = %e, "Worker task panicked");
                    ctx.set_status(&worker_id, WorkerStatus::Error);
                    WorkerResult::error(worker_id, format!("worker panicked: {e}"), Duration::ZERO)
                }
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            succeeded,
            failed = results.len() - succeeded,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Pool complete"
        );
        results
    }

    /// Submit a lead plus workers and run them.
    ///
    /// Results come back lead first, then `worker-1..N`.
    pub async fn run_team(&mut self, plan: TeamPlan) -> Vec<WorkerResult> {
        if self.mode != PoolMode::Team {
            warn!("run_team on a parallel pool; coordination tools are not attached");
        }
        let workers = plan.worker_count(self.config.effective_max_agents());

        let mut lead = WorkerTask::new(plan.lead_prompt)
            .with_worker_id(team::LEAD_ID)
            .with_system_prompt(team::LEAD_SYSTEM_PROMPT);
        lead.model = plan.lead_model;
        self.submit(lead);

        for i in 1..=workers {
            let id = team::worker_id(i);
            let mut task = WorkerTask::new(plan.worker_prompt.clone())
                .with_system_prompt(team::worker_system_prompt(&id))
                .with_worker_id(id);
            task.model = plan.worker_model.clone();
            self.submit(task);
        }

        self.run().await
    }
}

impl WorkerContext {
    fn set_status(&self, worker_id: &str, status: WorkerStatus) {
        lock_statuses(&self.statuses).insert(worker_id.to_string(), status);
    }

    async fn notify(&self, event: PoolEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(event).await;
        }
    }

    /// Tool servers every agent of this pool gets.
    fn coordination_servers(&self, worker_id: &str) -> ToolServers {
        let mut servers = ToolServers::new();
        if self.mode == PoolMode::Team {
            servers.insert(
                SERVER_NAME.to_string(),
                ToolServerConfig {
                    command: self.config.coordinator_command.clone(),
                    args: Vec::new(),
                    env: BTreeMap::from([
                        (
                            STATE_DIR_ENV.to_string(),
                            self.state_dir.display().to_string(),
                        ),
                        (AGENT_ID_ENV.to_string(), worker_id.to_string()),
                    ]),
                },
            );
        }
        servers
    }

    async fn run_worker(&self, task: WorkerTask) -> WorkerResult {
        let started = Instant::now();
        let worker_id = task.worker_id.clone().unwrap_or_default();
        let model = task
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        let kind = task.sandbox.unwrap_or(self.config.default_sandbox);
        let timeout = task.timeout.unwrap_or_else(|| self.config.timeout());
        let requested = task.workspace.clone().unwrap_or_else(|| self.workspace.clone());

        self.set_status(&worker_id, WorkerStatus::Running);

        let result = match validate_workspace(&requested, self.config.workspace_root.as_deref()) {
            Ok(workspace) => {
                let built = (self.sandbox_factory)(kind, workspace, &worker_id);
                let sandbox: SharedSandbox = Arc::new(tokio::sync::Mutex::new(built));
                lock_sandboxes(&self.sandboxes).insert(worker_id.clone(), sandbox.clone());
                self.bus.register(&worker_id).await;

                let outcome = {
                    let mut guard = sandbox.lock().await;
                    let drive =
                        self.drive(&mut **guard, task, &worker_id, model, timeout, started);
                    AssertUnwindSafe(drive).catch_unwind().await
                };
                let result = outcome.unwrap_or_else(|panic| {
                    let reason = panic_message(&*panic);
                    error!(worker_id = %worker_id, reason = %reason, "Agent panicked");
                    WorkerResult::error(
                        &worker_id,
                        format!("worker panicked: {reason}"),
                        started.elapsed(),
                    )
                });

                self.cleanup(&sandbox, &worker_id).await;
                result
            }
            Err(e) => {
                error!(worker_id = %worker_id, error = %e, "Workspace rejected");
                WorkerResult::error(&worker_id, e.to_string(), started.elapsed())
            }
        };

        self.set_status(&worker_id, result.status);
        self.notify(PoolEvent::Completed(result.clone())).await;
        result
    }

    /// Start the sandbox and run the agent under `timeout`.
    async fn drive(
        &self,
        sandbox: &mut dyn Sandbox,
        task: WorkerTask,
        worker_id: &str,
        model: String,
        timeout: Duration,
        started: Instant,
    ) -> WorkerResult {
        let mut tool_servers = self.coordination_servers(worker_id);
        tool_servers.extend(task.tool_servers);

        let mut system_prompt = task.system_prompt.unwrap_or_default();
        if self.mode == PoolMode::Team {
            system_prompt.push_str(team::TEAM_INSTRUCTIONS);
        }

        if let Err(e) = sandbox.start().await {
            error!(worker_id, error = %e, "Sandbox start failed");
            return WorkerResult::error(worker_id, e.to_string(), started.elapsed());
        }

        self.notify(PoolEvent::Started {
            worker_id: worker_id.to_string(),
            model: model.clone(),
            sandbox: sandbox.kind(),
        })
        .await;

        let request = AgentRequest {
            worker_id: worker_id.to_string(),
            prompt: task.prompt,
            model,
            working_dir: sandbox.workspace().to_path_buf(),
            system_prompt,
            tool_servers,
        };

        match tokio::time::timeout(timeout, run_session(self.runtime.as_ref(), request)).await {
            Ok(result) => result,
            Err(_) => {
                let secs = format_secs(timeout);
                error!(worker_id, timeout_secs = %secs, "Agent timed out");
                WorkerResult::timed_out(
                    worker_id,
                    format!("Agent timed out after {secs}s"),
                    started.elapsed(),
                )
            }
        }
    }

    /// Unconditional teardown for one worker.
    async fn cleanup(&self, sandbox: &SharedSandbox, worker_id: &str) {
        self.bus.unregister(worker_id).await;

        stop_sandbox(sandbox, worker_id).await;
        {
            let mut live = lock_sandboxes(&self.sandboxes);
            if live.get(worker_id).is_some_and(|s| Arc::ptr_eq(s, sandbox)) {
                live.remove(worker_id);
            }
        }

        if self.mode == PoolMode::Team {
            release_claims(&self.queue, worker_id).await;
        }
    }
}

/// Aborts spawned workers if `run` is dropped before they finish.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

async fn stop_sandbox(sandbox: &SharedSandbox, worker_id: &str) {
    if let Err(e) = sandbox.lock().await.stop().await {
        warn!(worker_id, error = %e, "Sandbox cleanup error");
    }
}

/// Put `worker_id`'s in-progress queue items back to pending.
async fn release_claims(queue: &Arc<TaskQueue>, worker_id: &str) {
    let queue = queue.clone();
    let id = worker_id.to_string();
    match tokio::task::spawn_blocking(move || queue.release_agent_tasks(&id)).await {
        Ok(Ok(released)) if !released.is_empty() => {
            info!(worker_id, released = ?released, "Released tasks on cleanup");
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!(worker_id, error = %e, "Task release error"),
        Err(e) => warn!(worker_id, error = %e, "Task release panicked"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn lock_sandboxes(sandboxes: &LiveSandboxes) -> MutexGuard<'_, HashMap<String, SharedSandbox>> {
    sandboxes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_statuses(statuses: &StatusMap) -> MutexGuard<'_, HashMap<String, WorkerStatus>> {
    statuses.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn preview(text: &str) -> String {
    text.chars().take(60).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use crate::runtime::AgentResponse;

    struct Echo;

    #[async_trait]
    impl AgentRuntime for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn run(&self, request: AgentRequest) -> std::result::Result<AgentResponse, RuntimeError> {
            Ok(AgentResponse {
                text: request.prompt,
                model_used: request.model,
                ..Default::default()
            })
        }
    }

    fn pool(dir: &Path, mode: PoolMode) -> AgentPool {
        AgentPool::with_state_dir(PoolConfig::default(), mode, Arc::new(Echo), dir.join("state"))
            .unwrap()
            .with_workspace(dir.join("ws"))
    }

    #[test]
    fn submit_numbers_workers() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = pool(dir.path(), PoolMode::Parallel);
        assert_eq!(pool.submit(WorkerTask::new("a")), "agent-1");
        assert_eq!(pool.submit(WorkerTask::new("b").with_worker_id("custom")), "custom");
        assert_eq!(pool.submit(WorkerTask::new("c")), "agent-3");
        assert_eq!(pool.pending_tasks(), 3);
        assert_eq!(pool.statuses()["custom"], WorkerStatus::Pending);
    }

    #[test]
    fn default_state_dir_is_created() {
        let pool = AgentPool::new(PoolConfig::default(), PoolMode::Parallel, Arc::new(Echo)).unwrap();
        assert!(pool.state_dir().is_dir());
        let name = pool.state_dir().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("agentpool-"));
        assert_eq!(name.len(), "agentpool-".len() + 8);
        std::fs::remove_dir_all(pool.state_dir()).unwrap();
    }

    #[test]
    fn add_tasks_goes_to_queue() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(dir.path(), PoolMode::Team);
        let ids = pool.add_tasks(["A", "B", "C"]).unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(pool.queue().pending_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn run_empty_pool() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = pool(dir.path(), PoolMode::Parallel);
        assert!(pool.run().await.is_empty());
    }

    #[tokio::test]
    async fn run_consumes_submitted_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = pool(dir.path(), PoolMode::Parallel);
        pool.submit(WorkerTask::new("hello"));

        let results = pool.run().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].response, "hello");
        assert_eq!(results[0].model_used, "claude-sonnet-4-5");
        assert_eq!(pool.statuses()["agent-1"], WorkerStatus::Completed);

        assert!(pool.run().await.is_empty());
    }

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("owned boom")), "owned boom");
        assert_eq!(panic_message(&42_u8), "unknown panic");
    }

    #[tokio::test]
    async fn finished_run_leaves_no_live_sandboxes() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = pool(dir.path(), PoolMode::Parallel);
        pool.submit(WorkerTask::new("a"));
        pool.submit(WorkerTask::new("b"));
        pool.run().await;
        assert!(pool.live_sandboxes().is_empty());
        assert_eq!(pool.shutdown().await, 0);
    }

    #[test]
    fn coordination_servers_only_in_team_mode() {
        let dir = tempfile::tempdir().unwrap();
        for (mode, expected) in [(PoolMode::Parallel, 0), (PoolMode::Team, 1)] {
            let p = pool(dir.path(), mode);
            let ctx = WorkerContext {
                config: p.config.clone(),
                mode,
                runtime: p.runtime.clone(),
                workspace: p.workspace.clone(),
                state_dir: p.state_dir.clone(),
                queue: p.queue.clone(),
                bus: p.bus.clone(),
                observer: None,
                statuses: p.statuses.clone(),
                sandbox_factory: p.sandbox_factory.clone(),
                sandboxes: p.sandboxes.clone(),
            };
            let servers = ctx.coordination_servers("worker-1");
            assert_eq!(servers.len(), expected);
            if let Some(server) = servers.get(SERVER_NAME) {
                assert_eq!(server.command, "agentpool-coordinator");
                assert_eq!(server.env[AGENT_ID_ENV], "worker-1");
                assert_eq!(server.env[STATE_DIR_ENV], p.state_dir.display().to_string());
            }
        }
    }
}
