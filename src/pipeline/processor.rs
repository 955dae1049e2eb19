//! Sequential stage runner.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use super::types::{PipelineResult, Stage};
use crate::config::PoolConfig;
use crate::error::PipelineError;
use crate::runtime::{AgentRequest, AgentRuntime, ToolServers};
use crate::sandbox;
use crate::security::validate_workspace;
use crate::worker::state::format_secs;
use crate::worker::{WorkerResult, WorkerStatus, run_session};

/// Ordered stages where each stage's response seeds the next prompt.
pub struct Pipeline {
    stages: Vec<Stage>,
    config: PoolConfig,
    runtime: Arc<dyn AgentRuntime>,
    workspace: PathBuf,
}

impl Pipeline {
    pub fn new(
        stages: Vec<Stage>,
        config: PoolConfig,
        runtime: Arc<dyn AgentRuntime>,
    ) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::NoStages);
        }
        let workspace = std::env::current_dir().unwrap_or_else(|_| std::env::temp_dir());
        Ok(Self {
            stages,
            config,
            runtime,
            workspace,
        })
    }

    /// Workspace shared by every stage.
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run stages in order, stopping at the first that does not complete.
    pub async fn run(&self) -> PipelineResult {
        let mut result = PipelineResult::default();
        let mut previous: Option<String> = None;
        let total = self.stages.len();

        info!(stages = total, "Starting pipeline");

        for (i, stage) in self.stages.iter().enumerate() {
            info!(stage = %stage.name, "Starting stage {}/{}", i + 1, total);

            let prompt = stage.build_prompt(previous.as_deref());
            let stage_result = self.run_stage(stage, prompt).await;

            info!(
                stage = %stage.name,
                status = %stage_result.status,
                duration_secs = stage_result.duration_seconds,
                "Stage {} finished",
                i + 1
            );

            let completed = stage_result.status == WorkerStatus::Completed;
            previous = Some(stage_result.response.clone());
            result.stages.push(stage_result);

            if !completed {
                error!(stage = %stage.name, "Pipeline stopped: stage did not complete");
                break;
            }
        }

        info!(
            success = result.success(),
            ran = result.stages.len(),
            total,
            total_secs = result.total_duration().as_secs_f64(),
            "Pipeline finished"
        );
        result
    }

    async fn run_stage(&self, stage: &Stage, prompt: String) -> WorkerResult {
        let started = Instant::now();
        let worker_id = stage.worker_id();
        let model = stage
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        let kind = stage.sandbox.unwrap_or(self.config.default_sandbox);
        let timeout = stage.timeout.unwrap_or_else(|| self.config.timeout());

        let workspace =
            match validate_workspace(&self.workspace, self.config.workspace_root.as_deref()) {
                Ok(path) => path,
                Err(e) => {
                    error!(stage = %stage.name, error = %e, "Workspace rejected");
                    return WorkerResult::error(worker_id, e.to_string(), started.elapsed());
                }
            };

        let mut sandbox = sandbox::create(kind, workspace, &worker_id, &self.config.container);

        let result = match sandbox.start().await {
            Ok(()) => {
                let request = AgentRequest {
                    worker_id: worker_id.clone(),
                    prompt,
                    model,
                    working_dir: sandbox.workspace().to_path_buf(),
                    system_prompt: stage.system_prompt.clone().unwrap_or_default(),
                    tool_servers: ToolServers::new(),
                };
                match tokio::time::timeout(timeout, run_session(self.runtime.as_ref(), request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => WorkerResult::timed_out(
                        &worker_id,
                        format!(
                            "Stage '{}' timed out after {}s",
                            stage.name,
                            format_secs(timeout)
                        ),
                        started.elapsed(),
                    ),
                }
            }
            Err(e) => {
                error!(stage = %stage.name, error = %e, "Sandbox start failed");
                WorkerResult::error(&worker_id, e.to_string(), started.elapsed())
            }
        };

        if let Err(e) = sandbox.stop().await {
            warn!(stage = %stage.name, error = %e, "Sandbox cleanup error");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::RuntimeError;
    use crate::runtime::AgentResponse;

    struct Upper;

    #[async_trait]
    impl AgentRuntime for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        async fn run(&self, request: AgentRequest) -> Result<AgentResponse, RuntimeError> {
            if request.prompt.contains("fail") {
                return Err(RuntimeError::Failed("asked to fail".into()));
            }
            Ok(AgentResponse {
                text: request.prompt.to_uppercase(),
                model_used: request.model,
                ..Default::default()
            })
        }
    }

    #[test]
    fn empty_pipeline_rejected() {
        let err = Pipeline::new(vec![], PoolConfig::default(), Arc::new(Upper)).err();
        assert!(matches!(err, Some(PipelineError::NoStages)));
    }

    #[tokio::test]
    async fn halts_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let stages = vec![
            Stage::new("one", "hello"),
            Stage::new("two", "please fail"),
            Stage::new("three", "never runs"),
        ];
        let pipeline = Pipeline::new(stages, PoolConfig::default(), Arc::new(Upper))
            .unwrap()
            .with_workspace(dir.path());

        let result = pipeline.run().await;
        assert_eq!(result.stages.len(), 2);
        assert_eq!(result.stages[0].response, "HELLO");
        assert_eq!(result.stages[1].status, WorkerStatus::Error);
        assert_eq!(result.stages[1].worker_id, "pipeline-two");
        assert!(!result.success());
    }

    #[tokio::test]
    async fn rejected_workspace_is_stage_error() {
        let pipeline = Pipeline::new(
            vec![Stage::new("one", "hello")],
            PoolConfig::default(),
            Arc::new(Upper),
        )
        .unwrap()
        .with_workspace("/etc/agentpool");

        let result = pipeline.run().await;
        assert_eq!(result.stages.len(), 1);
        assert_eq!(result.stages[0].status, WorkerStatus::Error);
        assert!(!result.success());
    }
}
