//! Stage definitions and the aggregated pipeline result.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SandboxKind;
use crate::worker::{WorkerResult, WorkerStatus};

/// Placeholder replaced by the previous stage's response.
pub const PREVIOUS_RESPONSE: &str = "{previous_response}";

/// Rewrites the previous response before it is injected.
pub type Transform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// One step of a pipeline.
#[derive(Clone)]
pub struct Stage {
    pub name: String,
    /// May contain [`PREVIOUS_RESPONSE`].
    pub prompt: String,
    pub model: Option<String>,
    pub sandbox: Option<SandboxKind>,
    pub system_prompt: Option<String>,
    pub timeout: Option<Duration>,
    pub transform: Option<Transform>,
}

impl Stage {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            model: None,
            sandbox: None,
            system_prompt: None,
            timeout: None,
            transform: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_sandbox(mut self, kind: SandboxKind) -> Self {
        self.sandbox = Some(kind);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Worker id this stage runs as.
    pub fn worker_id(&self) -> String {
        format!("pipeline-{}", self.name)
    }

    /// Prompt for this stage given the previous stage's response.
    ///
    /// The first stage (no previous response) uses its prompt verbatim.
    /// Otherwise the (optionally transformed) response replaces every
    /// placeholder, or is appended as a context section when there is none.
    pub fn build_prompt(&self, previous_response: Option<&str>) -> String {
        let Some(previous) = previous_response else {
            return self.prompt.clone();
        };

        let context = match &self.transform {
            Some(transform) => transform(previous),
            None => previous.to_string(),
        };

        if self.prompt.contains(PREVIOUS_RESPONSE) {
            self.prompt.replace(PREVIOUS_RESPONSE, &context)
        } else {
            format!("{}\n\n## Context from previous stage\n{context}", self.prompt)
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("prompt", &self.prompt)
            .field("model", &self.model)
            .field("sandbox", &self.sandbox)
            .field("system_prompt", &self.system_prompt)
            .field("timeout", &self.timeout)
            .field("transform", &self.transform.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Per-stage results, in run order. Stages after a failure are absent.
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    pub stages: Vec<WorkerResult>,
}

impl PipelineResult {
    /// Response of the last stage that ran, empty if none did.
    pub fn final_response(&self) -> &str {
        self.stages.last().map(|s| s.response.as_str()).unwrap_or("")
    }

    pub fn total_duration(&self) -> Duration {
        Duration::from_secs_f64(self.stages.iter().map(|s| s.duration_seconds).sum())
    }

    /// At least one stage ran and every stage that ran completed.
    pub fn success(&self) -> bool {
        !self.stages.is_empty()
            && self
                .stages
                .iter()
                .all(|s| s.status == WorkerStatus::Completed)
    }
}
