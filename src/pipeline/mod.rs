//! Sequential pipeline: each stage is one agent run whose response seeds
//! the next stage's prompt.

pub mod processor;
pub mod types;

pub use processor::Pipeline;
pub use types::{PREVIOUS_RESPONSE, PipelineResult, Stage, Transform};
