//! Worker units.
//!
//! - `task`: what a worker is asked to do (`WorkerTask`)
//! - `state`: lifecycle status and the finalized `WorkerResult`
//! - `session`: one agent invocation turned into a result

pub mod session;
pub mod state;
pub mod task;

pub use session::run_session;
pub use state::{WorkerResult, WorkerStatus};
pub use task::WorkerTask;
