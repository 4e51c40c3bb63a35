//! Workflow execution: run loop, per-step retry, failure capture.

pub mod debug;
pub mod step;
pub mod workflow;

pub use step::{RetryPolicy, StepReport};
pub use workflow::WorkflowExecutor;
