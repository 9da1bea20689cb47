//! The hierarchical, thread-safe execution context described in
//! `spec.md` §4.2: inputs, dot-nested state, per-step results,
//! workflow outputs, and the cancellation token a run shares across
//! every step, tool call, and block process it spawns.

mod execution;
mod snapshot;
mod step_result;

pub use execution::{ExecutionContext, RunStatus};
pub use snapshot::ContextSnapshot;
pub use step_result::{StepResult, StepStatus, TokenUsage};
