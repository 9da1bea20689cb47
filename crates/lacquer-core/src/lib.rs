//! Data model, expression evaluator, and execution context shared by
//! every Lacquer crate.
//!
//! This crate has no knowledge of how a step body actually runs (that's
//! `lacquer_blocks` and `lacquer_agent`) or how the scheduler drives a
//! run to completion (`lacquer_engine`); it only defines what a
//! workflow *is* and the pure services (expression evaluation, context
//! storage) everything else reads from.

pub mod block;
pub mod config;
pub mod context;
pub mod error;
pub mod expr;
pub mod retry;
pub mod workflow;

pub use config::EngineConfig;
pub use error::{LacquerError, Result};

/// Common imports for crates embedding `lacquer-core`.
pub mod prelude {
    pub use crate::block::{Block, BlockBody, BlockRuntime};
    pub use crate::context::{ContextSnapshot, ExecutionContext, RunStatus, StepResult, StepStatus};
    pub use crate::error::{LacquerError, Result};
    pub use crate::expr::{evaluate, render_template, EvalValue, ExpressionContext};
    pub use crate::workflow::{OnError, Step, StepBody, Workflow};
}
