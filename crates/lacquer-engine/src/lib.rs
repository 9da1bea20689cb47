//! The step scheduler and workflow engine façade: everything that turns
//! a parsed `lacquer_core::workflow::Workflow` into a running,
//! observable, cancellable execution.
//!
//! This crate owns *driving* a workflow, not *defining* one
//! (`lacquer_core`) or *executing one step's body*
//! (`lacquer_blocks`/`lacquer_agent`, which it wires together per step
//! via [`dispatch::DispatchServices`]).

pub mod actions;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod providers;
pub mod retry;
pub mod scheduler;

pub use dispatch::{DispatchServices, StepOutcome};
pub use engine::{Engine, ExecutionSummary};
pub use events::{ProgressEvent, DEFAULT_EVENT_CHANNEL_CAPACITY};
pub use providers::ProviderRegistry;
