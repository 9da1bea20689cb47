//! Per-runtime block executors: `shell` (bash scripts), `container`
//! (Docker images built from a Dockerfile or pulled), and `native`
//! (nested `*.laq.yaml` workflows run in-process).

pub mod container;
pub mod native;
pub mod shell;

use async_trait::async_trait;
use lacquer_core::context::ExecutionContext;
use lacquer_core::error::Result;
use serde_json::Value;
use std::collections::HashMap;

/// Executes one runtime kind of block body. Implemented once per
/// runtime (`shell`, `container`, `native`); dispatch by `BlockRuntime`
/// happens one layer up, in whatever calls these.
#[async_trait]
pub trait BlockExecutor: Send + Sync {
    async fn execute(
        &self,
        step_id: &str,
        ctx: &ExecutionContext,
        inputs: HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>>;
}

/// The seam `executors::native` invokes to run a nested workflow,
/// injected by whatever owns both block execution and workflow
/// execution. `lacquer-blocks` cannot depend on `lacquer-engine`
/// directly (the dependency runs the other way), so `lacquer-engine`
/// implements this trait and hands an instance down through the
/// executor registry at construction time.
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    async fn run_nested(
        &self,
        workflow: &lacquer_core::workflow::Workflow,
        parent: &ExecutionContext,
        inputs: Value,
    ) -> Result<HashMap<String, Value>>;
}
