//! The `native` runtime executor (spec.md §4.4): validates/binds inputs
//! like any other block, then hands the nested workflow off to
//! whatever implements [`WorkflowRunner`] — dependency-inverted so this
//! crate never has to depend on `lacquer-engine`.

use super::{BlockExecutor, WorkflowRunner};
use async_trait::async_trait;
use lacquer_core::context::ExecutionContext;
use lacquer_core::error::Result;
use lacquer_core::workflow::Workflow;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub struct NativeExecutor {
    workflow: Box<Workflow>,
    runner: Arc<dyn WorkflowRunner>,
}

impl NativeExecutor {
    pub fn new(workflow: Box<Workflow>, runner: Arc<dyn WorkflowRunner>) -> Self {
        Self { workflow, runner }
    }
}

#[async_trait]
impl BlockExecutor for NativeExecutor {
    async fn execute(
        &self,
        _step_id: &str,
        ctx: &ExecutionContext,
        inputs: HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>> {
        // Only the validated, mapped inputs cross the block boundary;
        // parent state is not forwarded (spec.md §4.4: "isolation;
        // parent state is not leaked ... unless the block explicitly
        // reads it via expressions at the call site").
        let mapped_inputs = Value::Object(inputs.into_iter().collect());
        self.runner
            .run_nested(&self.workflow, ctx, mapped_inputs)
            .await
    }
}
