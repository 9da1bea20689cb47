//! Built-in step actions (spec.md §3: "`action` (e.g. `update_state`)
//! + parameters"). `update_state` is the only action this core names
//! explicitly; unknown actions are a schema-level error since a
//! validated AST is assumed (spec.md §1's non-goal on static
//! validation still leaves the engine responsible for dispatch).

use lacquer_core::context::ExecutionContext;
use lacquer_core::error::{LacquerError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub async fn dispatch(
    step_id: &str,
    action: &str,
    parameters: &HashMap<String, Value>,
) -> Result<HashMap<String, Value>> {
    match action {
        "update_state" => Ok(HashMap::new()),
        other => Err(LacquerError::ValidationError {
            message: format!("step '{step_id}': unrecognized action '{other}'"),
        }),
    }
}

/// `update_state` merges its rendered parameters directly into the
/// run's state map (spec.md §3 invariant 2: "`state` is written only by
/// explicit `update_state` actions or ... step outputs").
pub async fn apply_update_state(ctx: &ExecutionContext, parameters: HashMap<String, Value>) -> Result<()> {
    let map: Map<String, Value> = parameters.into_iter().collect();
    ctx.update_state(map).await;
    Ok(())
}
