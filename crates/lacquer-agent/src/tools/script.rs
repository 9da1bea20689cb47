//! Script tool provider (spec.md §4.5): "an alternative to MCP for
//! lightweight tools. Each declared script tool wraps an inline shell
//! script; invocation reuses the shell executor with the tool's JSON
//! parameters as inputs."

use super::{ToolOutcome, ToolProvider, ToolSpec};
use async_trait::async_trait;
use lacquer_blocks::{BlockExecutor, ShellExecutor};
use lacquer_core::context::ExecutionContext;
use lacquer_core::error::{LacquerError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// One inline-script tool declaration.
#[derive(Debug, Clone)]
pub struct ScriptToolDef {
    pub name: String,
    pub description: Option<String>,
    pub parameters_schema: Value,
    pub script: String,
}

/// Wraps a fixed set of script tools, each backed by a [`ShellExecutor`]
/// sharing the agent's cache directory and a throwaway root context
/// (script tools don't need run-scoped state, only cancellation).
pub struct ScriptToolProvider {
    tools: HashMap<String, ScriptToolDef>,
    cache_dir: PathBuf,
    ctx: Arc<ExecutionContext>,
}

impl ScriptToolProvider {
    pub fn new(tools: Vec<ScriptToolDef>, cache_dir: PathBuf, ctx: Arc<ExecutionContext>) -> Self {
        Self {
            tools: tools.into_iter().map(|t| (t.name.clone(), t)).collect(),
            cache_dir,
            ctx,
        }
    }
}

#[async_trait]
impl ToolProvider for ScriptToolProvider {
    fn kind(&self) -> &'static str {
        "script"
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        Ok(self
            .tools
            .values()
            .map(|t| ToolSpec {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters_schema: t.parameters_schema.clone(),
            })
            .collect())
    }

    async fn execute(&self, tool_name: &str, parameters: Value) -> Result<ToolOutcome> {
        let def = self.tools.get(tool_name).ok_or_else(|| LacquerError::ToolError {
            tool_name: tool_name.to_string(),
            message: format!("no script tool named '{tool_name}'"),
            transport_fault: false,
        })?;

        let executor = ShellExecutor::new(&def.name, &def.script, self.cache_dir.clone(), HashMap::new());
        let inputs: HashMap<String, Value> = match parameters {
            Value::Object(map) => map.into_iter().collect(),
            other => HashMap::from([("parameters".to_string(), other)]),
        };

        match executor.execute(tool_name, &self.ctx, inputs).await {
            Ok(outputs) => Ok(ToolOutcome {
                success: true,
                output: Some(Value::Object(outputs.into_iter().collect())),
                error: None,
            }),
            Err(e) => Ok(ToolOutcome {
                success: false,
                output: None,
                error: Some(e.to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_tool_name_is_rejected() {
        let ctx = Arc::new(ExecutionContext::new_root("run-1", Value::Null, Value::Null));
        let provider = ScriptToolProvider::new(vec![], std::env::temp_dir(), ctx);
        let err = provider.execute("missing", Value::Null).await.unwrap_err();
        assert!(matches!(err, LacquerError::ToolError { .. }));
    }
}
