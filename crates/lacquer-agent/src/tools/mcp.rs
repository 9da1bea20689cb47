//! MCP tool provider (spec.md §4.5): wraps a connected, initialized
//! [`McpClient`] and exposes its `tools/list` catalog through the Tool
//! Registry, dispatching `tools/call` for execution.

use super::{ToolOutcome, ToolProvider, ToolSpec};
use async_trait::async_trait;
use lacquer_core::error::Result;
use lacquer_mcp::McpClient;
use serde_json::Value;
use std::sync::Arc;

pub struct McpToolProvider {
    server_name: String,
    client: Arc<McpClient>,
}

impl McpToolProvider {
    pub fn new(server_name: impl Into<String>, client: Arc<McpClient>) -> Self {
        Self {
            server_name: server_name.into(),
            client,
        }
    }
}

#[async_trait]
impl ToolProvider for McpToolProvider {
    fn kind(&self) -> &'static str {
        "mcp"
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        let result = self.client.list_tools().await?;
        Ok(result
            .tools
            .into_iter()
            .map(|t| ToolSpec {
                name: t.name,
                description: t.description,
                parameters_schema: t.input_schema,
            })
            .collect())
    }

    async fn execute(&self, tool_name: &str, parameters: Value) -> Result<ToolOutcome> {
        match self.client.call_tool(tool_name, parameters).await {
            Ok(result) => {
                let text = result
                    .content
                    .into_iter()
                    .filter_map(|c| match c {
                        lacquer_mcp::protocol::ToolContent::Text { text } => Some(text),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");

                if result.is_error {
                    Ok(ToolOutcome {
                        success: false,
                        output: None,
                        error: Some(text),
                    })
                } else {
                    Ok(ToolOutcome {
                        success: true,
                        output: Some(Value::String(text)),
                        error: None,
                    })
                }
            }
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => Ok(ToolOutcome {
                success: false,
                output: None,
                error: Some(format!("mcp server '{}': {e}", self.server_name)),
            }),
        }
    }
}
