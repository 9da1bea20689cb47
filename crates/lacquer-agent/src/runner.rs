//! The agent step runner (spec.md §4.5): render prompt → call model →
//! dispatch tool calls in parallel → loop until a final message, with a
//! configurable tool-call depth cap.

use crate::provider::{ModelMessage, ModelOutcome, ModelProvider, ModelRequest, ToolManifestEntry};
use crate::tools::ToolRegistry;
use futures_util::future::join_all;
use lacquer_core::context::{ContextSnapshot, ExecutionContext, TokenUsage};
use lacquer_core::error::{LacquerError, Result};
use std::sync::Arc;
use tracing::debug;

/// Default cap on tool-call round trips per agent step (spec.md §4.5:
/// "A configurable per-step tool-call depth cap (default 16)").
pub const DEFAULT_TOOL_CALL_DEPTH: u32 = 16;

pub struct AgentStepOutcome {
    pub response: String,
    pub usage: TokenUsage,
}

pub struct AgentStepRunner {
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    max_depth: u32,
}

impl AgentStepRunner {
    pub fn new(provider: Arc<dyn ModelProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            tools,
            max_depth: DEFAULT_TOOL_CALL_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Drives one agent step to completion: renders `prompt_template`
    /// and `system_prompt` against `ctx`, then loops model calls and
    /// tool dispatch until a final message or the depth cap is hit.
    pub async fn run(
        &self,
        step_id: &str,
        agent_name: &str,
        system_prompt: Option<&str>,
        prompt_template: &str,
        ctx: &ExecutionContext,
    ) -> Result<AgentStepOutcome> {
        let snapshot = ctx.snapshot().await;
        let prompt = render(step_id, prompt_template, &snapshot)?;
        let system = system_prompt
            .map(|s| render(step_id, s, &snapshot))
            .transpose()?;

        let manifest = self.tool_manifest(agent_name).await?;
        let mut messages = vec![ModelMessage::user(prompt)];
        let mut usage = TokenUsage::default();

        for attempt in 0..=self.max_depth {
            if attempt == self.max_depth {
                return Err(LacquerError::ModelError {
                    step_id: step_id.to_string(),
                    agent: agent_name.to_string(),
                    message: format!("tool-call depth cap ({}) exceeded", self.max_depth),
                    retry_after: None,
                });
            }

            let request = ModelRequest {
                system: system.clone(),
                messages: messages.clone(),
                tools: manifest.clone(),
            };

            let response = self.provider.complete(request).await?;
            usage.add(response.usage);

            match response.outcome {
                ModelOutcome::Message(text) => {
                    return Ok(AgentStepOutcome { response: text, usage });
                }
                ModelOutcome::ToolCalls(calls) => {
                    debug!(step_id, agent_name, attempt, tool_calls = calls.len(), "model requested tool calls");
                    let results = join_all(calls.into_iter().map(|call| {
                        let tools = Arc::clone(&self.tools);
                        let agent_name = agent_name.to_string();
                        async move {
                            let outcome = tools.execute(&agent_name, &call.name, call.arguments).await;
                            (call.id, outcome)
                        }
                    }))
                    .await;

                    for (call_id, outcome) in results {
                        let content = match outcome {
                            Ok(result) if result.success => result
                                .output
                                .map(|v| v.to_string())
                                .unwrap_or_default(),
                            Ok(result) => serde_json::json!({"error": result.error}).to_string(),
                            Err(e) => serde_json::json!({"error": e.to_string()}).to_string(),
                        };
                        messages.push(ModelMessage::tool_result(call_id, content));
                    }
                }
            }
        }

        unreachable!("loop always returns within max_depth + 1 iterations")
    }

    async fn tool_manifest(&self, agent_name: &str) -> Result<Vec<ToolManifestEntry>> {
        let tools = self.tools.tools_for_agent(agent_name).await?;
        Ok(tools
            .into_iter()
            .map(|(spec, _)| ToolManifestEntry {
                name: spec.name,
                description: spec.description,
                parameters_schema: spec.parameters_schema,
            })
            .collect())
    }
}

fn render(step_id: &str, template: &str, snapshot: &ContextSnapshot) -> Result<String> {
    lacquer_core::expr::render_template(template, snapshot).map_err(|e| LacquerError::ExpressionError {
        step_id: step_id.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ModelResponse, MockModelProvider};
    use crate::tools::{ToolOutcome, ToolProvider, ToolSpec};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct EchoTool;

    #[async_trait]
    impl ToolProvider for EchoTool {
        fn kind(&self) -> &'static str {
            "script"
        }

        async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
            Ok(vec![ToolSpec {
                name: "echo".to_string(),
                description: None,
                parameters_schema: Value::Null,
            }])
        }

        async fn execute(&self, _tool_name: &str, parameters: Value) -> Result<ToolOutcome> {
            Ok(ToolOutcome {
                success: true,
                output: Some(parameters),
                error: None,
            })
        }
    }

    #[tokio::test]
    async fn runner_returns_final_message_without_tool_calls() {
        let mut provider = MockModelProvider::new();
        provider
            .expect_complete()
            .returning(|_| {
                Box::pin(async {
                    Ok(ModelResponse {
                        outcome: ModelOutcome::Message("done".to_string()),
                        usage: TokenUsage { prompt: 10, completion: 5, total: 15 },
                    })
                })
            });

        let registry = Arc::new(ToolRegistry::new());
        let runner = AgentStepRunner::new(Arc::new(provider), registry);
        let ctx = ExecutionContext::new_root("run-1", Value::Null, Value::Null);

        let outcome = runner
            .run("step-1", "writer", None, "say hi", &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.response, "done");
        assert_eq!(outcome.usage.total, 15);
    }

    #[tokio::test]
    async fn runner_dispatches_tool_calls_then_returns_final_message() {
        let mut provider = MockModelProvider::new();
        let mut call_count = 0;
        provider.expect_complete().returning(move |_| {
            call_count += 1;
            let first_call = call_count == 1;
            Box::pin(async move {
                if first_call {
                    Ok(ModelResponse {
                        outcome: ModelOutcome::ToolCalls(vec![crate::provider::ToolCall {
                            id: "call-1".to_string(),
                            name: "echo".to_string(),
                            arguments: json!({"x": 1}),
                        }]),
                        usage: TokenUsage::default(),
                    })
                } else {
                    Ok(ModelResponse {
                        outcome: ModelOutcome::Message("final".to_string()),
                        usage: TokenUsage::default(),
                    })
                }
            })
        });

        let registry = Arc::new(ToolRegistry::new());
        registry.register("writer", Arc::new(EchoTool)).await;

        let runner = AgentStepRunner::new(Arc::new(provider), registry);
        let ctx = ExecutionContext::new_root("run-1", Value::Null, Value::Null);

        let outcome = runner
            .run("step-1", "writer", None, "say hi", &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.response, "final");
    }
}
