//! The per-step body dispatcher (spec.md §4.3 step 4: "hands off to the
//! body dispatcher"): routes a step's rendered body to the agent
//! runner, the block registry + runtime executor, the built-in action
//! handler, or an ad-hoc inline script, and returns its raw result.

use crate::providers::ProviderRegistry;
use lacquer_agent::{AgentStepRunner, ToolRegistry};
use lacquer_blocks::{
    validate::validate_and_apply_defaults, BlockExecutor, BlockRegistry, ContainerExecutor,
    NativeExecutor, ShellExecutor, WorkflowRunner,
};
use lacquer_core::block::{BlockBody, BlockRuntime};
use lacquer_core::config::EngineConfig;
use lacquer_core::context::{ContextSnapshot, ExecutionContext, TokenUsage};
use lacquer_core::error::{LacquerError, Result};
use lacquer_core::workflow::{StepBody, Workflow};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// What a step body produced, independent of which kind it was. The
/// scheduler stores `output` as the step's raw result before evaluating
/// output-binding expressions against it.
pub struct StepOutcome {
    pub output: HashMap<String, Value>,
    pub response: Option<String>,
    pub token_usage: Option<TokenUsage>,
}

impl From<HashMap<String, Value>> for StepOutcome {
    fn from(output: HashMap<String, Value>) -> Self {
        Self {
            output,
            response: None,
            token_usage: None,
        }
    }
}

pub struct DispatchServices {
    pub config: EngineConfig,
    pub block_registry: Arc<BlockRegistry>,
    pub tool_registry: Arc<ToolRegistry>,
    pub providers: ProviderRegistry,
    pub workflow_runner: Arc<dyn WorkflowRunner>,
}

pub async fn dispatch_body(
    step_id: &str,
    body: &StepBody,
    workflow: &Workflow,
    ctx: &ExecutionContext,
    snapshot: &ContextSnapshot,
    services: &DispatchServices,
) -> Result<StepOutcome> {
    match body {
        StepBody::Agent { agent, prompt, .. } => {
            debug!(step_id, agent, "dispatching agent step");
            dispatch_agent(step_id, agent, prompt, workflow, ctx, services).await
        }
        StepBody::Block { uses, with_inputs } => {
            debug!(step_id, block = uses, "dispatching block step");
            dispatch_block(step_id, uses, with_inputs, ctx, snapshot, services).await
        }
        StepBody::Action { action, parameters } => {
            debug!(step_id, action, "dispatching action step");
            dispatch_action(step_id, action, parameters, ctx, snapshot).await
        }
        StepBody::Script { run } => {
            debug!(step_id, "dispatching inline script step");
            dispatch_inline_script(step_id, run, ctx, snapshot, services).await
        }
    }
}

async fn dispatch_agent(
    step_id: &str,
    agent_name: &str,
    prompt_template: &str,
    workflow: &Workflow,
    ctx: &ExecutionContext,
    services: &DispatchServices,
) -> Result<StepOutcome> {
    let agent_def = workflow
        .agents
        .get(agent_name)
        .ok_or_else(|| LacquerError::ValidationError {
            message: format!("step '{step_id}' references unknown agent '{agent_name}'"),
        })?;

    let provider = services.providers.resolve(&agent_def.provider)?;
    let runner = AgentStepRunner::new(provider, Arc::clone(&services.tool_registry))
        .with_max_depth(services.config.max_tool_call_depth);

    let outcome = runner
        .run(
            step_id,
            agent_name,
            agent_def.system_prompt.as_deref(),
            prompt_template,
            ctx,
        )
        .await?;

    Ok(StepOutcome {
        output: HashMap::from([("response".to_string(), Value::String(outcome.response.clone()))]),
        response: Some(outcome.response),
        token_usage: Some(outcome.usage),
    })
}

async fn dispatch_block(
    step_id: &str,
    uses: &str,
    with_inputs: &HashMap<String, Value>,
    ctx: &ExecutionContext,
    snapshot: &ContextSnapshot,
    services: &DispatchServices,
) -> Result<StepOutcome> {
    let block_dir = ctx.cwd().join(uses);
    let block = services.block_registry.load(&block_dir).await?;

    let rendered = render_value_map(step_id, with_inputs, snapshot)?;
    let bound = validate_and_apply_defaults(&block.inputs, &rendered)?;

    let executor: Box<dyn BlockExecutor> = match (&block.runtime, &block.body) {
        (BlockRuntime::Bash, BlockBody::Script { script }) => Box::new(ShellExecutor::new(
            block.name.clone(),
            script.clone(),
            services.config.cache_dir.clone(),
            HashMap::new(),
        )),
        (BlockRuntime::Docker, BlockBody::Container { image, command, env }) => {
            Box::new(ContainerExecutor::new(
                block.name.clone(),
                image.clone(),
                command.clone(),
                env.clone(),
                true,
            ))
        }
        (BlockRuntime::Native, BlockBody::Native { workflow }) => Box::new(NativeExecutor::new(
            workflow.clone(),
            Arc::clone(&services.workflow_runner),
        )),
        _ => {
            return Err(LacquerError::BlockRegistryError {
                message: format!(
                    "block '{}' declares runtime {:?} with a mismatched body",
                    block.name, block.runtime
                ),
            })
        }
    };

    let output = executor.execute(step_id, ctx, bound).await?;
    Ok(output.into())
}

async fn dispatch_action(
    step_id: &str,
    action: &str,
    parameters: &HashMap<String, Value>,
    ctx: &ExecutionContext,
    snapshot: &ContextSnapshot,
) -> Result<StepOutcome> {
    let rendered = render_value_map(step_id, parameters, snapshot)?;
    let output = crate::actions::dispatch(step_id, action, &rendered).await?;

    if action == "update_state" {
        crate::actions::apply_update_state(ctx, rendered).await?;
    }

    Ok(output.into())
}

async fn dispatch_inline_script(
    step_id: &str,
    run_template: &str,
    ctx: &ExecutionContext,
    snapshot: &ContextSnapshot,
    services: &DispatchServices,
) -> Result<StepOutcome> {
    let script = lacquer_core::expr::render_template(run_template, snapshot).map_err(|e| {
        LacquerError::ExpressionError {
            step_id: step_id.to_string(),
            message: e.to_string(),
        }
    })?;

    let executor = ShellExecutor::new(step_id, script, services.config.cache_dir.clone(), HashMap::new());
    let output = executor.execute(step_id, ctx, HashMap::new()).await?;
    Ok(output.into())
}

/// Renders every string value in a parameter/input map against the
/// current context. Non-string JSON values (numbers, objects, arrays
/// built from literals in the YAML) pass through untouched; a string
/// that is a sole `{{ expr }}` fragment evaluates to its native type
/// rather than being stringified (spec.md §8 S3, §9).
fn render_value_map(
    step_id: &str,
    values: &HashMap<String, Value>,
    snapshot: &ContextSnapshot,
) -> Result<HashMap<String, Value>> {
    let mut rendered = HashMap::with_capacity(values.len());
    for (key, value) in values {
        rendered.insert(key.clone(), render_value(step_id, value, snapshot)?);
    }
    Ok(rendered)
}

/// A string value that, once trimmed, is a *single* `{{ expr }}`
/// fragment with nothing else around it — as opposed to a template
/// that interpolates one or more fragments into surrounding text.
/// Returns the fragment's inner expression source.
fn sole_template_expr(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

fn render_value(step_id: &str, value: &Value, snapshot: &ContextSnapshot) -> Result<Value> {
    match value {
        Value::String(s) => {
            let to_expr_error = |e: lacquer_core::expr::ExprError| LacquerError::ExpressionError {
                step_id: step_id.to_string(),
                message: e.to_string(),
            };

            // A sole `{{ expr }}` fragment keeps its evaluated JSON
            // type (number, object, ...); mixed text always stringifies.
            if let Some(expr) = sole_template_expr(s) {
                let value = lacquer_core::expr::evaluate(expr, snapshot).map_err(to_expr_error)?;
                return Ok(value.into_json());
            }

            let rendered = lacquer_core::expr::render_template(s, snapshot).map_err(to_expr_error)?;
            Ok(Value::String(rendered))
        }
        Value::Array(items) => {
            let rendered: Result<Vec<Value>> = items.iter().map(|v| render_value(step_id, v, snapshot)).collect();
            Ok(Value::Array(rendered?))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render_value(step_id, v, snapshot)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}
