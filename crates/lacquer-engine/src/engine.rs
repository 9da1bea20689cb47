//! The workflow engine façade (spec.md §4): the single entry point a
//! host embeds to run a parsed [`Workflow`] to completion, and the
//! `WorkflowRunner` seam that lets a native block recurse back into
//! this same machinery for nested workflows.

use crate::dispatch::DispatchServices;
use crate::events::{self, ProgressEvent};
use crate::providers::ProviderRegistry;
use crate::scheduler;
use async_trait::async_trait;
use lacquer_agent::ToolRegistry;
use lacquer_blocks::{validate::validate_and_apply_defaults, BlockRegistry, WorkflowRunner};
use lacquer_core::config::EngineConfig;
use lacquer_core::context::{ExecutionContext, RunStatus, StepResult, TokenUsage};
use lacquer_core::error::{LacquerError, Result};
use lacquer_core::workflow::Workflow;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::Receiver;
use tracing::{info, warn};

/// A completed (or aborted) run's final state: status, every step's
/// result, the bound workflow outputs, and token usage summed across
/// every step that reported one (spec.md's data-model invariant that a
/// run's total usage is the sum of its steps').
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub step_results: HashMap<String, StepResult>,
    pub outputs: HashMap<String, Value>,
    pub token_usage: TokenUsage,
}

impl ExecutionSummary {
    async fn capture(ctx: &ExecutionContext) -> Self {
        let step_results: HashMap<String, StepResult> = ctx
            .all_step_results()
            .await
            .into_iter()
            .map(|r| (r.step_id.clone(), r))
            .collect();

        let mut token_usage = TokenUsage::default();
        for result in step_results.values() {
            if let Some(usage) = result.token_usage {
                token_usage.add(usage);
            }
        }

        Self {
            run_id: ctx.run_id().to_string(),
            status: ctx.run_status().await,
            step_results,
            outputs: ctx.workflow_outputs().await.unwrap_or_default(),
            token_usage,
        }
    }
}

/// The engine: holds everything a step dispatch needs that isn't
/// specific to a single run (the block registry, tool registry,
/// model-provider registry, and engine-wide config), and resolves
/// nested `native` block invocations back into its own scheduler via
/// [`WorkflowRunner`].
///
/// `self_ref` exists only so `run_nested` — which receives `&self` from
/// a `Box<dyn BlockExecutor>` it doesn't control the lifetime of — can
/// hand the scheduler an owned `Arc<dyn WorkflowRunner>` for the next
/// level of nesting, without the engine's public constructor exposing
/// an `Arc` cycle the caller has to manage.
pub struct Engine {
    config: EngineConfig,
    block_registry: Arc<BlockRegistry>,
    tool_registry: Arc<ToolRegistry>,
    providers: ProviderRegistry,
    self_ref: Weak<Engine>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        block_registry: BlockRegistry,
        tool_registry: ToolRegistry,
        providers: ProviderRegistry,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            config,
            block_registry: Arc::new(block_registry),
            tool_registry: Arc::new(tool_registry),
            providers,
            self_ref: weak.clone(),
        })
    }

    fn dispatch_services(self: &Arc<Self>) -> Arc<DispatchServices> {
        Arc::new(DispatchServices {
            config: self.config.clone(),
            block_registry: Arc::clone(&self.block_registry),
            tool_registry: Arc::clone(&self.tool_registry),
            providers: self.providers.clone(),
            workflow_runner: self.self_ref.upgrade().expect("engine outlives its own Arc") as Arc<dyn WorkflowRunner>,
        })
    }

    /// Runs `workflow` to completion from a cold root context. `cwd` is
    /// the workflow file's own directory, so `uses:` block paths inside
    /// it resolve relative to where the workflow lives rather than the
    /// host process's working directory (spec.md §4.2 on `cwd`).
    ///
    /// Returns the live progress-event stream and a join handle for the
    /// run's eventual [`ExecutionSummary`], so a host can drain events
    /// concurrently with awaiting completion rather than choosing one
    /// or the other. A caller input that fails the workflow's declared
    /// `inputs:` schema (§2 "validate typed inputs") never reaches the
    /// scheduler: the join handle resolves immediately with the
    /// validation error.
    pub fn run(
        self: &Arc<Self>,
        workflow: Workflow,
        cwd: std::path::PathBuf,
        inputs: Value,
        metadata: Value,
    ) -> (
        Receiver<ProgressEvent>,
        tokio::task::JoinHandle<Result<ExecutionSummary>>,
    ) {
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(run_id = %run_id, cwd = %cwd.display(), "run requested");

        let bound_inputs = match bind_workflow_inputs(&workflow, inputs) {
            Ok(bound) => bound,
            Err(e) => {
                let (_tx, rx) = events::channel();
                return (rx, tokio::spawn(async move { Err(e) }));
            }
        };

        let ctx = Arc::new(ExecutionContext::new_root_at(run_id, cwd, bound_inputs, metadata));
        let (tx, rx) = events::channel();
        let handle = self.spawn_run(Arc::new(workflow), ctx, tx);
        (rx, handle)
    }

    fn spawn_run(
        self: &Arc<Self>,
        workflow: Arc<Workflow>,
        ctx: Arc<ExecutionContext>,
        events: tokio::sync::mpsc::Sender<ProgressEvent>,
    ) -> tokio::task::JoinHandle<Result<ExecutionSummary>> {
        let services = self.dispatch_services();
        let run_timeout = self.config.default_run_timeout;
        let run_id = ctx.run_id().to_string();

        tokio::spawn(async move {
            if !workflow.state.is_empty() {
                let defaults: serde_json::Map<String, Value> = workflow
                    .state
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                ctx.update_state(defaults).await;
            }

            let scheduled = scheduler::run_to_completion(
                Arc::clone(&workflow),
                Arc::clone(&ctx),
                services,
                events,
            );

            match tokio::time::timeout(run_timeout, scheduled).await {
                Ok(Ok(())) => Ok(ExecutionSummary::capture(&ctx).await),
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    warn!(run_id = %run_id, timeout_ms = run_timeout.as_millis() as u64, "run timed out");
                    ctx.cancel();
                    Err(LacquerError::DeadlineExceeded {
                        step_id: format!("<run {run_id}>"),
                        elapsed_ms: run_timeout.as_millis() as u64,
                    })
                }
            }
        })
    }
}

/// Binds a caller- or block-mapped `inputs` value against a workflow's
/// own declared `inputs:` schema (spec.md §2 "validate typed inputs",
/// §3 "input schema with defaults"): required inputs must be present,
/// declared types/enum/range are checked, and defaults are applied for
/// absent optional inputs. Reuses the same validator the block registry
/// applies to a block's own `inputs:` (`lacquer_blocks::validate`) since
/// a workflow's input schema has the identical shape.
fn bind_workflow_inputs(workflow: &Workflow, inputs: Value) -> Result<Value> {
    let provided: HashMap<String, Value> = match inputs {
        Value::Object(map) => map.into_iter().collect(),
        Value::Null => HashMap::new(),
        other => {
            return Err(LacquerError::ValidationError {
                message: format!("workflow inputs must be a JSON object, got {other}"),
            })
        }
    };
    let bound = validate_and_apply_defaults(&workflow.inputs, &provided)?;
    Ok(Value::Object(bound.into_iter().collect()))
}

/// Lets a `native` block step recurse back into the engine: the nested
/// run gets its own isolated state map (seeded only from the nested
/// workflow's own `state:` defaults, never the parent's — spec.md
/// §4.4: "parent state is not leaked through the block boundary") and
/// its own isolated, schema-validated `inputs` (the block's mapped
/// inputs only). It shares `cwd`, so relative `uses:` paths inside the
/// nested workflow still resolve against the top-level run's
/// directory, and the cancellation token, so cancelling the outer run
/// cancels every nested run too.
#[async_trait]
impl WorkflowRunner for Engine {
    async fn run_nested(
        &self,
        workflow: &Workflow,
        parent: &ExecutionContext,
        inputs: Value,
    ) -> Result<HashMap<String, Value>> {
        let engine = self.self_ref.upgrade().expect("engine outlives its own Arc");
        let bound_inputs = bind_workflow_inputs(workflow, inputs)?;
        let child = Arc::new(parent.new_child(bound_inputs));
        let (tx, mut rx) = events::channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let handle = engine.spawn_run(Arc::new(workflow.clone()), Arc::clone(&child), tx);
        handle
            .await
            .map_err(|e| LacquerError::BlockRegistryError {
                message: format!("nested workflow task panicked: {e}"),
            })??;

        Ok(child.workflow_outputs().await.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lacquer_agent::ToolRegistry;
    use lacquer_blocks::BlockRegistry;
    use lacquer_core::workflow::parse_str;

    fn build_engine() -> Arc<Engine> {
        Engine::new(
            EngineConfig::default(),
            BlockRegistry::new(),
            ToolRegistry::new(),
            ProviderRegistry::new(),
        )
    }

    /// spec.md §8 S3: a state-update chain across two dependent steps
    /// produces the expected final state and a one-shot outputs map.
    #[tokio::test]
    async fn state_update_chain_produces_expected_final_state_and_outputs() {
        let yaml = r#"
version: "1"
workflow:
  steps:
    - id: set_counter
      action: update_state
      parameters:
        counter: 10
    - id: bump_counter
      depends_on: [set_counter]
      action: update_state
      parameters:
        counter: "{{ number(state.counter) + 5 }}"
  outputs:
    final_counter: "{{ state.counter }}"
"#;
        let workflow = parse_str(yaml, "wf.laq.yaml").unwrap();
        let engine = build_engine();
        let (mut events, handle) = engine.run(
            workflow,
            std::env::temp_dir(),
            Value::Null,
            Value::Null,
        );
        tokio::spawn(async move { while events.recv().await.is_some() {} });

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(
            summary.outputs.get("final_counter").and_then(Value::as_f64),
            Some(15.0)
        );
    }

    /// A step with `on_error: fail` (the default) aborts the run; the
    /// summary reflects the failure and no later step dispatches.
    #[tokio::test]
    async fn failing_step_aborts_run_and_skips_downstream() {
        let yaml = r#"
version: "1"
workflow:
  steps:
    - id: boom
      action: not_a_real_action
      parameters: {}
    - id: never_runs
      depends_on: [boom]
      action: update_state
      parameters:
        touched: true
"#;
        let workflow = parse_str(yaml, "wf.laq.yaml").unwrap();
        let engine = build_engine();
        let (mut events, handle) = engine.run(
            workflow,
            std::env::temp_dir(),
            Value::Null,
            Value::Null,
        );
        tokio::spawn(async move { while events.recv().await.is_some() {} });

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(
            summary.step_results.get("never_runs").map(|r| r.status),
            Some(lacquer_core::context::StepStatus::Pending)
        );
    }

    /// spec.md §8 S6: parent state `{"secret":"S"}`; a native block
    /// with only `inputs.x` declared must not see `state.secret` —
    /// the nested run reports `seen: false`, and the parent's own
    /// state is untouched by the nested run's writes.
    #[tokio::test]
    async fn native_block_does_not_see_or_leak_parent_state() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("secret_checker")).unwrap();
        std::fs::write(
            dir.path().join("secret_checker/block.laq.yaml"),
            r#"
name: secret_checker
runtime: native
inputs:
  x:
    type: number
    required: true
workflow:
  version: "1"
  state:
    touched_by_child: true
  workflow:
    steps:
      - id: noop
        action: update_state
        parameters: {}
    outputs:
      seen: "{{ default(state.secret, false) }}"
"#,
        )
        .unwrap();

        let yaml = r#"
version: "1"
state:
  secret: "S"
workflow:
  steps:
    - id: call_block
      uses: ./secret_checker
      with:
        x: 1
  outputs:
    block_seen: "{{ steps.call_block.outputs.seen }}"
    parent_secret: "{{ state.secret }}"
    parent_touched: "{{ default(state.touched_by_child, false) }}"
"#;
        let workflow = parse_str(yaml, "wf.laq.yaml").unwrap();
        let engine = build_engine();
        let (mut events, handle) = engine.run(
            workflow,
            dir.path().to_path_buf(),
            Value::Null,
            Value::Null,
        );
        tokio::spawn(async move { while events.recv().await.is_some() {} });

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.outputs.get("block_seen"), Some(&Value::Bool(false)));
        assert_eq!(
            summary.outputs.get("parent_secret"),
            Some(&Value::String("S".to_string()))
        );
        assert_eq!(
            summary.outputs.get("parent_touched"),
            Some(&Value::Bool(false))
        );
    }

    /// Token usage in the summary is the sum of every step's reported
    /// usage (spec.md's data-model invariant 5); steps with no usage
    /// (e.g. built-in actions) contribute zero.
    #[tokio::test]
    async fn token_usage_sums_to_zero_when_no_step_reports_any() {
        let yaml = r#"
version: "1"
workflow:
  steps:
    - id: a
      action: update_state
      parameters:
        x: 1
"#;
        let workflow = parse_str(yaml, "wf.laq.yaml").unwrap();
        let engine = build_engine();
        let (mut events, handle) = engine.run(
            workflow,
            std::env::temp_dir(),
            Value::Null,
            Value::Null,
        );
        tokio::spawn(async move { while events.recv().await.is_some() {} });

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.token_usage.total, 0);
    }
}
