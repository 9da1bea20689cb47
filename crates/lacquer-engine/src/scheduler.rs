//! The step scheduler (spec.md §4.3): ready-set construction over the
//! dependency graph, condition evaluation, concurrency-bounded
//! dispatch, retry/backoff, `on_error` handling, output binding,
//! progress events, and cancellation.

use crate::dispatch::{dispatch_body, DispatchServices};
use crate::events::ProgressEvent;
use crate::retry::backoff_delay;
use lacquer_core::context::{ExecutionContext, StepResult, StepStatus};
use lacquer_core::error::{LacquerError, Result};
use lacquer_core::workflow::{referenced_step_ids, OnError, Step, Workflow};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Runs every step in `workflow` to completion against `ctx`, emitting
/// progress events to `events` as it goes. Returns once every dispatched
/// step has reached a terminal status (spec.md §4.3: "Cancellation ...
/// the scheduler returns once every dispatched step has reached a
/// terminal status").
pub async fn run_to_completion(
    workflow: Arc<Workflow>,
    ctx: Arc<ExecutionContext>,
    services: Arc<DispatchServices>,
    events: Sender<ProgressEvent>,
) -> Result<()> {
    info!(run_id = %ctx.run_id(), steps = workflow.workflow.steps.len(), "starting run");
    let step_count = workflow.workflow.steps.len();
    let deps: HashMap<String, Vec<String>> = workflow
        .workflow
        .steps
        .iter()
        .map(|s| (s.id.clone(), referenced_step_ids(s)))
        .collect();
    let index: HashMap<String, usize> = workflow
        .workflow
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.clone(), i))
        .collect();

    for step in &workflow.workflow.steps {
        ctx.set_step_result(StepResult::pending(step.id.clone(), ctx.start_time()))
            .await;
    }

    let semaphore = Arc::new(Semaphore::new(services.config.max_concurrent_steps));
    let aborting = Arc::new(AtomicBool::new(false));
    let mut dispatched: HashSet<String> = HashSet::new();
    let mut join_set: JoinSet<()> = JoinSet::new();

    loop {
        if !aborting.load(Ordering::SeqCst) {
            for step in &workflow.workflow.steps {
                if dispatched.contains(&step.id) {
                    continue;
                }
                let Some(result) = ctx.get_step_result(&step.id).await else {
                    continue;
                };
                if result.status != StepStatus::Pending {
                    continue;
                }
                if !all_terminal(&ctx, &deps[&step.id]).await {
                    continue;
                }
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    break;
                };

                dispatched.insert(step.id.clone());
                let step = step.clone();
                let step_index = index[&step.id];
                let ctx = Arc::clone(&ctx);
                let events = events.clone();
                let aborting = Arc::clone(&aborting);
                let services = Arc::clone(&services);
                let workflow = Arc::clone(&workflow);

                join_set.spawn(async move {
                    let _permit = permit;
                    run_one_step(
                        &step,
                        step_index,
                        step_count,
                        &workflow,
                        &ctx,
                        &services,
                        &events,
                        &aborting,
                    )
                    .await;
                });
            }
        }

        if join_set.is_empty() {
            // Either every step reached a terminal status, or the
            // remaining pending steps wait on a dependency that will
            // never resolve (an unsatisfiable `depends_on`, a reference
            // to a nonexistent step id, or a genuine cycle — all of
            // which a static validator should reject before the
            // scheduler ever runs). Either way nothing in flight means
            // no further progress is possible; stop rather than spin.
            break;
        }

        let _ = join_set.join_next().await;
    }

    while join_set.join_next().await.is_some() {}

    let result = bind_workflow_outputs(&workflow, &ctx).await;
    match &result {
        Ok(_) => info!(run_id = %ctx.run_id(), "run finished"),
        Err(e) => warn!(run_id = %ctx.run_id(), error = %e, "run finished with an output-binding error"),
    }
    result
}

async fn all_terminal(ctx: &ExecutionContext, ids: &[String]) -> bool {
    for id in ids {
        match ctx.get_step_result(id).await {
            Some(result) if result.status.is_terminal() => continue,
            _ => return false,
        }
    }
    true
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip(step, workflow, ctx, services, events, aborting), fields(step_id = %step.id))]
async fn run_one_step(
    step: &Step,
    step_index: usize,
    total_steps: usize,
    workflow: &Workflow,
    ctx: &ExecutionContext,
    services: &DispatchServices,
    events: &Sender<ProgressEvent>,
    aborting: &Arc<AtomicBool>,
) {
    if aborting.load(Ordering::SeqCst) {
        debug!("run is aborting, skipping step");
        mark_skipped(step, step_index, total_steps, ctx, events).await;
        return;
    }

    if let Some(condition) = &step.condition {
        let snapshot = ctx.snapshot().await;
        let truthy = lacquer_core::expr::evaluate(condition, &snapshot)
            .map(|v| v.is_truthy())
            .unwrap_or(false);
        if !truthy {
            debug!(%condition, "condition evaluated false, skipping step");
            mark_skipped(step, step_index, total_steps, ctx, events).await;
            return;
        }
    }

    info!(step_index, total_steps, "dispatching step");
    let _ = events
        .send(ProgressEvent::StepStarted {
            step_id: step.id.clone(),
            step_index,
            total_steps,
        })
        .await;

    let start_time = chrono::Utc::now();
    let step_timeout = step
        .timeout_secs
        .map(std::time::Duration::from_secs)
        .unwrap_or(services.config.default_step_timeout);

    let mut attempt: u32 = 0;
    loop {
        let snapshot = ctx.snapshot().await;
        let body_future = dispatch_body(&step.id, &step.body, workflow, ctx, &snapshot, services);
        let cancelled = ctx.cancellation_token();

        let outcome = tokio::select! {
            biased;
            _ = cancelled.cancelled() => Err(LacquerError::CancelledError { run_id: ctx.run_id().to_string() }),
            timed = tokio::time::timeout(step_timeout, body_future) => match timed {
                Ok(result) => result,
                Err(_) => Err(LacquerError::DeadlineExceeded {
                    step_id: step.id.clone(),
                    elapsed_ms: step_timeout.as_millis() as u64,
                }),
            },
        };

        match outcome {
            Ok(step_outcome) => {
                complete_step(step, step_index, total_steps, start_time, attempt, step_outcome, ctx, events, aborting)
                    .await;
                return;
            }
            Err(e) => {
                let short_circuit = matches!(
                    e,
                    LacquerError::CancelledError { .. } | LacquerError::DeadlineExceeded { .. }
                );
                let can_retry = !short_circuit
                    && step.on_error == OnError::Fail
                    && attempt < step.max_retries
                    && e.is_retryable();

                if can_retry {
                    attempt += 1;
                    let retry_after = match &e {
                        LacquerError::ModelError { retry_after, .. } => *retry_after,
                        _ => None,
                    };
                    let delay = backoff_delay(
                        attempt - 1,
                        services.config.retry_backoff_base,
                        services.config.retry_backoff_factor,
                        services.config.retry_backoff_cap,
                        services.config.retry_backoff_jitter,
                        retry_after,
                    );
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "step failed, retrying");
                    let _ = events
                        .send(ProgressEvent::StepRetrying {
                            step_id: step.id.clone(),
                            step_index,
                            total_steps,
                            attempt,
                            error: e.to_string(),
                        })
                        .await;
                    tokio::time::sleep(delay).await;
                    continue;
                }

                match step.on_error {
                    OnError::Fail => {
                        warn!(error = %e, "step failed, aborting run");
                        aborting.store(true, Ordering::SeqCst);
                        ctx.cancel();
                    }
                    OnError::Continue => warn!(error = %e, "step failed, continuing run"),
                    OnError::Skip => debug!(error = %e, "step failed, treating as skipped"),
                }
                fail_step(step, start_time, attempt, &e, ctx).await;
                emit_failure(step, step_index, total_steps, &e, events).await;
                return;
            }
        }
    }
}

async fn mark_skipped(
    step: &Step,
    step_index: usize,
    total_steps: usize,
    ctx: &ExecutionContext,
    events: &Sender<ProgressEvent>,
) {
    let mut result = StepResult::pending(step.id.clone(), ctx.start_time());
    result.status = StepStatus::Skipped;
    result.end_time = Some(chrono::Utc::now());
    ctx.set_step_result(result).await;
    let _ = events
        .send(ProgressEvent::StepSkipped {
            step_id: step.id.clone(),
            step_index,
            total_steps,
        })
        .await;
}

#[allow(clippy::too_many_arguments)]
async fn complete_step(
    step: &Step,
    step_index: usize,
    total_steps: usize,
    start_time: chrono::DateTime<chrono::Utc>,
    attempt: u32,
    step_outcome: crate::dispatch::StepOutcome,
    ctx: &ExecutionContext,
    events: &Sender<ProgressEvent>,
    aborting: &Arc<AtomicBool>,
) {
    debug!(step_id = %step.id, attempt, "step body completed, binding outputs");
    let mut result = StepResult::pending(step.id.clone(), start_time);
    result.status = StepStatus::Completed;
    result.output = step_outcome.output;
    result.response = step_outcome.response;
    result.token_usage = step_outcome.token_usage;
    result.retry_count = attempt;
    ctx.set_step_result(result).await;

    if !step.outputs.is_empty() {
        let snapshot = ctx.snapshot().await;
        let mut bound = HashMap::with_capacity(step.outputs.len());
        let mut binding_error = None;
        for (name, expr) in &step.outputs {
            match lacquer_core::expr::evaluate(expr, &snapshot) {
                Ok(value) => {
                    bound.insert(name.clone(), value.into_json());
                }
                Err(e) => {
                    binding_error = Some(LacquerError::ExpressionError {
                        step_id: step.id.clone(),
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        match binding_error {
            None => {
                let mut result = ctx.get_step_result(&step.id).await.expect("just set");
                result.output = bound;
                ctx.set_step_result(result).await;
            }
            Some(e) => {
                fail_step(step, start_time, attempt, &e, ctx).await;
                emit_failure(step, step_index, total_steps, &e, events).await;
                if step.on_error == OnError::Fail {
                    aborting.store(true, Ordering::SeqCst);
                    ctx.cancel();
                }
                return;
            }
        }
    }

    let end_time = chrono::Utc::now();
    let mut result = ctx.get_step_result(&step.id).await.expect("just set");
    result.end_time = Some(end_time);
    ctx.set_step_result(result).await;

    let _ = events
        .send(ProgressEvent::StepCompleted {
            step_id: step.id.clone(),
            step_index,
            total_steps,
            duration: end_time - start_time,
        })
        .await;
}

/// Records the step's terminal status after a failure: `skip` policy
/// converts it to `Skipped` ("equivalent to treating the failure as a
/// skip for downstream condition purposes", spec.md §4.3); `fail` and
/// `continue` both record `Failed`, differing only in whether the run
/// aborts.
async fn fail_step(
    step: &Step,
    start_time: chrono::DateTime<chrono::Utc>,
    attempt: u32,
    error: &LacquerError,
    ctx: &ExecutionContext,
) {
    let mut result = StepResult::pending(step.id.clone(), start_time);
    result.status = if step.on_error == OnError::Skip {
        StepStatus::Skipped
    } else {
        StepStatus::Failed
    };
    result.error = Some(error.to_string());
    result.retry_count = attempt;
    result.end_time = Some(chrono::Utc::now());
    ctx.set_step_result(result).await;
}

async fn emit_failure(
    step: &Step,
    step_index: usize,
    total_steps: usize,
    error: &LacquerError,
    events: &Sender<ProgressEvent>,
) {
    let event = if step.on_error == OnError::Skip {
        ProgressEvent::StepSkipped {
            step_id: step.id.clone(),
            step_index,
            total_steps,
        }
    } else {
        ProgressEvent::StepFailed {
            step_id: step.id.clone(),
            step_index,
            total_steps,
            error: error.to_string(),
        }
    };
    let _ = events.send(event).await;
}

async fn bind_workflow_outputs(workflow: &Workflow, ctx: &ExecutionContext) -> Result<()> {
    let snapshot = ctx.snapshot().await;
    let mut outputs = HashMap::with_capacity(workflow.workflow.outputs.len());
    for (name, expr) in &workflow.workflow.outputs {
        let value = lacquer_core::expr::evaluate(expr, &snapshot).map_err(|e| LacquerError::ExpressionError {
            step_id: "<workflow outputs>".to_string(),
            message: e.to_string(),
        })?;
        outputs.insert(name.clone(), value.into_json());
    }
    ctx.set_workflow_outputs(outputs).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use lacquer_agent::ToolRegistry;
    use lacquer_blocks::{BlockRegistry, WorkflowRunner};
    use lacquer_core::config::EngineConfig;
    use lacquer_core::workflow::parse_str;
    use serde_json::Value;

    struct NoopRunner;

    #[async_trait::async_trait]
    impl WorkflowRunner for NoopRunner {
        async fn run_nested(
            &self,
            _workflow: &Workflow,
            _parent: &ExecutionContext,
            _inputs: Value,
        ) -> Result<HashMap<String, Value>> {
            Ok(HashMap::new())
        }
    }

    fn services() -> Arc<DispatchServices> {
        Arc::new(DispatchServices {
            config: EngineConfig::default(),
            block_registry: Arc::new(BlockRegistry::new()),
            tool_registry: Arc::new(ToolRegistry::new()),
            providers: crate::providers::ProviderRegistry::new(),
            workflow_runner: Arc::new(NoopRunner),
        })
    }

    #[tokio::test]
    async fn independent_action_steps_all_complete() {
        let yaml = r#"
version: "1"
workflow:
  steps:
    - id: a
      action: update_state
      parameters:
        x: 1
    - id: b
      action: update_state
      parameters:
        y: 2
  outputs:
    done: "true"
"#;
        let workflow = Arc::new(parse_str(yaml, "wf.laq.yaml").unwrap());
        let ctx = Arc::new(ExecutionContext::new_root("run-1", Value::Null, Value::Null));
        let (tx, mut rx) = crate::events::channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        run_to_completion(workflow, Arc::clone(&ctx), services(), tx)
            .await
            .unwrap();

        let a = ctx.get_step_result("a").await.unwrap();
        let b = ctx.get_step_result("b").await.unwrap();
        assert_eq!(a.status, StepStatus::Completed);
        assert_eq!(b.status, StepStatus::Completed);
        assert!(ctx.workflow_outputs().await.is_some());
    }

    #[tokio::test]
    async fn condition_false_skips_step() {
        let yaml = r#"
version: "1"
workflow:
  steps:
    - id: a
      condition: "inputs.go == true"
      action: update_state
      parameters: {}
"#;
        let workflow = Arc::new(parse_str(yaml, "wf.laq.yaml").unwrap());
        let ctx = Arc::new(ExecutionContext::new_root("run-1", Value::Null, Value::Null));
        let (tx, mut rx) = crate::events::channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        run_to_completion(workflow, Arc::clone(&ctx), services(), tx)
            .await
            .unwrap();

        let a = ctx.get_step_result("a").await.unwrap();
        assert_eq!(a.status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn dependent_step_waits_for_upstream() {
        let yaml = r#"
version: "1"
workflow:
  steps:
    - id: first
      action: update_state
      parameters:
        seen: 1
    - id: second
      depends_on: [first]
      action: update_state
      parameters:
        also_seen: 2
"#;
        let workflow = Arc::new(parse_str(yaml, "wf.laq.yaml").unwrap());
        let ctx = Arc::new(ExecutionContext::new_root("run-1", Value::Null, Value::Null));
        let (tx, mut rx) = crate::events::channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        run_to_completion(workflow, Arc::clone(&ctx), services(), tx)
            .await
            .unwrap();

        let second = ctx.get_step_result("second").await.unwrap();
        assert_eq!(second.status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_action_fails_the_step_and_aborts() {
        let yaml = r#"
version: "1"
workflow:
  steps:
    - id: a
      action: nonexistent
      parameters: {}
    - id: b
      depends_on: [a]
      action: update_state
      parameters: {}
"#;
        let workflow = Arc::new(parse_str(yaml, "wf.laq.yaml").unwrap());
        let ctx = Arc::new(ExecutionContext::new_root("run-1", Value::Null, Value::Null));
        let (tx, mut rx) = crate::events::channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        run_to_completion(workflow, Arc::clone(&ctx), services(), tx)
            .await
            .unwrap();

        let a = ctx.get_step_result("a").await.unwrap();
        assert_eq!(a.status, StepStatus::Failed);
    }
}
