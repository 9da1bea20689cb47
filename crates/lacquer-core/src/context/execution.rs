//! The run-scoped, thread-safe data container every step dispatch
//! reads and writes through.
//!
//! `state_root` is an `Arc<RwLock<Map>>` rather than a bare `RwLock`
//! because every step dispatched within the *same* run shares one
//! [`ExecutionContext`] (held behind an outer `Arc` by the scheduler),
//! so concurrent dispatches all take the same lock. A [`new_child`]
//! scope (spun up for a nested `native` block run) is a different run
//! entirely — it gets its own fresh state map, never the parent's, so
//! a nested workflow can never read or clobber the outer run's state
//! (spec.md §4.4: "parent state is not leaked through the block
//! boundary").
//!
//! [`new_child`]: ExecutionContext::new_child

use super::step_result::StepResult;
use crate::error::{LacquerError, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running,
    Failed,
    Completed,
}

pub struct ExecutionContext {
    run_id: String,
    start_time: DateTime<Utc>,
    cwd: PathBuf,
    inputs: Value,
    metadata: Value,
    environment: HashMap<String, String>,
    state_root: Arc<RwLock<Map<String, Value>>>,
    step_results: RwLock<HashMap<String, StepResult>>,
    outputs: RwLock<Option<HashMap<String, Value>>>,
    cancellation: CancellationToken,
}

impl ExecutionContext {
    /// Builds a fresh root context: its own state map, its own
    /// cancellation token, environment snapshotted from the process at
    /// construction time.
    pub fn new_root(run_id: impl Into<String>, inputs: Value, metadata: Value) -> Self {
        Self::new_root_at(
            run_id,
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            inputs,
            metadata,
        )
    }

    /// Builds a fresh root context rooted at an explicit workflow
    /// directory (spec.md §4.2: "cwd (resolved workflow directory)") —
    /// what the façade uses so `uses:` block paths resolve relative to
    /// the workflow file rather than the host process's own cwd.
    pub fn new_root_at(run_id: impl Into<String>, cwd: PathBuf, inputs: Value, metadata: Value) -> Self {
        Self {
            run_id: run_id.into(),
            start_time: Utc::now(),
            cwd,
            inputs,
            metadata,
            environment: std::env::vars().collect(),
            state_root: Arc::new(RwLock::new(Map::new())),
            step_results: RwLock::new(HashMap::new()),
            outputs: RwLock::new(None),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn cwd(&self) -> &std::path::Path {
        &self.cwd
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancel(&self) {
        debug!(run_id = %self.run_id, "cancelling run");
        self.cancellation.cancel();
    }

    /// Local lookup only; inputs are immutable after bind and never
    /// forwarded to a parent (a child's inputs are whatever the caller,
    /// e.g. the native block executor, mapped in for it).
    pub fn get_input(&self, path: &[String]) -> Option<Value> {
        lookup_path(&self.inputs, path)
    }

    pub fn get_metadata(&self, path: &[String]) -> Option<Value> {
        lookup_path(&self.metadata, path)
    }

    pub fn get_env(&self, key: &str) -> Option<String> {
        self.environment.get(key).cloned()
    }

    /// Forwarded to the shared root map.
    pub async fn get_state(&self, path: &[String]) -> Option<Value> {
        let map = self.state_root.read().await;
        lookup_path_map(&map, path)
    }

    pub async fn get_all_state(&self) -> Map<String, Value> {
        self.state_root.read().await.clone()
    }

    /// Merges `updates` into the shared root state map. Every key in
    /// `updates` is applied under a single write-lock acquisition, so
    /// the whole call is atomic with respect to other concurrent
    /// `update_state` callers.
    pub async fn update_state(&self, updates: Map<String, Value>) {
        trace!(run_id = %self.run_id, keys = updates.len(), "updating state");
        let mut map = self.state_root.write().await;
        for (dotted_key, value) in updates {
            set_path(&mut map, &dotted_key, value);
        }
    }

    pub async fn get_step_result(&self, step_id: &str) -> Option<StepResult> {
        self.step_results.read().await.get(step_id).cloned()
    }

    pub async fn set_step_result(&self, result: StepResult) {
        self.step_results
            .write()
            .await
            .insert(result.step_id.clone(), result);
    }

    pub async fn all_step_results(&self) -> Vec<StepResult> {
        self.step_results.read().await.values().cloned().collect()
    }

    /// One-shot: a second call is an error, matching the "write-once"
    /// invariant on workflow outputs.
    pub async fn set_workflow_outputs(&self, outputs: HashMap<String, Value>) -> Result<()> {
        let mut guard = self.outputs.write().await;
        if guard.is_some() {
            return Err(LacquerError::OutputsAlreadySet {
                run_id: self.run_id.clone(),
            });
        }
        *guard = Some(outputs);
        Ok(())
    }

    pub async fn workflow_outputs(&self) -> Option<HashMap<String, Value>> {
        self.outputs.read().await.clone()
    }

    /// Derives a run status from the current step results, per §4.2:
    /// pending if any step is pending and none failed/running; running
    /// if any is running; failed if any failed; completed if all
    /// terminal.
    pub async fn run_status(&self) -> RunStatus {
        let results = self.step_results.read().await;
        if results.values().any(|r| r.status == super::StepStatus::Running) {
            return RunStatus::Running;
        }
        if results.values().any(|r| r.status == super::StepStatus::Failed) {
            return RunStatus::Failed;
        }
        if results.values().any(|r| r.status == super::StepStatus::Pending) {
            return RunStatus::Pending;
        }
        RunStatus::Completed
    }

    /// A child scope for a nested (native block) run: its own fresh
    /// state map (seeded by the caller from the nested workflow's own
    /// `state:` defaults, never the parent's state), fresh
    /// `step_results`/`outputs`/`start_time`, and its own isolated
    /// `inputs` (the block's mapped inputs only). Shares `cwd` (so
    /// relative `uses:` paths still resolve against the top-level
    /// run's directory) and the cancellation token (so cancelling the
    /// outer run cancels every nested run too).
    pub fn new_child(&self, inputs: Value) -> ExecutionContext {
        ExecutionContext {
            run_id: format!("{}/{}", self.run_id, uuid::Uuid::new_v4()),
            start_time: Utc::now(),
            cwd: self.cwd.clone(),
            inputs,
            metadata: self.metadata.clone(),
            environment: self.environment.clone(),
            state_root: Arc::new(RwLock::new(Map::new())),
            step_results: RwLock::new(HashMap::new()),
            outputs: RwLock::new(None),
            cancellation: self.cancellation.clone(),
        }
    }
}

fn lookup_path(root: &Value, path: &[String]) -> Option<Value> {
    let mut current = root;
    for segment in path {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

fn lookup_path_map(root: &Map<String, Value>, path: &[String]) -> Option<Value> {
    let (first, rest) = path.split_first()?;
    let mut current = root.get(first)?;
    for segment in rest {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

/// Writes `value` at a dot-nested `key` (e.g. `"a.b.c"`), creating
/// intermediate object maps as needed.
fn set_path(map: &mut Map<String, Value>, key: &str, value: Value) {
    let segments: Vec<&str> = key.split('.').collect();
    set_path_segments(map, &segments, value);
}

fn set_path_segments(map: &mut Map<String, Value>, segments: &[&str], value: Value) {
    match segments.split_first() {
        None => {}
        Some((last, &[])) => {
            map.insert((*last).to_string(), value);
        }
        Some((head, rest)) => {
            let entry = map
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(nested) = entry {
                set_path_segments(nested, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn update_state_creates_nested_path() {
        let ctx = ExecutionContext::new_root("r1", json!({}), json!({}));
        let mut updates = Map::new();
        updates.insert("counter".to_string(), json!(10));
        ctx.update_state(updates).await;

        let value = ctx.get_state(&["counter".to_string()]).await;
        assert_eq!(value, Some(json!(10)));
    }

    #[tokio::test]
    async fn set_workflow_outputs_is_one_shot() {
        let ctx = ExecutionContext::new_root("r1", json!({}), json!({}));
        ctx.set_workflow_outputs(HashMap::from([("x".to_string(), json!(1))]))
            .await
            .unwrap();
        let err = ctx
            .set_workflow_outputs(HashMap::from([("y".to_string(), json!(2))]))
            .await
            .unwrap_err();
        assert!(matches!(err, LacquerError::OutputsAlreadySet { .. }));
    }

    #[tokio::test]
    async fn child_state_is_isolated_from_root() {
        let root = ExecutionContext::new_root("r1", json!({}), json!({"secret": "S"}));
        let mut root_updates = Map::new();
        root_updates.insert("secret".to_string(), json!("S"));
        root.update_state(root_updates).await;

        let child = root.new_child(json!({"x": 1}));
        assert_eq!(child.get_state(&["secret".to_string()]).await, None);

        let mut child_updates = Map::new();
        child_updates.insert("seen".to_string(), json!(true));
        child.update_state(child_updates).await;

        assert_eq!(
            child.get_state(&["seen".to_string()]).await,
            Some(json!(true))
        );
        assert_eq!(root.get_state(&["seen".to_string()]).await, None);
    }

    #[tokio::test]
    async fn child_has_isolated_inputs() {
        let root = ExecutionContext::new_root("r1", json!({"secret": "S"}), json!({}));
        let child = root.new_child(json!({"x": 1}));

        assert_eq!(child.get_input(&["secret".to_string()]), None);
        assert_eq!(child.get_input(&["x".to_string()]), Some(json!(1)));
    }

    #[tokio::test]
    async fn child_has_fresh_step_results() {
        let root = ExecutionContext::new_root("r1", json!({}), json!({}));
        root.set_step_result(StepResult::pending("s1", Utc::now()))
            .await;
        let child = root.new_child(json!({}));
        assert!(child.get_step_result("s1").await.is_none());
    }
}
