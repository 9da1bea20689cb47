//! A point-in-time, fully-owned copy of everything an expression might
//! read. The expression evaluator's [`crate::expr::ExpressionContext`]
//! trait is synchronous (pure, read-only, no `.await`), while
//! [`super::ExecutionContext`]'s maps live behind async locks; a
//! snapshot is the bridge between the two.

use super::ExecutionContext;
use crate::expr::ExpressionContext;
use serde_json::Value;
use std::collections::HashMap;

pub struct ContextSnapshot {
    inputs: Value,
    state: Value,
    steps: HashMap<String, HashMap<String, Value>>,
    env: HashMap<String, String>,
    metadata: Value,
}

impl ExecutionContext {
    /// Clones out inputs, state, step outputs, env and metadata under a
    /// single pass over each lock, producing something the expression
    /// evaluator can read from synchronously.
    pub async fn snapshot(&self) -> ContextSnapshot {
        let state = self.get_all_state().await;
        let steps = self
            .all_step_results()
            .await
            .into_iter()
            .map(|r| (r.step_id.clone(), r.output.clone()))
            .collect();

        ContextSnapshot {
            inputs: self.get_input(&[]).unwrap_or(Value::Null),
            state: Value::Object(state),
            steps,
            env: self.environment_snapshot(),
            metadata: self.get_metadata(&[]).unwrap_or(Value::Null),
        }
    }

    fn environment_snapshot(&self) -> HashMap<String, String> {
        std::env::vars().collect()
    }
}

impl ExpressionContext for ContextSnapshot {
    fn get_input(&self, path: &[String]) -> Option<Value> {
        lookup(&self.inputs, path)
    }

    fn get_state(&self, path: &[String]) -> Option<Value> {
        lookup(&self.state, path)
    }

    fn get_step_output(&self, step_id: &str, path: &[String]) -> Option<Value> {
        let outputs = self.steps.get(step_id)?;
        if path.is_empty() {
            return Some(Value::Object(
                outputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            ));
        }
        let (first, rest) = path.split_first()?;
        let mut current = outputs.get(first)?.clone();
        for segment in rest {
            current = current.get(segment)?.clone();
        }
        Some(current)
    }

    fn get_env(&self, key: &str) -> Option<String> {
        self.env.get(key).cloned()
    }

    fn get_metadata(&self, path: &[String]) -> Option<Value> {
        lookup(&self.metadata, path)
    }
}

fn lookup(root: &Value, path: &[String]) -> Option<Value> {
    let mut current = root;
    for segment in path {
        current = current.get(segment)?;
    }
    Some(current.clone())
}
