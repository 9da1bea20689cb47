//! Loads a `*.laq.yaml` file into the static [`super::model::Workflow`]
//! shape and performs the checks that must happen before a run starts:
//! version match, and (delegated to [`super::validator`]) cycle and
//! shape validation.

use super::model::{Step, StepBody, Workflow, SUPPORTED_VERSION};
use super::validator;
use crate::error::{LacquerError, Result};
use std::path::Path;

pub fn parse_str(yaml: &str, source_name: &str) -> Result<Workflow> {
    let workflow: Workflow =
        serde_yaml::from_str(yaml).map_err(|e| LacquerError::ParseError {
            file: source_name.to_string(),
            message: e.to_string(),
            source: Some(e),
        })?;

    if workflow.version != SUPPORTED_VERSION {
        return Err(LacquerError::SchemaError {
            file: source_name.to_string(),
            message: format!(
                "unsupported workflow version '{}' (expected '{}')",
                workflow.version, SUPPORTED_VERSION
            ),
        });
    }

    validator::validate(&workflow, source_name)?;
    Ok(workflow)
}

pub fn parse_file(path: &Path) -> Result<Workflow> {
    let text = std::fs::read_to_string(path)?;
    parse_str(&text, &path.display().to_string())
}

/// Every step id referenced via `steps.<id>` inside a step's templated
/// fields (prompt, block inputs, action parameters, condition), in
/// addition to its explicit `depends_on` list. The scheduler's
/// ready-set construction and the validator's cycle check both need
/// this union, so it lives here rather than being recomputed twice.
pub fn referenced_step_ids(step: &Step) -> Vec<String> {
    let mut ids = step.depends_on.clone();

    if let Some(cond) = &step.condition {
        ids.extend(extract_step_refs(cond));
    }

    match &step.body {
        StepBody::Agent { prompt, .. } => ids.extend(extract_step_refs(prompt)),
        StepBody::Block { with_inputs, .. } => {
            for v in with_inputs.values() {
                ids.extend(extract_step_refs_from_value(v));
            }
        }
        StepBody::Action { parameters, .. } => {
            for v in parameters.values() {
                ids.extend(extract_step_refs_from_value(v));
            }
        }
        StepBody::Script { run } => ids.extend(extract_step_refs(run)),
    }

    for expr in step.outputs.values() {
        ids.extend(extract_step_refs(expr));
    }

    ids.sort();
    ids.dedup();
    ids
}

fn extract_step_refs_from_value(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) => extract_step_refs(s),
        serde_json::Value::Array(items) => {
            items.iter().flat_map(extract_step_refs_from_value).collect()
        }
        serde_json::Value::Object(map) => {
            map.values().flat_map(extract_step_refs_from_value).collect()
        }
        _ => Vec::new(),
    }
}

/// Scans raw text for `steps.<id>` references, handling both bare
/// expressions and `{{ }}`-wrapped ones. Doesn't require a full
/// expression parse since we only need the id that comes right after
/// `steps.`.
fn extract_step_refs(text: &str) -> Vec<String> {
    const NEEDLE: &str = "steps.";
    let mut ids = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find(NEEDLE) {
        let after = &rest[pos + NEEDLE.len()..];
        let id: String = after
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if !id.is_empty() {
            ids.push(id);
        }
        rest = &after[id.len()..];
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_version() {
        let yaml = r#"
version: "2"
workflow:
  steps: []
"#;
        let err = parse_str(yaml, "wf.laq.yaml").unwrap_err();
        assert!(matches!(err, LacquerError::SchemaError { .. }));
    }

    #[test]
    fn extracts_step_refs_from_template() {
        let refs = extract_step_refs("{{ steps.analyze.outputs.result }} and steps.summarize.outputs.text");
        assert_eq!(refs, vec!["analyze".to_string(), "summarize".to_string()]);
    }

    #[test]
    fn extracts_step_refs_from_full_workflow() {
        let yaml = r#"
version: "1"
workflow:
  steps:
    - id: summary
      agent: writer
      prompt: "Summarize: {{ steps.analyze.outputs.text }}"
"#;
        let wf = parse_str(yaml, "wf.laq.yaml").unwrap();
        let refs = referenced_step_ids(&wf.workflow.steps[0]);
        assert_eq!(refs, vec!["analyze".to_string()]);
    }
}
