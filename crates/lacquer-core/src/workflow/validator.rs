//! Static validation: everything that can and must be checked before a
//! run starts, so a malformed workflow never reaches the scheduler.

use super::model::Workflow;
use super::parser::referenced_step_ids;
use crate::error::{LacquerError, Result};
use std::collections::{HashMap, HashSet};

pub fn validate(workflow: &Workflow, source_name: &str) -> Result<()> {
    check_unique_step_ids(workflow, source_name)?;
    check_dependencies_exist(workflow, source_name)?;
    check_acyclic(workflow, source_name)?;
    check_balanced_expressions(workflow, source_name)?;
    Ok(())
}

fn check_unique_step_ids(workflow: &Workflow, source_name: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for step in &workflow.workflow.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(LacquerError::SchemaError {
                file: source_name.to_string(),
                message: format!("duplicate step id '{}'", step.id),
            });
        }
    }
    Ok(())
}

fn check_dependencies_exist(workflow: &Workflow, source_name: &str) -> Result<()> {
    let known: HashSet<&str> = workflow
        .workflow
        .steps
        .iter()
        .map(|s| s.id.as_str())
        .collect();

    for step in &workflow.workflow.steps {
        for dep in referenced_step_ids(step) {
            if !known.contains(dep.as_str()) {
                return Err(LacquerError::SchemaError {
                    file: source_name.to_string(),
                    message: format!(
                        "step '{}' references unknown step '{}'",
                        step.id, dep
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Depth-first search with the classic white/gray/black coloring; a
/// back-edge onto a gray node means a cycle.
fn check_acyclic(workflow: &Workflow, source_name: &str) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let edges: HashMap<&str, Vec<String>> = workflow
        .workflow
        .steps
        .iter()
        .map(|s| (s.id.as_str(), referenced_step_ids(s)))
        .collect();

    let mut colors: HashMap<&str, Color> = workflow
        .workflow
        .steps
        .iter()
        .map(|s| (s.id.as_str(), Color::White))
        .collect();

    fn visit<'a>(
        node: &'a str,
        edges: &HashMap<&'a str, Vec<String>>,
        colors: &mut HashMap<&'a str, Color>,
    ) -> Option<String> {
        colors.insert(node, Color::Gray);
        if let Some(deps) = edges.get(node) {
            for dep in deps {
                match colors.get(dep.as_str()).copied() {
                    Some(Color::Gray) => return Some(dep.clone()),
                    Some(Color::White) => {
                        if let Some(cycle_node) = visit(dep.as_str(), edges, colors) {
                            return Some(cycle_node);
                        }
                    }
                    _ => {}
                }
            }
        }
        colors.insert(node, Color::Black);
        None
    }

    for step in &workflow.workflow.steps {
        if colors.get(step.id.as_str()).copied() == Some(Color::White) {
            if let Some(cycle_node) = visit(step.id.as_str(), &edges, &mut colors) {
                return Err(LacquerError::SchemaError {
                    file: source_name.to_string(),
                    message: format!("dependency cycle detected at step '{cycle_node}'"),
                });
            }
        }
    }
    Ok(())
}

fn check_balanced_expressions(workflow: &Workflow, source_name: &str) -> Result<()> {
    let mut all_exprs: Vec<&str> = Vec::new();
    for step in &workflow.workflow.steps {
        if let Some(c) = &step.condition {
            all_exprs.push(c);
        }
        all_exprs.extend(step.outputs.values().map(String::as_str));
    }
    all_exprs.extend(workflow.workflow.outputs.values().map(String::as_str));

    for expr in all_exprs {
        if !parens_balanced(expr) {
            return Err(LacquerError::SchemaError {
                file: source_name.to_string(),
                message: format!("unbalanced parentheses in expression: {expr}"),
            });
        }
    }
    Ok(())
}

fn parens_balanced(text: &str) -> bool {
    let mut depth = 0i32;
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}
