//! The expression language used in step conditions, output bindings, and
//! `{{ }}` template fragments inside prompts and parameters.
//!
//! Evaluation is pure and read-only: it can look up `inputs`, `state`,
//! `steps.<id>.outputs`, `env`, and `metadata`, and combine them with
//! literals, operators, and the fixed function registry in
//! [`functions`]. It can never mutate the context it reads from.

mod ast;
mod functions;
mod lexer;
mod parser;
mod value;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use value::EvalValue;

use serde_json::Value;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ExprError {
    #[error(transparent)]
    Parse(#[from] parser::ParseError),
    #[error(transparent)]
    Function(#[from] functions::FunctionError),
    #[error("'{0}' is not a recognized root (expected inputs, state, steps, env, or metadata)")]
    UnknownRoot(String),
    #[error("'steps.{0}' reference is missing a step id")]
    MissingStepId(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// Implemented by whatever holds the live data an expression can read:
/// in practice the step's execution scope. Every lookup returns `None`
/// for an absent path rather than erroring, so evaluation can apply the
/// "missing paths render as empty / are falsy" rule uniformly.
pub trait ExpressionContext {
    fn get_input(&self, path: &[String]) -> Option<Value>;
    fn get_state(&self, path: &[String]) -> Option<Value>;
    fn get_step_output(&self, step_id: &str, path: &[String]) -> Option<Value>;
    fn get_env(&self, key: &str) -> Option<String>;
    fn get_metadata(&self, path: &[String]) -> Option<Value>;
}

/// Evaluate a single expression, which may optionally be wrapped in
/// `{{ ... }}` (conditions and output-binding expressions are written
/// either way in workflow YAML; both forms are accepted).
pub fn evaluate(source: &str, ctx: &dyn ExpressionContext) -> Result<EvalValue, ExprError> {
    let trimmed = source.trim();
    let unwrapped = strip_braces(trimmed).unwrap_or(trimmed);
    let expr = parser::parse(unwrapped)?;
    eval(&expr, ctx)
}

/// Render a template string by replacing every `{{ ... }}` fragment with
/// the rendered (stringified) result of evaluating its contents. Text
/// outside `{{ }}` passes through unchanged.
pub fn render_template(template: &str, ctx: &dyn ExpressionContext) -> Result<String, ExprError> {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if template[i..].starts_with("{{") {
            let rest = &template[i + 2..];
            let end = rest
                .find("}}")
                .ok_or_else(|| ExprError::Unsupported("unterminated '{{' in template".into()))?;
            let inner = &rest[..end];
            let value = evaluate(inner, ctx)?;
            out.push_str(&value.render());
            i += 2 + end + 2;
        } else {
            let ch = template[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    Ok(out)
}

fn strip_braces(s: &str) -> Option<&str> {
    let s = s.strip_prefix("{{")?;
    let s = s.strip_suffix("}}")?;
    Some(s.trim())
}

fn eval(expr: &Expr, ctx: &dyn ExpressionContext) -> Result<EvalValue, ExprError> {
    match expr {
        Expr::Null => Ok(EvalValue::Json(Value::Null)),
        Expr::Bool(b) => Ok(EvalValue::from(*b)),
        Expr::Number(n) => Ok(EvalValue::from(*n)),
        Expr::Str(s) => Ok(EvalValue::from(s.clone())),
        Expr::Path(segments) => eval_path(segments, ctx),
        Expr::Call(name, args) => {
            let evaluated: Result<Vec<EvalValue>, ExprError> =
                args.iter().map(|a| eval(a, ctx)).collect();
            Ok(functions::call(name, &evaluated?)?)
        }
        Expr::Unary(op, inner) => eval_unary(*op, inner, ctx),
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, ctx),
    }
}

fn eval_path(segments: &[String], ctx: &dyn ExpressionContext) -> Result<EvalValue, ExprError> {
    let (root, rest) = segments
        .split_first()
        .ok_or_else(|| ExprError::Unsupported("empty path".into()))?;

    let looked_up = match root.as_str() {
        "inputs" => ctx.get_input(rest),
        "state" => ctx.get_state(rest),
        "metadata" => ctx.get_metadata(rest),
        "env" => {
            let key = rest
                .first()
                .ok_or_else(|| ExprError::Unsupported("env reference needs a name".into()))?;
            ctx.get_env(key).map(Value::String)
        }
        "steps" => {
            let step_id = rest
                .first()
                .ok_or_else(|| ExprError::MissingStepId("steps".into()))?;
            let tail = if rest.get(1).map(String::as_str) == Some("outputs") {
                &rest[2..]
            } else {
                &rest[1..]
            };
            ctx.get_step_output(step_id, tail)
        }
        other => return Err(ExprError::UnknownRoot(other.to_string())),
    };

    Ok(EvalValue::from_option(looked_up))
}

fn eval_unary(op: UnaryOp, inner: &Expr, ctx: &dyn ExpressionContext) -> Result<EvalValue, ExprError> {
    let v = eval(inner, ctx)?;
    match op {
        UnaryOp::Not => Ok(EvalValue::from(!v.is_truthy())),
        UnaryOp::Neg => match v.as_f64() {
            Some(n) => Ok(EvalValue::from(-n)),
            None => Err(ExprError::Unsupported("'-' applied to a non-number".into())),
        },
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &dyn ExpressionContext,
) -> Result<EvalValue, ExprError> {
    match op {
        BinaryOp::And => {
            let l = eval(lhs, ctx)?;
            if !l.is_truthy() {
                return Ok(EvalValue::from(false));
            }
            Ok(EvalValue::from(eval(rhs, ctx)?.is_truthy()))
        }
        BinaryOp::Or => {
            let l = eval(lhs, ctx)?;
            if l.is_truthy() {
                return Ok(EvalValue::from(true));
            }
            Ok(EvalValue::from(eval(rhs, ctx)?.is_truthy()))
        }
        BinaryOp::Eq => Ok(EvalValue::from(values_equal(&eval(lhs, ctx)?, &eval(rhs, ctx)?))),
        BinaryOp::Ne => Ok(EvalValue::from(!values_equal(
            &eval(lhs, ctx)?,
            &eval(rhs, ctx)?,
        ))),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            eval_arithmetic(op, lhs, rhs, ctx)
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            eval_relational(op, lhs, rhs, ctx)
        }
    }
}

/// Undefined is equal only to itself; it never equals a present value,
/// including JSON null (a missing path and an explicit null are
/// different states).
fn values_equal(a: &EvalValue, b: &EvalValue) -> bool {
    match (a, b) {
        (EvalValue::Undefined, EvalValue::Undefined) => true,
        (EvalValue::Undefined, _) | (_, EvalValue::Undefined) => false,
        (EvalValue::Json(x), EvalValue::Json(y)) => x == y,
    }
}

fn eval_arithmetic(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &dyn ExpressionContext,
) -> Result<EvalValue, ExprError> {
    let l = eval(lhs, ctx)?;
    let r = eval(rhs, ctx)?;

    if op == BinaryOp::Add {
        if let (Some(ls), Some(rs)) = (l.as_str(), r.as_str()) {
            return Ok(EvalValue::from(format!("{ls}{rs}")));
        }
    }

    let (ln, rn) = match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(ExprError::Unsupported(format!("{op:?} requires numbers"))),
    };
    let result = match op {
        BinaryOp::Add => ln + rn,
        BinaryOp::Sub => ln - rn,
        BinaryOp::Mul => ln * rn,
        BinaryOp::Div => ln / rn,
        _ => unreachable!(),
    };
    Ok(EvalValue::from(result))
}

fn eval_relational(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &dyn ExpressionContext,
) -> Result<EvalValue, ExprError> {
    let l = eval(lhs, ctx)?;
    let r = eval(rhs, ctx)?;

    if let (Some(ls), Some(rs)) = (l.as_str(), r.as_str()) {
        let cmp = ls.cmp(rs);
        return Ok(EvalValue::from(match op {
            BinaryOp::Lt => cmp.is_lt(),
            BinaryOp::Le => cmp.is_le(),
            BinaryOp::Gt => cmp.is_gt(),
            BinaryOp::Ge => cmp.is_ge(),
            _ => unreachable!(),
        }));
    }

    let (ln, rn) = match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(ExprError::Unsupported(format!("{op:?} requires comparable operands"))),
    };
    Ok(EvalValue::from(match op {
        BinaryOp::Lt => ln < rn,
        BinaryOp::Le => ln <= rn,
        BinaryOp::Gt => ln > rn,
        BinaryOp::Ge => ln >= rn,
        _ => unreachable!(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct TestContext {
        inputs: HashMap<String, Value>,
        state: HashMap<String, Value>,
        steps: HashMap<String, Value>,
        env: HashMap<String, String>,
    }

    fn lookup(map: &HashMap<String, Value>, path: &[String]) -> Option<Value> {
        let (first, rest) = path.split_first()?;
        let mut current = map.get(first)?.clone();
        for seg in rest {
            current = current.get(seg)?.clone();
        }
        Some(current)
    }

    impl ExpressionContext for TestContext {
        fn get_input(&self, path: &[String]) -> Option<Value> {
            lookup(&self.inputs, path)
        }
        fn get_state(&self, path: &[String]) -> Option<Value> {
            lookup(&self.state, path)
        }
        fn get_step_output(&self, step_id: &str, path: &[String]) -> Option<Value> {
            let full = self.steps.get(step_id)?.clone();
            let mut current = full;
            for seg in path {
                current = current.get(seg)?.clone();
            }
            Some(current)
        }
        fn get_env(&self, key: &str) -> Option<String> {
            self.env.get(key).cloned()
        }
        fn get_metadata(&self, _path: &[String]) -> Option<Value> {
            None
        }
    }

    #[test]
    fn condition_with_comparison() {
        let mut ctx = TestContext::default();
        ctx.inputs
            .insert("number".into(), Value::Number(75.into()));
        let result = evaluate("{{ inputs.number > 50 }}", &ctx).unwrap();
        assert!(result.is_truthy());
    }

    #[test]
    fn step_output_reference() {
        let mut ctx = TestContext::default();
        ctx.steps.insert(
            "s1".into(),
            serde_json::json!({"outputs": {"text": "hello"}}),
        );
        let result = evaluate("steps.s1.outputs.text", &ctx).unwrap();
        assert_eq!(result.as_str(), Some("hello"));
    }

    #[test]
    fn undefined_path_is_falsy_and_not_equal_to_null() {
        let ctx = TestContext::default();
        let result = evaluate("inputs.missing", &ctx).unwrap();
        assert!(!result.is_truthy());
        let eq = evaluate("inputs.missing == null", &ctx).unwrap();
        assert!(!eq.is_truthy());
    }

    #[test]
    fn render_template_interpolates_and_passes_through_text() {
        let mut ctx = TestContext::default();
        ctx.inputs
            .insert("name".into(), Value::String("Ada".into()));
        let out = render_template("Hello, {{ inputs.name }}!", &ctx).unwrap();
        assert_eq!(out, "Hello, Ada!");
    }

    #[test]
    fn function_call_in_expression() {
        let mut ctx = TestContext::default();
        ctx.inputs
            .insert("name".into(), Value::String("ADA".into()));
        let out = evaluate("lower(inputs.name)", &ctx).unwrap();
        assert_eq!(out.as_str(), Some("ada"));
    }

    #[test]
    fn string_concatenation_with_plus() {
        let ctx = TestContext::default();
        let out = evaluate("'foo' + 'bar'", &ctx).unwrap();
        assert_eq!(out.as_str(), Some("foobar"));
    }

    #[test]
    fn env_lookup() {
        let mut ctx = TestContext::default();
        ctx.env.insert("HOME".into(), "/root".into());
        let out = evaluate("env.HOME", &ctx).unwrap();
        assert_eq!(out.as_str(), Some("/root"));
    }
}
