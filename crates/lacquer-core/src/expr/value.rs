//! The value type produced by expression evaluation.
//!
//! Distinct from [`serde_json::Value`] in one respect: a missing path
//! resolves to an explicit [`EvalValue::Undefined`] rather than JSON
//! `null`, so template rendering and condition evaluation can tell "the
//! key is absent" apart from "the key is present and null".

use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Undefined,
    Json(Value),
}

impl EvalValue {
    pub fn from_option(opt: Option<Value>) -> Self {
        match opt {
            Some(v) => EvalValue::Json(v),
            None => EvalValue::Undefined,
        }
    }

    /// Truthiness per the evaluator's rules: strings are truthy iff
    /// non-empty, numbers truthy iff non-zero, undefined is always false.
    pub fn is_truthy(&self) -> bool {
        match self {
            EvalValue::Undefined => false,
            EvalValue::Json(Value::Null) => false,
            EvalValue::Json(Value::Bool(b)) => *b,
            EvalValue::Json(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            EvalValue::Json(Value::String(s)) => !s.is_empty(),
            EvalValue::Json(Value::Array(a)) => !a.is_empty(),
            EvalValue::Json(Value::Object(o)) => !o.is_empty(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EvalValue::Json(Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EvalValue::Json(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            EvalValue::Undefined => Value::Null,
            EvalValue::Json(v) => v,
        }
    }

    /// Rendering used by template interpolation: undefined and null both
    /// render as an empty string, matching the spec's "missing paths
    /// render as empty" rule.
    pub fn render(&self) -> String {
        match self {
            EvalValue::Undefined => String::new(),
            EvalValue::Json(Value::Null) => String::new(),
            EvalValue::Json(Value::String(s)) => s.clone(),
            EvalValue::Json(Value::Bool(b)) => b.to_string(),
            EvalValue::Json(Value::Number(n)) => n.to_string(),
            EvalValue::Json(v) => v.to_string(),
        }
    }
}

impl fmt::Display for EvalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl From<bool> for EvalValue {
    fn from(b: bool) -> Self {
        EvalValue::Json(Value::Bool(b))
    }
}

impl From<f64> for EvalValue {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n)
            .map(|n| EvalValue::Json(Value::Number(n)))
            .unwrap_or(EvalValue::Undefined)
    }
}

impl From<String> for EvalValue {
    fn from(s: String) -> Self {
        EvalValue::Json(Value::String(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_rules() {
        assert!(!EvalValue::Undefined.is_truthy());
        assert!(!EvalValue::Json(Value::String(String::new())).is_truthy());
        assert!(EvalValue::Json(Value::String("x".into())).is_truthy());
        assert!(!EvalValue::from(0.0).is_truthy());
        assert!(EvalValue::from(1.0).is_truthy());
    }

    #[test]
    fn render_undefined_is_empty() {
        assert_eq!(EvalValue::Undefined.render(), "");
        assert_eq!(EvalValue::Json(Value::Null).render(), "");
    }
}
