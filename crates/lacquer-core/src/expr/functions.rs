//! The fixed function registry. There is no way for a workflow author to
//! define a new function; this list is it.

use super::value::EvalValue;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FunctionError {
    #[error("unknown function '{0}'")]
    Unknown(String),
    #[error("function '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: &'static str,
        got: usize,
    },
    #[error("function '{name}' cannot operate on the given argument type")]
    BadType { name: String },
}

type FunctionImpl = fn(&str, &[EvalValue]) -> Result<EvalValue, FunctionError>;

static REGISTRY: Lazy<HashMap<&'static str, FunctionImpl>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, FunctionImpl> = HashMap::new();
    m.insert("len", len);
    m.insert("lower", lower);
    m.insert("upper", upper);
    m.insert("contains", contains);
    m.insert("default", default);
    m.insert("string", string);
    m.insert("number", number);
    m.insert("bool", boolean);
    m
});

pub fn call(name: &str, args: &[EvalValue]) -> Result<EvalValue, FunctionError> {
    match REGISTRY.get(name) {
        Some(f) => f(name, args),
        None => Err(FunctionError::Unknown(name.to_string())),
    }
}

fn arity(name: &str, args: &[EvalValue], expected: usize) -> Result<(), FunctionError> {
    if args.len() != expected {
        return Err(FunctionError::Arity {
            name: name.to_string(),
            expected: match expected {
                1 => "1",
                2 => "2",
                _ => "?",
            },
            got: args.len(),
        });
    }
    Ok(())
}

fn len(name: &str, args: &[EvalValue]) -> Result<EvalValue, FunctionError> {
    arity(name, args, 1)?;
    let n = match &args[0] {
        EvalValue::Json(Value::String(s)) => s.chars().count(),
        EvalValue::Json(Value::Array(a)) => a.len(),
        EvalValue::Json(Value::Object(o)) => o.len(),
        EvalValue::Undefined => 0,
        _ => {
            return Err(FunctionError::BadType {
                name: name.to_string(),
            })
        }
    };
    Ok(EvalValue::from(n as f64))
}

fn lower(name: &str, args: &[EvalValue]) -> Result<EvalValue, FunctionError> {
    arity(name, args, 1)?;
    match args[0].as_str() {
        Some(s) => Ok(EvalValue::from(s.to_lowercase())),
        None => Err(FunctionError::BadType {
            name: name.to_string(),
        }),
    }
}

fn upper(name: &str, args: &[EvalValue]) -> Result<EvalValue, FunctionError> {
    arity(name, args, 1)?;
    match args[0].as_str() {
        Some(s) => Ok(EvalValue::from(s.to_uppercase())),
        None => Err(FunctionError::BadType {
            name: name.to_string(),
        }),
    }
}

fn contains(name: &str, args: &[EvalValue]) -> Result<EvalValue, FunctionError> {
    arity(name, args, 2)?;
    match (&args[0], &args[1]) {
        (EvalValue::Json(Value::String(haystack)), EvalValue::Json(Value::String(needle))) => {
            Ok(EvalValue::from(haystack.contains(needle.as_str())))
        }
        (EvalValue::Json(Value::Array(items)), needle) => {
            let needle_json = needle.clone().into_json();
            Ok(EvalValue::from(items.iter().any(|v| v == &needle_json)))
        }
        _ => Err(FunctionError::BadType {
            name: name.to_string(),
        }),
    }
}

/// `default(value, fallback)`: returns `value` unless it is undefined or
/// JSON null, in which case it returns `fallback`.
fn default(name: &str, args: &[EvalValue]) -> Result<EvalValue, FunctionError> {
    arity(name, args, 2)?;
    match &args[0] {
        EvalValue::Undefined | EvalValue::Json(Value::Null) => Ok(args[1].clone()),
        v => Ok(v.clone()),
    }
}

fn string(name: &str, args: &[EvalValue]) -> Result<EvalValue, FunctionError> {
    arity(name, args, 1)?;
    Ok(EvalValue::from(args[0].render()))
}

fn number(name: &str, args: &[EvalValue]) -> Result<EvalValue, FunctionError> {
    arity(name, args, 1)?;
    match &args[0] {
        EvalValue::Json(Value::Number(n)) => Ok(EvalValue::from(n.as_f64().unwrap_or(0.0))),
        EvalValue::Json(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(EvalValue::from)
            .map_err(|_| FunctionError::BadType {
                name: name.to_string(),
            }),
        EvalValue::Json(Value::Bool(b)) => Ok(EvalValue::from(if *b { 1.0 } else { 0.0 })),
        _ => Err(FunctionError::BadType {
            name: name.to_string(),
        }),
    }
}

fn boolean(name: &str, args: &[EvalValue]) -> Result<EvalValue, FunctionError> {
    arity(name, args, 1)?;
    let _ = name;
    Ok(EvalValue::from(args[0].is_truthy()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_over_string_and_array() {
        let s = EvalValue::from("hello".to_string());
        assert_eq!(call("len", &[s]).unwrap().as_f64(), Some(5.0));

        let arr = EvalValue::Json(Value::Array(vec![Value::Null, Value::Null]));
        assert_eq!(call("len", &[arr]).unwrap().as_f64(), Some(2.0));
    }

    #[test]
    fn default_falls_back_on_undefined_and_null() {
        let fallback = EvalValue::from("fallback".to_string());
        assert_eq!(
            call("default", &[EvalValue::Undefined, fallback.clone()]).unwrap(),
            fallback
        );
        assert_eq!(
            call(
                "default",
                &[EvalValue::Json(Value::Null), fallback.clone()]
            )
            .unwrap(),
            fallback
        );
        let present = EvalValue::from("present".to_string());
        assert_eq!(
            call("default", &[present.clone(), fallback]).unwrap(),
            present
        );
    }

    #[test]
    fn contains_substring_and_array_membership() {
        let haystack = EvalValue::from("hello world".to_string());
        let needle = EvalValue::from("world".to_string());
        assert_eq!(
            call("contains", &[haystack, needle]).unwrap().is_truthy(),
            true
        );
    }

    #[test]
    fn unknown_function_errors() {
        let err = call("does_not_exist", &[]).unwrap_err();
        assert_eq!(err, FunctionError::Unknown("does_not_exist".to_string()));
    }

    #[test]
    fn arity_mismatch_errors() {
        let err = call("len", &[]).unwrap_err();
        assert!(matches!(err, FunctionError::Arity { .. }));
    }

    #[test_case::test_case("len", 1; "len takes one arg")]
    #[test_case::test_case("lower", 1; "lower takes one arg")]
    #[test_case::test_case("upper", 1; "upper takes one arg")]
    #[test_case::test_case("contains", 2; "contains takes two args")]
    #[test_case::test_case("default", 2; "default takes two args")]
    #[test_case::test_case("string", 1; "string takes one arg")]
    #[test_case::test_case("number", 1; "number takes one arg")]
    #[test_case::test_case("bool", 1; "bool takes one arg")]
    fn too_few_arguments_is_an_arity_error(name: &str, expected: usize) {
        let args: Vec<EvalValue> = std::iter::repeat(EvalValue::from(1.0)).take(expected - 1).collect();
        let err = call(name, &args).unwrap_err();
        assert!(matches!(err, FunctionError::Arity { .. }), "{name} should reject {} args", args.len());
    }

    #[test_case::test_case("hello", "HELLO"; "ascii lowercase")]
    #[test_case::test_case("MiXeD", "MIXED"; "mixed case")]
    #[test_case::test_case("", ""; "empty string")]
    fn upper_matches_std_to_uppercase(input: &str, expected: &str) {
        let out = call("upper", &[EvalValue::from(input.to_string())]).unwrap();
        assert_eq!(out.as_str(), Some(expected));
    }
}
