//! Input validation run before every executor dispatch (spec.md §4.4):
//! required inputs present, declared types checked structurally, enum
//! values checked by equality, defaults applied for absent optional
//! inputs.

use lacquer_core::error::{LacquerError, Result};
use lacquer_core::workflow::{InputDef, InputType};
use serde_json::Value;
use std::collections::HashMap;

pub fn validate_and_apply_defaults(
    schema: &HashMap<String, InputDef>,
    provided: &HashMap<String, Value>,
) -> Result<HashMap<String, Value>> {
    let mut bound = HashMap::with_capacity(schema.len());

    for (name, def) in schema {
        match provided.get(name) {
            Some(value) => {
                check_type(name, def.ty, value)?;
                check_enum(name, def, value)?;
                check_range(name, def, value)?;
                bound.insert(name.clone(), value.clone());
            }
            None => {
                if def.required {
                    return Err(LacquerError::ValidationError {
                        message: format!("missing required input '{name}'"),
                    });
                }
                if let Some(default) = &def.default {
                    bound.insert(name.clone(), default.clone());
                }
            }
        }
    }

    Ok(bound)
}

fn check_type(name: &str, ty: InputType, value: &Value) -> Result<()> {
    let matches = match ty {
        InputType::String => value.is_string(),
        InputType::Number => value.is_number(),
        InputType::Integer => value.is_i64() || value.is_u64(),
        InputType::Boolean => value.is_boolean(),
        InputType::Array => value.is_array(),
        InputType::Object => value.is_object(),
    };
    if !matches {
        return Err(LacquerError::ValidationError {
            message: format!("input '{name}' expected type {ty:?}, got {value}"),
        });
    }
    Ok(())
}

fn check_enum(name: &str, def: &InputDef, value: &Value) -> Result<()> {
    if let Some(allowed) = &def.enum_values {
        if !allowed.contains(value) {
            return Err(LacquerError::ValidationError {
                message: format!("input '{name}' value {value} is not one of the declared enum values"),
            });
        }
    }
    Ok(())
}

/// Checks `min`/`max` for numeric/integer inputs. No-op for other types,
/// and for numeric types when neither bound is declared.
fn check_range(name: &str, def: &InputDef, value: &Value) -> Result<()> {
    if def.min.is_none() && def.max.is_none() {
        return Ok(());
    }
    let Some(n) = value.as_f64() else {
        return Ok(());
    };
    if let Some(min) = def.min {
        if n < min {
            return Err(LacquerError::ValidationError {
                message: format!("input '{name}' value {n} is below the declared minimum {min}"),
            });
        }
    }
    if let Some(max) = def.max {
        if n > max {
            return Err(LacquerError::ValidationError {
                message: format!("input '{name}' value {n} is above the declared maximum {max}"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> HashMap<String, InputDef> {
        HashMap::from([
            (
                "a".to_string(),
                InputDef {
                    ty: InputType::Number,
                    required: true,
                    default: None,
                    enum_values: None,
                    min: None,
                    max: None,
                },
            ),
            (
                "mode".to_string(),
                InputDef {
                    ty: InputType::String,
                    required: false,
                    default: Some(json!("fast")),
                    enum_values: Some(vec![json!("fast"), json!("slow")]),
                    min: None,
                    max: None,
                },
            ),
        ])
    }

    fn ranged_schema() -> HashMap<String, InputDef> {
        HashMap::from([(
            "pct".to_string(),
            InputDef {
                ty: InputType::Integer,
                required: true,
                default: None,
                enum_values: None,
                min: Some(0.0),
                max: Some(100.0),
            },
        )])
    }

    #[test]
    fn value_below_min_rejected() {
        let provided = HashMap::from([("pct".to_string(), json!(-1))]);
        let err = validate_and_apply_defaults(&ranged_schema(), &provided).unwrap_err();
        assert!(matches!(err, LacquerError::ValidationError { .. }));
    }

    #[test]
    fn value_above_max_rejected() {
        let provided = HashMap::from([("pct".to_string(), json!(101))]);
        let err = validate_and_apply_defaults(&ranged_schema(), &provided).unwrap_err();
        assert!(matches!(err, LacquerError::ValidationError { .. }));
    }

    #[test]
    fn value_within_range_accepted() {
        let provided = HashMap::from([("pct".to_string(), json!(50))]);
        let bound = validate_and_apply_defaults(&ranged_schema(), &provided).unwrap();
        assert_eq!(bound.get("pct"), Some(&json!(50)));
    }

    #[test]
    fn missing_required_input_rejected() {
        let err = validate_and_apply_defaults(&schema(), &HashMap::new()).unwrap_err();
        assert!(matches!(err, LacquerError::ValidationError { .. }));
    }

    #[test]
    fn wrong_type_rejected() {
        let provided = HashMap::from([("a".to_string(), json!("not a number"))]);
        let err = validate_and_apply_defaults(&schema(), &provided).unwrap_err();
        assert!(matches!(err, LacquerError::ValidationError { .. }));
    }

    #[test]
    fn value_outside_enum_rejected() {
        let provided = HashMap::from([
            ("a".to_string(), json!(1)),
            ("mode".to_string(), json!("turbo")),
        ]);
        let err = validate_and_apply_defaults(&schema(), &provided).unwrap_err();
        assert!(matches!(err, LacquerError::ValidationError { .. }));
    }

    #[test]
    fn default_applied_for_absent_optional_input() {
        let provided = HashMap::from([("a".to_string(), json!(1))]);
        let bound = validate_and_apply_defaults(&schema(), &provided).unwrap();
        assert_eq!(bound.get("mode"), Some(&json!("fast")));
    }
}
