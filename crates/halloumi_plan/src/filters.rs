//! Built-in property filters.
//!
//! Environment overrides always arrive as strings; these coerce them (and
//! block results) into the shape a property expects.

use crate::declaration::Filter;
use halloumi_core::Value;
use std::sync::Arc;

/// Split a comma-separated string into a list of trimmed, non-empty strings.
/// Lists pass through unchanged.
#[must_use]
pub fn string_to_array() -> Filter {
    Arc::new(|value: Value| match value {
        Value::String(s) => Ok(Value::list(
            s.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>(),
        )),
        Value::List(items) => Ok(Value::List(items)),
        other => Err(format!("expected a comma-separated string, got {:?}", other)),
    })
}

/// Coerce integers, whole floats, and numeric strings into an integer
#[must_use]
pub fn to_integer() -> Filter {
    Arc::new(|value: Value| match value {
        Value::Integer(i) => Ok(Value::Integer(i)),
        Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(Value::Integer(f as i64)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| format!("'{}' is not an integer", s)),
        other => Err(format!("expected an integer, got {:?}", other)),
    })
}

/// Coerce booleans, `0`/`1`, and `true`/`false`/`yes`/`no` strings into a boolean
#[must_use]
pub fn to_boolean() -> Filter {
    Arc::new(|value: Value| match value {
        Value::Bool(b) => Ok(Value::Bool(b)),
        Value::Integer(0) => Ok(Value::Bool(false)),
        Value::Integer(1) => Ok(Value::Bool(true)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "0" => Ok(Value::Bool(false)),
            _ => Err(format!("'{}' is not a boolean", s)),
        },
        other => Err(format!("expected a boolean, got {:?}", other)),
    })
}
