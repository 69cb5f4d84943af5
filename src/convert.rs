//! Conversion of sandbox output values into JSON.
//!
//! The reasoning pipeline around the sandbox transports results as JSON, so
//! the opaque Python value bound to the output variable gets a structural
//! rendering here. Anything without a natural JSON shape falls back to its
//! `repr`.

use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyFloat, PyList, PyLong, PyString, PyTuple};
use serde_json::Value;

/// Containers nested past this depth (including self-referential ones)
/// bottom out as their `repr`, which the interpreter renders cycle-safely.
const MAX_DEPTH: usize = 32;

/// Render a Python value as JSON. Never fails: unconvertible values become
/// their `repr` string, and a failing `repr` becomes null.
pub fn value_to_json(value: &Bound<'_, PyAny>) -> Value {
    render(value, 0)
}

fn render(value: &Bound<'_, PyAny>, depth: usize) -> Value {
    if depth >= MAX_DEPTH {
        return repr_or_null(value);
    }
    if value.is_none() {
        return Value::Null;
    }
    // bool subclasses int, so it must be checked first.
    if value.is_instance_of::<PyBool>() {
        if let Ok(b) = value.extract::<bool>() {
            return Value::Bool(b);
        }
    }
    if value.is_instance_of::<PyLong>() {
        if let Ok(i) = value.extract::<i64>() {
            return Value::from(i);
        }
    }
    if value.is_instance_of::<PyFloat>() {
        if let Ok(f) = value.extract::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    if let Ok(s) = value.downcast::<PyString>() {
        return Value::String(s.to_string_lossy().into_owned());
    }
    if let Ok(list) = value.downcast::<PyList>() {
        return Value::Array(list.iter().map(|item| render(&item, depth + 1)).collect());
    }
    if let Ok(tuple) = value.downcast::<PyTuple>() {
        return Value::Array(tuple.iter().map(|item| render(&item, depth + 1)).collect());
    }
    if let Ok(dict) = value.downcast::<PyDict>() {
        let mut map = serde_json::Map::new();
        for (key, item) in dict.iter() {
            let key = key
                .str()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            map.insert(key, render(&item, depth + 1));
        }
        return Value::Object(map);
    }

    repr_or_null(value)
}

fn repr_or_null(value: &Bound<'_, PyAny>) -> Value {
    match value.repr() {
        Ok(repr) => Value::String(repr.to_string_lossy().into_owned()),
        Err(_) => Value::Null,
    }
}
