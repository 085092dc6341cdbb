//! Typed access to optional fields of dynamic JSON objects.
//!
//! Objects read from the API arrive as untyped JSON. A field can be absent
//! (`Ok(None)`), present with the expected type (`Ok(Some(_))`) or present
//! with some other type (`Err(FieldError::WrongType)`). JSON `null` counts as
//! absent. Nothing here ever falls back to a zero value.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("field '{path}' is {found}, expected {expected}")]
    WrongType {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("required field '{path}' is missing")]
    Missing { path: String },
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn wrong_type(path: &str, expected: &'static str, found: &Value) -> FieldError {
    FieldError::WrongType {
        path: path.to_string(),
        expected,
        found: type_name(found),
    }
}

/// Walk a dotted path (`status.containerStatuses`).
///
/// Stepping through something that is not an object is a type error; a
/// missing segment anywhere yields `Ok(None)`.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Result<Option<&'a Value>, FieldError> {
    let mut current = value;
    let mut walked = String::new();
    for segment in path.split('.') {
        let map = match current {
            Value::Object(map) => map,
            Value::Null => return Ok(None),
            other => {
                let at = if walked.is_empty() { "<root>" } else { walked.as_str() };
                return Err(wrong_type(at, "an object", other));
            }
        };
        if !walked.is_empty() {
            walked.push('.');
        }
        walked.push_str(segment);
        match map.get(segment) {
            Some(Value::Null) | None => return Ok(None),
            Some(next) => current = next,
        }
    }
    Ok(Some(current))
}

pub fn get_str<'a>(value: &'a Value, path: &str) -> Result<Option<&'a str>, FieldError> {
    match lookup(value, path)? {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(wrong_type(path, "a string", other)),
    }
}

pub fn get_bool(value: &Value, path: &str) -> Result<Option<bool>, FieldError> {
    match lookup(value, path)? {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(wrong_type(path, "a bool", other)),
    }
}

pub fn get_u64(value: &Value, path: &str) -> Result<Option<u64>, FieldError> {
    match lookup(value, path)? {
        None => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| wrong_type(path, "a non-negative integer", &Value::Number(n.clone()))),
        Some(other) => Err(wrong_type(path, "a non-negative integer", other)),
    }
}

pub fn get_object<'a>(
    value: &'a Value,
    path: &str,
) -> Result<Option<&'a Map<String, Value>>, FieldError> {
    match lookup(value, path)? {
        None => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(other) => Err(wrong_type(path, "an object", other)),
    }
}

pub fn get_array<'a>(value: &'a Value, path: &str) -> Result<Option<&'a [Value]>, FieldError> {
    match lookup(value, path)? {
        None => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items.as_slice())),
        Some(other) => Err(wrong_type(path, "an array", other)),
    }
}

/// A string field that must be present.
pub fn require_str<'a>(value: &'a Value, path: &str) -> Result<&'a str, FieldError> {
    get_str(value, path)?.ok_or_else(|| FieldError::Missing {
        path: path.to_string(),
    })
}

/// A `string -> string` map such as labels or annotations. Absent is empty.
pub fn get_string_map(value: &Value, path: &str) -> Result<BTreeMap<String, String>, FieldError> {
    let Some(map) = get_object(value, path)? else {
        return Ok(BTreeMap::new());
    };
    map.iter()
        .map(|(k, v)| match v {
            Value::String(s) => Ok((k.clone(), s.clone())),
            other => Err(wrong_type(&format!("{}.{}", path, k), "a string", other)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_and_null_are_none() {
        let v = json!({"status": {"phase": null}});
        assert_eq!(get_str(&v, "status.phase"), Ok(None));
        assert_eq!(get_str(&v, "status.reason"), Ok(None));
        assert_eq!(get_str(&v, "spec.replicas"), Ok(None));
    }

    #[test]
    fn wrong_type_is_an_error() {
        let v = json!({"status": {"containerStatuses": "oops", "ready": "true"}});
        let err = get_array(&v, "status.containerStatuses").unwrap_err();
        assert_eq!(
            err,
            FieldError::WrongType {
                path: "status.containerStatuses".to_string(),
                expected: "an array",
                found: "a string",
            }
        );
        assert!(get_bool(&v, "status.ready").is_err());
    }

    #[test]
    fn stepping_through_a_scalar_fails() {
        let v = json!({"status": 3});
        let err = get_str(&v, "status.phase").unwrap_err();
        assert!(err.to_string().contains("'status'"));
    }

    #[test]
    fn typed_values_are_returned() {
        let v = json!({
            "metadata": {"name": "app", "labels": {"tier": "web"}},
            "status": {"numberAvailable": 3, "ready": true}
        });
        assert_eq!(require_str(&v, "metadata.name"), Ok("app"));
        assert_eq!(get_u64(&v, "status.numberAvailable"), Ok(Some(3)));
        assert_eq!(get_bool(&v, "status.ready"), Ok(Some(true)));
        let labels = get_string_map(&v, "metadata.labels").unwrap();
        assert_eq!(labels.get("tier").map(String::as_str), Some("web"));
        assert!(get_string_map(&v, "metadata.annotations").unwrap().is_empty());
    }

    #[test]
    fn missing_required_field() {
        let v = json!({"metadata": {}});
        assert_eq!(
            require_str(&v, "metadata.name"),
            Err(FieldError::Missing {
                path: "metadata.name".to_string()
            })
        );
    }

    #[test]
    fn negative_number_is_not_a_count() {
        let v = json!({"status": {"numberReady": -1}});
        assert!(get_u64(&v, "status.numberReady").is_err());
    }
}
