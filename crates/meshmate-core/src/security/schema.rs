//! Structural argument checks against a tool's JSON input schema.
//!
//! Covers the subset of JSON Schema that tool servers use in practice:
//! `type`, `enum`, `required`, `properties`, `additionalProperties`, `items`
//! and `anyOf`/`oneOf`. Unknown keywords are ignored.

use serde_json::{Map, Value};

/// Validate `value` against `schema`. The error names the offending path.
pub fn check(schema: &Value, value: &Value) -> Result<(), String> {
    check_at(schema, value, "arguments")
}

fn check_at(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(branches) = schema
        .get("anyOf")
        .or_else(|| schema.get("oneOf"))
        .and_then(Value::as_array)
    {
        if !branches.is_empty() && !branches.iter().any(|b| check_at(b, value, path).is_ok()) {
            return Err(format!("{path} matches none of the allowed shapes"));
        }
    }

    if let Some(expected) = schema.get("type") {
        if !type_matches(expected, value) {
            return Err(format!(
                "{path} should be {}, got {}",
                describe_type(expected),
                json_type_name(value)
            ));
        }
    }

    if let Some(options) = schema.get("enum").and_then(Value::as_array) {
        if !options.contains(value) {
            return Err(format!("{path} must be one of {}", Value::Array(options.clone())));
        }
    }

    match value {
        Value::Object(fields) => check_object(schema, fields, path),
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (index, item) in items.iter().enumerate() {
                    check_at(item_schema, item, &format!("{path}[{index}]"))?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_object(
    schema: &Map<String, Value>,
    fields: &Map<String, Value>,
    path: &str,
) -> Result<(), String> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !fields.contains_key(key) {
                return Err(format!("{path} is missing required field '{key}'"));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    for (key, field) in fields {
        let field_path = format!("{path}.{key}");
        match properties.and_then(|p| p.get(key)) {
            Some(field_schema) => check_at(field_schema, field, &field_path)?,
            None => match schema.get("additionalProperties") {
                Some(Value::Bool(false)) => {
                    return Err(format!("{path} has unexpected field '{key}'"));
                }
                Some(extra @ Value::Object(_)) => check_at(extra, field, &field_path)?,
                _ => {}
            },
        }
    }
    Ok(())
}

fn type_matches(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => single_type_matches(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| single_type_matches(name, value)),
        _ => true,
    }
}

fn single_type_matches(name: &str, value: &Value) -> bool {
    match name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        // Unknown type names are not ours to reject.
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        other => other.to_string(),
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
