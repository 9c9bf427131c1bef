//! JSON schema helpers
//!
//! Argument validation covers the subset of JSON Schema that tool
//! declarations actually use: required keys, primitive types, enums and
//! closed objects. Anything more exotic is left to the tool itself.

use serde_json::{Map, Value};

use crate::conversation::Arguments;

/// Validate call arguments against a tool's input schema
pub fn validate_arguments(schema: &Value, args: &Arguments) -> Result<(), String> {
    let Some(obj) = schema.as_object() else {
        return Ok(());
    };

    let empty = Map::new();
    let properties = obj
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    if let Some(required) = obj.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            match args.get(key) {
                None => return Err(format!("missing required argument '{}'", key)),
                // null only satisfies a required key when the schema allows it
                Some(Value::Null) if !allows_null(properties.get(key)) => {
                    return Err(format!("missing required argument '{}'", key));
                }
                _ => {}
            }
        }
    }

    let closed = obj.get("additionalProperties") == Some(&Value::Bool(false));

    for (key, value) in args {
        match properties.get(key) {
            Some(prop) => check_value(key, prop, value)?,
            None if closed => return Err(format!("unexpected argument '{}'", key)),
            None => {}
        }
    }

    Ok(())
}

fn check_value(key: &str, prop: &Value, value: &Value) -> Result<(), String> {
    if let Some(types) = declared_types(prop) {
        if !types.iter().any(|t| type_matches(t, value)) {
            return Err(format!(
                "argument '{}' should be {}, got {}",
                key,
                types.join(" or "),
                type_name(value)
            ));
        }
    }

    if let Some(options) = prop.get("enum").and_then(Value::as_array) {
        if !value.is_null() && !options.contains(value) {
            let allowed: Vec<String> = options.iter().map(Value::to_string).collect();
            return Err(format!(
                "argument '{}' must be one of [{}], got {}",
                key,
                allowed.join(", "),
                value
            ));
        }
    }

    Ok(())
}

/// Declared `type` of a property, flattening `anyOf`/`oneOf` of simple types
fn declared_types(prop: &Value) -> Option<Vec<String>> {
    match prop.get("type") {
        Some(Value::String(t)) => return Some(vec![t.clone()]),
        Some(Value::Array(ts)) => {
            return Some(ts.iter().filter_map(Value::as_str).map(String::from).collect())
        }
        _ => {}
    }

    let variants = prop
        .get("anyOf")
        .or_else(|| prop.get("oneOf"))
        .and_then(Value::as_array)?;
    let mut types = Vec::new();
    for variant in variants {
        // a variant without a plain type (e.g. a $ref) disables the check
        types.extend(declared_types(variant)?);
    }
    Some(types)
}

fn allows_null(prop: Option<&Value>) -> bool {
    prop.and_then(declared_types)
        .map(|types| types.iter().any(|t| t == "null"))
        .unwrap_or(false)
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Clean up a JSON schema for provider function declarations
///
/// Removes `$schema`, `title` and `additionalProperties`, and collapses
/// `["T", "null"]` type arrays to `"T"` since several providers reject type
/// arrays.
pub fn clean_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(obj) => {
            let mut cleaned = Map::new();
            for (key, value) in obj {
                match key.as_str() {
                    "$schema" | "title" | "additionalProperties" => {}
                    "type" => {
                        cleaned.insert(key.clone(), collapse_nullable(value));
                    }
                    // keys of `properties` are argument names, not schema keywords
                    "properties" => {
                        let props = match value {
                            Value::Object(props) => Value::Object(
                                props
                                    .iter()
                                    .map(|(name, prop)| (name.clone(), clean_schema(prop)))
                                    .collect(),
                            ),
                            other => other.clone(),
                        };
                        cleaned.insert(key.clone(), props);
                    }
                    _ => {
                        cleaned.insert(key.clone(), clean_schema(value));
                    }
                }
            }
            Value::Object(cleaned)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(clean_schema).collect()),
        other => other.clone(),
    }
}

fn collapse_nullable(ty: &Value) -> Value {
    match ty {
        Value::Array(types) => {
            let non_null: Vec<&Value> = types.iter().filter(|t| t.as_str() != Some("null")).collect();
            match non_null.as_slice() {
                [single] => (*single).clone(),
                _ => ty.clone(),
            }
        }
        other => other.clone(),
    }
}

/// Schema used when a remote tool declares none
pub fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}
