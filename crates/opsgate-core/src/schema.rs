//! JSON Schema validation of tool arguments.
//!
//! Schemas are vetted and compiled once at policy load; arguments are
//! checked against the compiled validator on every call. Draft 2020-12
//! semantics throughout.

use jsonschema::Draft;
use serde_json::Value;

use crate::errors::SchemaError;

/// Maximum nesting depth allowed in a schema or argument object.
pub const MAX_DEPTH: usize = 20;
/// Maximum number of properties in a single object.
pub const MAX_OBJECT_KEYS: usize = 100;
/// Maximum number of entries in a single array.
pub const MAX_ARRAY_ITEMS: usize = 50;
/// Maximum number of nodes overall.
pub const MAX_NODES: usize = 1000;

/// Reject schemas complex enough to be a denial-of-service vector.
///
/// The same bounds apply to caller-supplied argument objects as a
/// defense-in-depth check at the HTTP bridge.
pub fn check_complexity(value: &Value, tool: &str) -> Result<(), SchemaError> {
    let mut nodes = 0usize;
    count_nodes(value, 0, &mut nodes, tool)?;
    if nodes > MAX_NODES {
        return Err(SchemaError::new(
            tool,
            format!("schema too complex: {} nodes (limit {})", nodes, MAX_NODES),
        ));
    }
    Ok(())
}

fn count_nodes(
    value: &Value,
    depth: usize,
    nodes: &mut usize,
    tool: &str,
) -> Result<(), SchemaError> {
    if depth > MAX_DEPTH {
        return Err(SchemaError::new(
            tool,
            format!("schema too deeply nested (limit {})", MAX_DEPTH),
        ));
    }
    *nodes += 1;
    match value {
        Value::Object(map) => {
            if map.len() > MAX_OBJECT_KEYS {
                return Err(SchemaError::new(
                    tool,
                    format!(
                        "object has {} properties (limit {})",
                        map.len(),
                        MAX_OBJECT_KEYS
                    ),
                ));
            }
            for v in map.values() {
                count_nodes(v, depth + 1, nodes, tool)?;
            }
        }
        Value::Array(items) => {
            if items.len() > MAX_ARRAY_ITEMS {
                return Err(SchemaError::new(
                    tool,
                    format!("array has {} items (limit {})", items.len(), MAX_ARRAY_ITEMS),
                ));
            }
            for v in items {
                count_nodes(v, depth + 1, nodes, tool)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Vet complexity and compile a tool's declared schema.
pub fn compile(schema: &Value, tool: &str) -> Result<jsonschema::Validator, SchemaError> {
    check_complexity(schema, tool)?;
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|e| SchemaError::new(tool, format!("invalid JSON schema: {e}")))
}

/// Validate an argument object against a compiled schema.
///
/// On failure the error message joins one sentence per violation, each
/// naming the offending field path (dot-separated, `root` when empty).
pub fn validate_args(
    validator: &jsonschema::Validator,
    args: &Value,
    tool: &str,
) -> Result<(), SchemaError> {
    let mut messages = Vec::new();
    for error in validator.iter_errors(args) {
        messages.push(format_violation(&error));
    }
    if messages.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::new(
            tool,
            format!(
                "Tool '{}' argument validation failed: {}",
                tool,
                messages.join("; ")
            ),
        ))
    }
}

fn format_violation(error: &jsonschema::ValidationError<'_>) -> String {
    let pointer = error.instance_path().to_string();
    let field_path = if pointer.is_empty() {
        "root".to_string()
    } else {
        pointer.trim_start_matches('/').replace('/', ".")
    };
    let message = error.to_string();

    if message.contains("is a required property") {
        let missing = message.split('"').nth(1).unwrap_or("unknown");
        format!("Missing required field: {missing}")
    } else if message.contains("is not of type") {
        format!("Field '{field_path}' has invalid type: {message}")
    } else if message.contains("does not match") {
        format!("Field '{field_path}' does not match required pattern: {message}")
    } else if message.contains("has less than") || message.contains("fewer than") {
        format!("Field '{field_path}' has too few items: {message}")
    } else if message.contains("longer than") {
        format!("Field '{field_path}' exceeds maximum length: {message}")
    } else if message.contains("Additional properties") {
        format!("Field '{field_path}' contains unexpected properties: {message}")
    } else {
        format!("Field '{field_path}': {message}")
    }
}
