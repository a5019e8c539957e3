//! Read-only registry of validated tools.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use super::ToolDefinition;
use crate::errors::SchemaError;
use crate::schema;

/// A tool definition together with its compiled argument validator.
#[derive(Debug)]
pub struct ToolEntry {
    pub def: ToolDefinition,
    validator: jsonschema::Validator,
}

impl ToolEntry {
    pub fn validate_args(&self, args: &Value) -> Result<(), SchemaError> {
        schema::validate_args(&self.validator, args, &self.def.name)
    }
}

/// Immutable map of tool name to entry. Iteration order is the stable
/// name order, which `list_tools` relies on.
#[derive(Debug)]
pub struct ToolRegistry {
    entries: BTreeMap<String, ToolEntry>,
}

impl ToolRegistry {
    /// Compile every schema and build the registry. Any schema failure
    /// aborts the build, and with it the policy load.
    pub fn build(definitions: Vec<ToolDefinition>) -> Result<Self, SchemaError> {
        let mut entries = BTreeMap::new();
        for def in definitions {
            let validator = schema::compile(&def.args_schema, &def.name)?;
            entries.insert(def.name.clone(), ToolEntry { def, validator });
        }
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tool metadata in the `list_tools` wire shape.
    pub fn metadata(&self) -> Vec<Value> {
        self.entries
            .values()
            .map(|entry| {
                let schema = &entry.def.args_schema;
                json!({
                    "name": entry.def.name,
                    "description": entry.def.description,
                    "inputSchema": {
                        "type": "object",
                        "properties": schema.get("properties").cloned().unwrap_or_else(|| json!({})),
                        "required": schema.get("required").cloned().unwrap_or_else(|| json!([])),
                        "additionalProperties": schema
                            .get("additionalProperties")
                            .cloned()
                            .unwrap_or(Value::Bool(false)),
                    },
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: format!("{name} tool"),
            args_schema: json!({
                "type": "object",
                "properties": {"arg": {"type": "string"}},
                "required": [],
                "additionalProperties": false
            }),
            command: vec!["true".to_string()],
            mutates: false,
            requires_confirm: false,
            timeout_sec: 5,
            notify: Vec::new(),
        }
    }

    #[test]
    fn lookup_and_stable_ordering() {
        let registry = ToolRegistry::build(vec![tool("zeta"), tool("alpha")]).unwrap();
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);

        let meta = registry.metadata();
        assert_eq!(meta[0]["name"], "alpha");
        assert_eq!(meta[0]["inputSchema"]["type"], "object");
        assert_eq!(meta[0]["inputSchema"]["additionalProperties"], false);
    }

    #[test]
    fn args_validation_uses_compiled_schema() {
        let registry = ToolRegistry::build(vec![tool("t")]).unwrap();
        let entry = registry.get("t").unwrap();
        assert!(entry.validate_args(&json!({"arg": "ok"})).is_ok());
        assert!(entry.validate_args(&json!({"arg": 1})).is_err());
    }

    #[test]
    fn invalid_schema_aborts_build() {
        let mut bad = tool("bad");
        bad.args_schema = json!({"type": "nope"});
        assert!(ToolRegistry::build(vec![bad]).is_err());
    }
}
