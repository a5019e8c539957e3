//! Policy loading and per-tool validation.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::dir_loader::{extract_tools, merge_tools, overlay_files, InvalidEntry};
use super::registry::ToolRegistry;
use super::{LoadSummary, NotifyEvent, PolicyConfig, ToolDefinition};
use crate::config::{RuntimeConfig, DEFAULT_POLICY_FILE};
use crate::errors::PolicyError;

/// Maximum accepted policy file size.
const MAX_POLICY_BYTES: u64 = 1024 * 1024;
/// Hard ceiling on per-tool timeouts.
const MAX_TIMEOUT_SEC: u64 = 300;

fn tool_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[A-Za-z0-9_]+$").expect("static pattern"))
}

/// Everything a successful load produces.
#[derive(Debug)]
pub struct PolicyLoad {
    pub registry: ToolRegistry,
    pub config: PolicyConfig,
    pub summary: LoadSummary,
}

pub struct PolicyLoader {
    policy_file: PathBuf,
    policy_dir: PathBuf,
}

impl PolicyLoader {
    pub fn new(policy_file: impl Into<PathBuf>, policy_dir: impl Into<PathBuf>) -> Self {
        Self {
            policy_file: policy_file.into(),
            policy_dir: policy_dir.into(),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(&config.policy_file, &config.policy_dir)
    }

    /// Load, merge and validate the policy sources.
    ///
    /// The base file must parse (a missing base is tolerated when an
    /// overlay directory exists); overlay files that fail to parse are
    /// skipped individually with a warning. Any invalid schema aborts
    /// the load.
    pub fn load(&self, runtime: &RuntimeConfig) -> Result<PolicyLoad, PolicyError> {
        let mut invalid: Vec<InvalidEntry> = Vec::new();

        let base_data = self.read_base_file()?;
        let base_tools = match &base_data {
            Some(data) => {
                validate_structure(data)?;
                extract_tools(data, "POLICY_FILE", &mut invalid)
            }
            None => Vec::new(),
        };
        let tools_from_file = base_tools.len();

        let overlays = overlay_files(&self.policy_dir);
        let overlay_files_scanned = overlays.len();
        let mut overlay_tools = Vec::new();
        for path in &overlays {
            let source = path.display().to_string();
            match read_yaml(path) {
                Ok(data) => overlay_tools.extend(extract_tools(&data, &source, &mut invalid)),
                Err(reason) => {
                    tracing::warn!(file = %source, %reason, "skipping invalid overlay policy file");
                    invalid.push(InvalidEntry { source, reason });
                }
            }
        }
        let overlay_tool_count = overlay_tools.len();

        let merged = merge_tools(base_tools, overlay_tools);

        let mut definitions = Vec::new();
        let mut disabled = 0usize;
        for (name, raw) in merged {
            if raw.value.get("enabled").and_then(Value::as_bool) == Some(false) {
                tracing::info!(tool = %name, "tool disabled via policy");
                disabled += 1;
                continue;
            }
            let def = validate_tool_definition(&name, &raw.value)
                .map_err(PolicyError::Validation)?;
            definitions.push(def);
        }

        let enabled = definitions.len();
        let registry = ToolRegistry::build(definitions)
            .map_err(|e| PolicyError::Validation(e.to_string()))?;

        let config_section = base_data
            .as_ref()
            .and_then(|d| d.get("config").cloned())
            .unwrap_or(Value::Null);
        let config = PolicyConfig::resolve(&config_section, runtime);

        let summary = LoadSummary {
            tools_from_file,
            overlay_files_scanned,
            overlay_tools: overlay_tool_count,
            enabled,
            disabled,
            invalid,
        };
        tracing::info!(
            tools_from_file = summary.tools_from_file,
            overlay_files_scanned = summary.overlay_files_scanned,
            overlay_tools = summary.overlay_tools,
            enabled = summary.enabled,
            disabled = summary.disabled,
            invalid = summary.invalid.len(),
            "policy loaded"
        );

        Ok(PolicyLoad {
            registry,
            config,
            summary,
        })
    }

    /// Read the base policy file, enforcing the path allowlist and size cap.
    ///
    /// Returns `None` when the file does not exist (overlay-only setups).
    fn read_base_file(&self) -> Result<Option<Value>, PolicyError> {
        let canonical = match std::fs::canonicalize(&self.policy_file) {
            Ok(p) => p,
            Err(_) => {
                tracing::info!(
                    file = %self.policy_file.display(),
                    "policy file not found, continuing with overlay directory only"
                );
                return Ok(None);
            }
        };

        if !self.path_allowed(&canonical) {
            return Err(PolicyError::Load(
                "policy file path not allowed - potential path traversal".to_string(),
            ));
        }

        let size = std::fs::metadata(&canonical)
            .map_err(|e| PolicyError::Load(format!("cannot stat policy file: {e}")))?
            .len();
        if size > MAX_POLICY_BYTES {
            return Err(PolicyError::Load(
                "policy file exceeds maximum size limit".to_string(),
            ));
        }

        let data = read_yaml(&canonical).map_err(PolicyError::Load)?;
        Ok(Some(data))
    }

    /// The canonical policy path must live under one of the allowed roots:
    /// the process working directory, the directory of the configured
    /// policy location (the `POLICY_FILE` override at the binary edge),
    /// or the built-in default container path.
    ///
    /// The configured root is the canonicalized *parent directory*, so a
    /// policy file that is itself a symlink out of its directory is still
    /// rejected.
    fn path_allowed(&self, canonical: &Path) -> bool {
        let mut roots: Vec<PathBuf> = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            roots.push(cwd);
        }
        if let Some(default_dir) = Path::new(DEFAULT_POLICY_FILE).parent() {
            roots.push(default_dir.to_path_buf());
        }
        if let Some(parent) = self.policy_file.parent() {
            if let Ok(resolved) = std::fs::canonicalize(parent) {
                roots.push(resolved);
            }
        }
        roots
            .iter()
            .any(|root| canonical == root || canonical.starts_with(root))
    }
}

fn read_yaml(path: &Path) -> Result<Value, String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("failed to read policy file: {e}"))?;
    if content.len() as u64 > MAX_POLICY_BYTES {
        return Err("policy file exceeds maximum size limit".to_string());
    }
    let parsed: Value = serde_yaml::from_str(&content)
        .map_err(|_| "policy file contains invalid YAML syntax".to_string())?;
    if parsed.is_null() {
        return Err("policy file is empty or invalid".to_string());
    }
    Ok(parsed)
}

fn validate_structure(data: &Value) -> Result<(), PolicyError> {
    let Some(obj) = data.as_object() else {
        return Err(PolicyError::Validation(
            "policy file must contain a YAML object".to_string(),
        ));
    };
    match obj.get("tools") {
        Some(tools) if tools.is_object() || tools.is_array() => {}
        Some(_) => {
            return Err(PolicyError::Validation(
                "'tools' section must be an object or list".to_string(),
            ))
        }
        None => {
            return Err(PolicyError::Validation(
                "policy file must contain 'tools' section".to_string(),
            ))
        }
    }
    if let Some(config) = obj.get("config") {
        if !config.is_object() {
            return Err(PolicyError::Validation(
                "'config' section must be an object".to_string(),
            ));
        }
    }
    Ok(())
}

/// Validate one tool entry and build its definition.
pub fn validate_tool_definition(name: &str, value: &Value) -> Result<ToolDefinition, String> {
    if !tool_name_pattern().is_match(name) || name.len() > 100 {
        return Err(format!(
            "tool name '{name}' must match ^[A-Za-z0-9_]+$ and be at most 100 bytes"
        ));
    }
    let Some(obj) = value.as_object() else {
        return Err(format!("tool '{name}' configuration must be an object"));
    };

    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .ok_or_else(|| format!("tool '{name}' description must be a string"))?
        .to_string();

    let args_schema = obj
        .get("args_schema")
        .filter(|v| v.is_object())
        .cloned()
        .ok_or_else(|| format!("tool '{name}' args_schema must be an object"))?;

    let command = obj
        .get("command")
        .and_then(Value::as_array)
        .ok_or_else(|| format!("tool '{name}' command must be a list"))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(String::from)
                .ok_or_else(|| format!("tool '{name}' command entries must be strings"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    // Directory fragments historically used `mutating` for `mutates`.
    let mutates = obj
        .get("mutates")
        .or_else(|| obj.get("mutating"))
        .and_then(Value::as_bool)
        .ok_or_else(|| format!("tool '{name}' mutates must be a boolean"))?;

    let requires_confirm = obj
        .get("requires_confirm")
        .and_then(Value::as_bool)
        .ok_or_else(|| format!("tool '{name}' requires_confirm must be a boolean"))?;

    let timeout_sec = obj
        .get("timeout_sec")
        .and_then(Value::as_u64)
        .filter(|t| *t > 0)
        .ok_or_else(|| format!("tool '{name}' timeout_sec must be a positive integer"))?;
    if timeout_sec > MAX_TIMEOUT_SEC {
        return Err(format!(
            "tool '{name}' timeout_sec exceeds maximum allowed ({MAX_TIMEOUT_SEC} seconds)"
        ));
    }

    let notify = match obj.get("notify") {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .and_then(NotifyEvent::parse)
                    .ok_or_else(|| format!("tool '{name}' invalid notify type: {v}"))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(format!("tool '{name}' notify must be a list")),
    };

    Ok(ToolDefinition {
        name: name.to_string(),
        description,
        args_schema,
        command,
        mutates,
        requires_confirm,
        timeout_sec,
        notify,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_tool() -> Value {
        json!({
            "description": "d",
            "args_schema": {"type": "object"},
            "command": ["true"],
            "mutates": false,
            "requires_confirm": false,
            "timeout_sec": 10
        })
    }

    #[test]
    fn accepts_minimal_definition() {
        let def = validate_tool_definition("disk_space", &minimal_tool()).unwrap();
        assert_eq!(def.name, "disk_space");
        assert!(def.notify.is_empty());
    }

    #[test]
    fn rejects_bad_names() {
        assert!(validate_tool_definition("bad name", &minimal_tool()).is_err());
        assert!(validate_tool_definition("bad-name", &minimal_tool()).is_err());
        let long = "a".repeat(101);
        assert!(validate_tool_definition(&long, &minimal_tool()).is_err());
    }

    #[test]
    fn rejects_missing_or_mistyped_fields() {
        let mut v = minimal_tool();
        v.as_object_mut().unwrap().remove("description");
        assert!(validate_tool_definition("t", &v).is_err());

        let mut v = minimal_tool();
        v["mutates"] = json!("yes");
        assert!(validate_tool_definition("t", &v).is_err());

        let mut v = minimal_tool();
        v["timeout_sec"] = json!(0);
        assert!(validate_tool_definition("t", &v).is_err());
    }

    #[test]
    fn rejects_timeout_above_ceiling() {
        let mut v = minimal_tool();
        v["timeout_sec"] = json!(301);
        let err = validate_tool_definition("t", &v).unwrap_err();
        assert!(err.contains("exceeds maximum"));
    }

    #[test]
    fn accepts_mutating_alias() {
        let mut v = minimal_tool();
        v.as_object_mut().unwrap().remove("mutates");
        v["mutating"] = json!(true);
        let def = validate_tool_definition("t", &v).unwrap();
        assert!(def.mutates);
    }

    #[test]
    fn validates_notify_values() {
        let mut v = minimal_tool();
        v["notify"] = json!(["success", "failure", "need_confirm"]);
        let def = validate_tool_definition("t", &v).unwrap();
        assert_eq!(def.notify.len(), 3);

        let mut v = minimal_tool();
        v["notify"] = json!(["sometimes"]);
        assert!(validate_tool_definition("t", &v).is_err());
    }
}
