//! Declarative tool policy: loading, merging, validation, registry.
//!
//! The policy is a YAML file (plus an optional overlay directory of
//! `*.yaml` fragments) enumerating the tools the server is willing to
//! run. Loading is fatal on failure; the resulting registry is immutable
//! for the life of the process.

mod dir_loader;
mod loader;
mod registry;

pub use dir_loader::{extract_tools, merge_tools, overlay_files, InvalidEntry, RawTool};
pub use loader::{PolicyLoad, PolicyLoader};
pub use registry::{ToolEntry, ToolRegistry};

use serde::Serialize;
use serde_json::Value;

use crate::config::RuntimeConfig;

/// Notification events a tool may subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyEvent {
    Success,
    Failure,
    NeedConfirm,
}

impl NotifyEvent {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(NotifyEvent::Success),
            "failure" => Some(NotifyEvent::Failure),
            "need_confirm" => Some(NotifyEvent::NeedConfirm),
            _ => None,
        }
    }
}

/// One callable operation, as declared by the policy.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub args_schema: Value,
    pub command: Vec<String>,
    pub mutates: bool,
    pub requires_confirm: bool,
    pub timeout_sec: u64,
    pub notify: Vec<NotifyEvent>,
}

/// Global settings from the policy file's `config` section, resolved once
/// at load time against the runtime defaults.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub output_truncate_limit: usize,
    pub default_timeout_sec: u64,
    pub audit_log_path: String,
    pub stage_root: std::path::PathBuf,
    pub publish_root: std::path::PathBuf,
    pub allowed_extensions: Vec<String>,
}

impl PolicyConfig {
    /// Merge the `config` section over runtime defaults. A nested
    /// `security` mapping may override the path-guard settings.
    pub fn resolve(section: &Value, runtime: &RuntimeConfig) -> Self {
        let get = |key: &str| section.get(key);
        let security = section.get("security");
        let sec_get = |key: &str| security.and_then(|s| s.get(key));

        let stage_root = sec_get("stage_root")
            .or_else(|| get("stage_root"))
            .and_then(Value::as_str)
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| runtime.stage_root.clone());
        let publish_root = sec_get("publish_root")
            .or_else(|| get("publish_root"))
            .and_then(Value::as_str)
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| runtime.publish_root.clone());
        let allowed_extensions = sec_get("allowed_extensions")
            .or_else(|| get("allowed_extensions"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_else(|| vec![".md".to_string(), ".markdown".to_string()]);

        Self {
            output_truncate_limit: get("output_truncate_limit")
                .and_then(Value::as_u64)
                .map(|v| v as usize)
                .unwrap_or(runtime.output_truncate_limit),
            default_timeout_sec: get("default_timeout_sec")
                .and_then(Value::as_u64)
                .unwrap_or(runtime.default_timeout_sec),
            audit_log_path: get("audit_log_path")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| runtime.audit_log_path.display().to_string()),
            stage_root,
            publish_root,
            allowed_extensions,
        }
    }
}

/// Structured summary emitted after a load.
#[derive(Debug, Clone, Serialize, Default)]
pub struct LoadSummary {
    pub tools_from_file: usize,
    pub overlay_files_scanned: usize,
    pub overlay_tools: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub invalid: Vec<InvalidEntry>,
}
