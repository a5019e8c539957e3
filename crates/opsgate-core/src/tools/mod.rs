//! Built-in tool handlers.
//!
//! Tools are declared by policy; the handler is selected by name. File
//! staging and publishing run in-process, the notification ping goes
//! through the fan-out, and everything else runs the policy's `command`
//! argv as a bounded subprocess.

pub mod blog;
pub mod exec;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

use crate::audit::AuditLog;
use crate::config::RuntimeConfig;
use crate::errors::SecurityError;
use crate::features::FeatureDetector;
use crate::notify::{Category, Message, Notifier, Priority};
use crate::policy::{PolicyConfig, ToolDefinition};
use crate::security;

/// Handler failure modes the dispatcher distinguishes.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{error}")]
    Security {
        operation: String,
        #[source]
        error: SecurityError,
    },

    #[error("{0}")]
    Invalid(String),
}

/// What a handler produced. `summary` may be left empty for subprocess
/// tools; the dispatcher then classifies stderr into a curated one.
#[derive(Debug, Clone, Default)]
pub struct HandlerOutcome {
    pub success: bool,
    pub summary: String,
    pub data: Option<Value>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub stdout_trunc: u64,
    pub stderr_trunc: u64,
    pub timed_out: bool,
}

impl HandlerOutcome {
    pub fn ok(summary: impl Into<String>) -> Self {
        Self {
            success: true,
            summary: summary.into(),
            exit_code: 0,
            ..Self::default()
        }
    }

    pub fn fail(summary: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: summary.into(),
            stderr: stderr.into(),
            exit_code: 1,
            ..Self::default()
        }
    }
}

/// Shared dependencies handed to every handler invocation.
#[derive(Clone)]
pub struct ToolContext {
    pub runtime: Arc<RuntimeConfig>,
    pub policy: Arc<PolicyConfig>,
    pub audit: Arc<AuditLog>,
    pub notifier: Arc<Notifier>,
    pub features: Arc<FeatureDetector>,
}

impl ToolContext {
    /// Sanitize and root-check a caller-supplied path. A violation is
    /// audited and notified here, then surfaced to the dispatcher.
    pub async fn guard_path(
        &self,
        raw: &str,
        root: &Path,
        operation: &str,
    ) -> Result<PathBuf, ToolError> {
        let result = security::sanitize_path(raw)
            .and_then(|clean| security::validate_path_within_root(&clean, root, operation));
        match result {
            Ok(path) => Ok(path),
            Err(error) => {
                self.audit.log_security_violation(&json!({
                    "violation_type": error.kind(),
                    "operation": operation,
                    "attempted_path": raw,
                    "root_directory": root.display().to_string(),
                }));
                self.notifier
                    .security_violation(error.kind(), &format!("{operation}: {raw}"))
                    .await;
                Err(ToolError::Security {
                    operation: operation.to_string(),
                    error,
                })
            }
        }
    }
}

/// Root-check the path-typed arguments of tools known to carry them.
///
/// Runs after schema validation and before the confirmation gate, so a
/// traversal attempt is rejected before any side effect or confirmation
/// prompt. Handlers guard again when they actually touch the filesystem.
pub async fn pre_guard(ctx: &ToolContext, tool: &str, args: &Value) -> Result<(), ToolError> {
    match tool {
        "blog_stage_markdown" => {
            if let Some(path) = args.get("file_path").and_then(Value::as_str) {
                ctx.guard_path(path, &ctx.policy.stage_root, "blog_stage")
                    .await?;
            }
        }
        "blog_publish_static" => {
            if let Some(sources) = args.get("source_files").and_then(Value::as_array) {
                for source in sources.iter().filter_map(Value::as_str) {
                    ctx.guard_path(source, &ctx.policy.stage_root, "blog_publish")
                        .await?;
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Run the handler for `def` with validated arguments.
pub async fn run(
    ctx: &ToolContext,
    def: &ToolDefinition,
    args: &Value,
    timeout: Duration,
    output_cap: usize,
) -> Result<HandlerOutcome, ToolError> {
    match def.name.as_str() {
        "blog_stage_markdown" => blog::stage_markdown(ctx, args).await,
        "blog_publish_static" => blog::publish_static(ctx, args).await,
        "notify_ping" => notify_ping(ctx, args).await,
        _ => exec::run_command(&def.command, timeout, output_cap)
            .await
            .map_err(|e| ToolError::Invalid(format!("failed to launch tool command: {e}"))),
    }
}

/// Send a test notification through the configured providers.
async fn notify_ping(ctx: &ToolContext, args: &Value) -> Result<HandlerOutcome, ToolError> {
    let body = args
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("Test notification from opsgate")
        .to_string();

    let delivered = ctx
        .notifier
        .send(&Message {
            title: "Notification Test".to_string(),
            body,
            priority: Priority::Normal,
            category: Category::AuditEvent,
            tool_name: Some("notify_ping".to_string()),
            metadata: None,
        })
        .await;

    if delivered {
        let mut outcome = HandlerOutcome::ok("Test notification sent");
        outcome.data = Some(json!({"providers": ctx.notifier.status()["providers"]}));
        Ok(outcome)
    } else {
        Ok(HandlerOutcome::fail(
            "Notification delivery failed",
            "no notification provider accepted the message",
        ))
    }
}
