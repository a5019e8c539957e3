//! The tool dispatcher: the single entry point for `call_tool`.
//!
//! Pipeline: resolve, validate arguments, path guard, confirmation gate,
//! feature gate, bounded execution, outcome classification, audit,
//! notification, envelope. The audit record is appended before the
//! envelope is returned; notifications are dispatched concurrently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::audit::AuditStatus;
use crate::features::Feature;
use crate::mcp::envelope::{Envelope, Metrics};
use crate::policy::{NotifyEvent, ToolRegistry};
use crate::tools::{self, HandlerOutcome, ToolContext, ToolError};

/// Tools treated as mutating regardless of their policy flags. A
/// misconfigured policy cannot silently turn confirmation off for these.
pub const MUTATING_TOOL_ALLOWLIST: &[&str] = &["blog_publish_static"];

/// Slack added on top of the handler-level timeout as a backstop for
/// handlers that cannot be preempted.
const DISPATCH_TIMEOUT_SLACK: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    ctx: ToolContext,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, ctx: ToolContext) -> Self {
        Self { registry, ctx }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    /// Execute one tool call and produce its envelope.
    pub async fn execute(&self, tool_name: &str, args: &Value) -> Envelope {
        let start = Instant::now();

        // Resolve.
        let Some(entry) = self.registry.get(tool_name) else {
            let envelope = Envelope::failure(
                "Unknown tool",
                format!("tool '{tool_name}' is not declared by the active policy"),
                1,
                elapsed_ms(start),
            )
            .with_data(json!({"available_tools": self.registry.names()}));
            self.audit(tool_name, args, false, false, AuditStatus::Fail, 1, start, 0, 0);
            return envelope;
        };
        let def = entry.def.clone();

        // Validate arguments.
        if let Err(e) = entry.validate_args(args) {
            let envelope = Envelope::failure(
                "Argument validation failed",
                e.message,
                1,
                elapsed_ms(start),
            );
            self.audit(
                tool_name,
                args,
                def.mutates,
                def.requires_confirm,
                AuditStatus::Fail,
                1,
                start,
                0,
                0,
            );
            return envelope;
        }

        // Path guard for path-typed arguments.
        if let Err(error) = tools::pre_guard(&self.ctx, tool_name, args).await {
            let (summary, detail) = match &error {
                ToolError::Security { .. } => (
                    "Path traversal detected",
                    "a supplied path resolves outside its designated root".to_string(),
                ),
                ToolError::Invalid(message) => ("Argument validation failed", message.clone()),
            };
            let envelope = Envelope::failure(summary, detail, 1, elapsed_ms(start));
            self.audit(
                tool_name,
                args,
                def.mutates,
                def.requires_confirm,
                AuditStatus::Fail,
                1,
                start,
                0,
                0,
            );
            return envelope;
        }

        // Confirmation gate.
        let needs_confirm =
            def.requires_confirm || MUTATING_TOOL_ALLOWLIST.contains(&tool_name);
        if needs_confirm && !confirmation_given(args) {
            let summary = format!("Confirmation required for {tool_name}");
            let envelope = Envelope {
                ok: false,
                summary: summary.clone(),
                need_confirm: true,
                data: Some(json!({
                    "tool": tool_name,
                    "operation": def.description,
                    "required_arg": "_confirm",
                    "required_value": true,
                    "suggestion": format!(
                        "Add '_confirm': true to {tool_name} arguments to proceed"
                    ),
                    "example": {
                        "method": "call_tool",
                        "name": tool_name,
                        "args": {"_confirm": true},
                    },
                })),
                stdout: String::new(),
                stderr: String::new(),
                error: Some(
                    "This is a mutating operation and requires _confirm: true".to_string(),
                ),
                metrics: Metrics::new(elapsed_ms(start), 1),
            };
            self.audit(
                tool_name,
                args,
                def.mutates,
                true,
                AuditStatus::NeedConfirm,
                1,
                start,
                0,
                0,
            );
            self.notify(&def.notify, NotifyEvent::NeedConfirm, tool_name, &summary, 1, 0);
            return envelope;
        }

        // Feature gate.
        if let Some(feature) = required_feature(tool_name) {
            let status = self.ctx.features.check(feature).await;
            if !status.available {
                let envelope = Envelope::failure(
                    format!("Feature unavailable: {}", status.name),
                    status
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("feature '{}' is not available", status.name)),
                    1,
                    elapsed_ms(start),
                )
                .with_data(json!({
                    "feature": status.name,
                    "suggestion": status.suggestion,
                }));
                self.audit(
                    tool_name,
                    args,
                    def.mutates,
                    def.requires_confirm,
                    AuditStatus::Fail,
                    1,
                    start,
                    0,
                    0,
                );
                return envelope;
            }
        }

        // Execute under the tool's timeout and output cap.
        let timeout_sec = self
            .ctx
            .runtime
            .tool_timeout_override(tool_name)
            .unwrap_or(def.timeout_sec);
        let output_cap = self
            .ctx
            .runtime
            .tool_output_limit_override(tool_name)
            .unwrap_or(self.ctx.policy.output_truncate_limit);
        let timeout = Duration::from_secs(timeout_sec);

        let handler = tools::run(&self.ctx, &def, args, timeout, output_cap);
        let result = tokio::time::timeout(timeout + DISPATCH_TIMEOUT_SLACK, handler).await;

        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(ToolError::Security { .. })) => {
                let envelope = Envelope::failure(
                    "Path traversal detected",
                    "a supplied path resolves outside its designated root",
                    1,
                    elapsed_ms(start),
                );
                self.audit(
                    tool_name,
                    args,
                    def.mutates,
                    def.requires_confirm,
                    AuditStatus::Fail,
                    1,
                    start,
                    0,
                    0,
                );
                return envelope;
            }
            Ok(Err(ToolError::Invalid(message))) => {
                let envelope =
                    Envelope::failure("Argument validation failed", message, 1, elapsed_ms(start));
                self.audit(
                    tool_name,
                    args,
                    def.mutates,
                    def.requires_confirm,
                    AuditStatus::Fail,
                    1,
                    start,
                    0,
                    0,
                );
                return envelope;
            }
            Err(_) => HandlerOutcome {
                success: false,
                exit_code: tools::exec::EXIT_TIMEOUT,
                timed_out: true,
                ..HandlerOutcome::default()
            },
        };

        // Classify.
        let summary = if outcome.timed_out {
            format!("{tool_name} timed out")
        } else if !outcome.summary.is_empty() {
            outcome.summary.clone()
        } else if outcome.success {
            format!("{tool_name} completed successfully")
        } else {
            classify_failure(tool_name, &outcome.stderr, outcome.exit_code)
        };

        let elapsed = elapsed_ms(start);
        let status = if outcome.success {
            AuditStatus::Ok
        } else {
            AuditStatus::Fail
        };
        self.audit(
            tool_name,
            args,
            def.mutates,
            def.requires_confirm,
            status,
            outcome.exit_code,
            start,
            outcome.stdout_trunc,
            outcome.stderr_trunc,
        );

        if outcome.success {
            self.notify(
                &def.notify,
                NotifyEvent::Success,
                tool_name,
                &summary,
                0,
                elapsed,
            );
        } else {
            let detail = if outcome.stderr.is_empty() {
                summary.clone()
            } else {
                outcome.stderr.clone()
            };
            self.notify(
                &def.notify,
                NotifyEvent::Failure,
                tool_name,
                &detail,
                outcome.exit_code,
                elapsed,
            );
        }

        let error = if outcome.success {
            None
        } else if outcome.stderr.is_empty() {
            Some(summary.clone())
        } else {
            Some(outcome.stderr.clone())
        };

        Envelope {
            ok: outcome.success,
            summary,
            need_confirm: false,
            data: outcome.data,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            error,
            metrics: Metrics {
                elapsed_ms: elapsed,
                exit_code: outcome.exit_code,
                stdout_trunc: (outcome.stdout_trunc > 0).then_some(outcome.stdout_trunc),
                stderr_trunc: (outcome.stderr_trunc > 0).then_some(outcome.stderr_trunc),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn audit(
        &self,
        tool: &str,
        args: &Value,
        mutates: bool,
        requires_confirm: bool,
        status: AuditStatus,
        exit_code: i32,
        start: Instant,
        stdout_trunc: u64,
        stderr_trunc: u64,
    ) {
        self.ctx.audit.log_tool_execution(
            tool,
            args,
            mutates,
            requires_confirm,
            status,
            exit_code,
            elapsed_ms(start),
            stdout_trunc,
            stderr_trunc,
        );
    }

    /// Dispatch the notification for an outcome when the tool subscribed
    /// to it. Runs concurrently; failures never alter the envelope.
    fn notify(
        &self,
        subscriptions: &[NotifyEvent],
        event: NotifyEvent,
        tool: &str,
        detail: &str,
        exit_code: i32,
        elapsed_ms: u64,
    ) {
        if !subscriptions.contains(&event) {
            return;
        }
        let notifier = Arc::clone(&self.ctx.notifier);
        let tool = tool.to_string();
        let detail = detail.to_string();
        tokio::spawn(async move {
            match event {
                NotifyEvent::Success => {
                    notifier.tool_success(&tool, &detail, elapsed_ms).await;
                }
                NotifyEvent::Failure => {
                    notifier.tool_failure(&tool, &detail, exit_code).await;
                }
                NotifyEvent::NeedConfirm => {
                    notifier.tool_confirmation(&tool, &detail).await;
                }
            }
        });
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Coerce the `_confirm` argument: `true`, `"true"`, `"1"`, `"yes"`,
/// `"y"` and integer `1` all count as confirmation.
fn confirmation_given(args: &Value) -> bool {
    match args.get("_confirm") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => {
            matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "y")
        }
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    }
}

/// The feature a tool depends on, by naming convention.
fn required_feature(tool: &str) -> Option<Feature> {
    if tool.starts_with("docker_") {
        Some(Feature::Docker)
    } else if tool == "notify_ping" {
        Some(Feature::Notifications)
    } else if tool.starts_with("blog_") {
        Some(Feature::StagingDirs)
    } else {
        None
    }
}

/// Curated summaries for well-known failure shapes; generic otherwise.
fn classify_failure(tool: &str, stderr: &str, exit_code: i32) -> String {
    let lowered = stderr.to_lowercase();
    if lowered.contains("permission denied") {
        format!("Permission denied while running {tool}")
    } else if exit_code == tools::exec::EXIT_NOT_FOUND
        || lowered.contains("command not found")
        || lowered.contains("no such file or directory")
    {
        format!("Command not found for {tool}")
    } else if lowered.contains("cannot connect to the docker daemon")
        || lowered.contains("daemon")
    {
        format!("Container daemon unreachable for {tool}")
    } else {
        format!("{tool} failed with exit code {exit_code}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn confirmation_coercions() {
        for value in [json!(true), json!("true"), json!("1"), json!("yes"), json!("y"), json!(1)] {
            assert!(confirmation_given(&json!({"_confirm": value.clone()})), "{value}");
        }
        for value in [json!(false), json!("no"), json!(0), json!(2), json!(null)] {
            assert!(!confirmation_given(&json!({"_confirm": value.clone()})), "{value}");
        }
        assert!(!confirmation_given(&json!({})));
    }

    #[test]
    fn feature_mapping_by_convention() {
        assert_eq!(required_feature("docker_ps"), Some(Feature::Docker));
        assert_eq!(required_feature("blog_stage_markdown"), Some(Feature::StagingDirs));
        assert_eq!(required_feature("notify_ping"), Some(Feature::Notifications));
        assert_eq!(required_feature("disk_space"), None);
    }

    #[test]
    fn failure_classification() {
        assert!(classify_failure("t", "sh: permission denied", 126).contains("Permission denied"));
        assert!(classify_failure("t", "bash: foo: command not found", 127)
            .contains("Command not found"));
        assert!(
            classify_failure("t", "Cannot connect to the Docker daemon at unix://...", 1)
                .contains("daemon unreachable")
        );
        assert_eq!(classify_failure("t", "boom", 3), "t failed with exit code 3");
    }
}
