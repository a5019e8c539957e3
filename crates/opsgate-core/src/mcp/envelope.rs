//! The uniform response envelope.
//!
//! Every response the server produces, on stdio or HTTP, is one of these.
//! `ok`, `summary`, `metrics.elapsed_ms` and `metrics.exit_code` are
//! always present; `need_confirm` is omitted when false and `error` only
//! appears on failures.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error text longer than this is truncated with an ellipsis.
const MAX_ERROR_LEN: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    pub elapsed_ms: u64,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_trunc: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_trunc: Option<u64>,
}

impl Metrics {
    pub fn new(elapsed_ms: u64, exit_code: i32) -> Self {
        Self {
            elapsed_ms,
            exit_code,
            stdout_trunc: None,
            stderr_trunc: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub ok: bool,
    pub summary: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub need_confirm: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metrics: Metrics,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl Envelope {
    pub fn success(summary: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            ok: true,
            summary: summary.into(),
            need_confirm: false,
            data: None,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
            metrics: Metrics::new(elapsed_ms, 0),
        }
    }

    pub fn failure(
        summary: impl Into<String>,
        error: impl Into<String>,
        exit_code: i32,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            ok: false,
            summary: summary.into(),
            need_confirm: false,
            data: None,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(error.into()),
            metrics: Metrics::new(elapsed_ms, exit_code),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Sanitize the error text in place. Runs on every envelope before it
    /// is written to the wire.
    pub fn sanitize(&mut self) {
        if let Some(error) = &self.error {
            self.error = Some(sanitize_error_text(error));
        }
    }
}

/// Scrub an error message for client consumption: absolute filesystem
/// paths become `[PATH]`, anything that looks like a stack trace is
/// collapsed, and overlong messages are truncated.
pub fn sanitize_error_text(message: &str) -> String {
    static PATH_PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern =
        PATH_PATTERN.get_or_init(|| Regex::new(r"/[A-Za-z0-9_/.\-]+").expect("static pattern"));

    let message = pattern.replace_all(message, "[PATH]").into_owned();

    if message.contains("panicked at")
        || message.contains("stack backtrace")
        || message.contains("RUST_BACKTRACE")
    {
        return "Internal processing error".to_string();
    }

    if message.len() > MAX_ERROR_LEN {
        let mut cut = MAX_ERROR_LEN;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        return format!("{}...", &message[..cut]);
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_fields_are_always_serialized() {
        let env = Envelope::success("done", 5);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(v["summary"], "done");
        assert_eq!(v["metrics"]["elapsed_ms"], 5);
        assert_eq!(v["metrics"]["exit_code"], 0);
        // Omitted-when-absent fields.
        assert!(v.get("need_confirm").is_none());
        assert!(v.get("error").is_none());
        assert!(v.get("stdout").is_none());
    }

    #[test]
    fn error_only_present_on_failures() {
        let env = Envelope::failure("broke", "details", 1, 7);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"], "details");
        assert_eq!(v["metrics"]["exit_code"], 1);
    }

    #[test]
    fn need_confirm_serialized_when_true() {
        let mut env = Envelope::failure("confirm", "needs confirm", 1, 0);
        env.need_confirm = true;
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["need_confirm"], true);
    }

    #[test]
    fn deserializes_minimal_envelope() {
        let env: Envelope = serde_json::from_value(json!({
            "ok": true,
            "summary": "s",
            "metrics": {"elapsed_ms": 1, "exit_code": 0}
        }))
        .unwrap();
        assert!(env.ok);
        assert!(!env.need_confirm);
        assert!(env.stdout.is_empty());
    }

    #[test]
    fn sanitizer_replaces_absolute_paths() {
        let out = sanitize_error_text("failed to open /etc/shadow for reading");
        assert_eq!(out, "failed to open [PATH] for reading");
    }

    #[test]
    fn sanitizer_collapses_stack_traces() {
        let out = sanitize_error_text("thread 'main' panicked at src/dispatch.rs:10:5: boom");
        assert_eq!(out, "Internal processing error");
    }

    #[test]
    fn sanitizer_truncates_long_messages() {
        let out = sanitize_error_text(&"x".repeat(500));
        assert_eq!(out.len(), MAX_ERROR_LEN + 3);
        assert!(out.ends_with("..."));
    }
}
