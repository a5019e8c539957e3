//! Append-only audit trail for tool invocations and security events.
//!
//! One JSON object per line, UTF-8, LF-terminated, flushed on every
//! write. Appends are best-effort: an audit failure is logged and never
//! propagates into the operation that produced the record.
//!
//! Arguments are redacted before hashing so secrets never reach the log,
//! then canonicalized (JCS: sorted keys, no whitespace) and hashed with
//! SHA-256.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Outcome classification recorded for each invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Ok,
    Fail,
    NeedConfirm,
    SecurityViolation,
}

/// One line in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: String,
    pub tool: String,
    pub args_hash: String,
    pub mutates: bool,
    pub requires_confirm: bool,
    pub status: AuditStatus,
    pub exit_code: i32,
    pub elapsed_ms: u64,
    pub caller: String,
    pub stdout_trunc: u64,
    pub stderr_trunc: u64,
}

/// Aggregate view over a recent slice of the log.
#[derive(Debug, Clone, Serialize, Default)]
pub struct AuditStats {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub security_violations: u64,
    pub tools_used: Vec<String>,
    pub time_period_hours: u64,
}

/// Sensitive key fragments redacted wherever they appear in argument keys.
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &["password", "token", "secret", "key", "auth"];

/// Default sensitive environment variable names; string values that
/// mention one of these are redacted wholesale.
const DEFAULT_SENSITIVE_ENV_VARS: &[&str] = &[
    "PASSWORD",
    "TOKEN",
    "SECRET",
    "KEY",
    "AUTH",
    "API_KEY",
    "API_SECRET",
    "DATABASE_URL",
    "DB_PASSWORD",
    "PUSH_TOKEN",
    "PUSH_URL",
];

pub struct AuditLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
    sensitive_env_vars: Vec<String>,
}

impl AuditLog {
    /// Open (or create) the log at `path`, appending.
    ///
    /// `extra_sensitive` extends the default sensitive-env-var set
    /// (`AUDIT_SENSITIVE_ENV_VARS` at the binary edge).
    pub fn new(path: impl Into<PathBuf>, extra_sensitive: &[String]) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(dir = %parent.display(), error = %e, "cannot create audit log directory");
            }
        }
        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => Some(f),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "audit log unavailable, records will be dropped");
                None
            }
        };
        let mut sensitive_env_vars: Vec<String> = DEFAULT_SENSITIVE_ENV_VARS
            .iter()
            .map(|s| s.to_string())
            .collect();
        sensitive_env_vars.extend(extra_sensitive.iter().cloned());
        Self {
            path,
            file: Mutex::new(file),
            sensitive_env_vars,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a tool invocation. Best-effort.
    #[allow(clippy::too_many_arguments)]
    pub fn log_tool_execution(
        &self,
        tool: &str,
        args: &Value,
        mutates: bool,
        requires_confirm: bool,
        status: AuditStatus,
        exit_code: i32,
        elapsed_ms: u64,
        stdout_trunc: u64,
        stderr_trunc: u64,
    ) {
        let record = AuditRecord {
            ts: Utc::now().to_rfc3339(),
            tool: tool.to_string(),
            args_hash: self.args_hash(args),
            mutates,
            requires_confirm,
            status,
            exit_code,
            elapsed_ms,
            caller: "mcp_client".to_string(),
            stdout_trunc,
            stderr_trunc,
        };
        self.append(&record);
    }

    /// Record a security violation. Best-effort.
    pub fn log_security_violation(&self, details: &Value) {
        let record = AuditRecord {
            ts: Utc::now().to_rfc3339(),
            tool: "SECURITY_VIOLATION".to_string(),
            args_hash: self.args_hash(details),
            mutates: false,
            requires_confirm: false,
            status: AuditStatus::SecurityViolation,
            exit_code: 1,
            elapsed_ms: 0,
            caller: "security_monitor".to_string(),
            stdout_trunc: 0,
            stderr_trunc: 0,
        };
        self.append(&record);
        tracing::warn!(
            kind = details.get("violation_type").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            "security violation logged"
        );
    }

    fn append(&self, record: &AuditRecord) {
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize audit record");
                return;
            }
        };
        let mut guard = match self.file.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(file) = guard.as_mut() {
            if let Err(e) = writeln!(file, "{line}").and_then(|()| file.flush()) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to write audit record");
            }
        }
    }

    /// SHA-256 over the canonical JSON of the redacted arguments.
    pub fn args_hash(&self, args: &Value) -> String {
        let redacted = self.redact(args.clone());
        let canonical = match serde_jcs::to_string(&redacted) {
            Ok(c) => c,
            Err(_) => return "hash_error".to_string(),
        };
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Redact sensitive material from an argument object. Idempotent.
    pub fn redact(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let redacted = map
                    .into_iter()
                    .map(|(key, v)| {
                        let lowered = key.to_lowercase();
                        if SENSITIVE_KEY_FRAGMENTS.iter().any(|f| lowered.contains(f)) {
                            (key, Value::String("[REDACTED]".to_string()))
                        } else {
                            (key, self.redact(v))
                        }
                    })
                    .collect();
                Value::Object(redacted)
            }
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.redact(v)).collect())
            }
            Value::String(s) => {
                if self.mentions_sensitive_env_var(&s) {
                    Value::String("[REDACTED_ENV_VAR]".to_string())
                } else {
                    Value::String(s)
                }
            }
            other => other,
        }
    }

    fn mentions_sensitive_env_var(&self, value: &str) -> bool {
        self.sensitive_env_vars.iter().any(|name| value.contains(name.as_str()))
    }

    /// Scan the log for records newer than `hours` and aggregate them.
    pub fn stats(&self, hours: u64) -> AuditStats {
        let mut stats = AuditStats {
            time_period_hours: hours,
            ..AuditStats::default()
        };
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return stats,
        };
        let cutoff = Utc::now() - chrono::Duration::hours(hours as i64);
        let mut tools = std::collections::BTreeSet::new();
        for line in content.lines() {
            let Ok(record) = serde_json::from_str::<AuditRecord>(line) else {
                continue;
            };
            let Ok(ts) = chrono::DateTime::parse_from_rfc3339(&record.ts) else {
                continue;
            };
            if ts.with_timezone(&Utc) < cutoff {
                continue;
            }
            stats.total_operations += 1;
            match record.status {
                AuditStatus::Ok => stats.successful_operations += 1,
                AuditStatus::Fail | AuditStatus::NeedConfirm => stats.failed_operations += 1,
                AuditStatus::SecurityViolation => stats.security_violations += 1,
            }
            if record.tool != "SECURITY_VIOLATION" {
                tools.insert(record.tool);
            }
        }
        stats.tools_used = tools.into_iter().collect();
        stats
    }
}
