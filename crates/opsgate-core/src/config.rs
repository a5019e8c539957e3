//! Process-wide runtime configuration.
//!
//! Resolved once at startup from environment variables plus
//! container-internal defaults, then shared immutably. Unknown environment
//! keys are ignored; boolean flags accept `true/1/yes/on`.

use std::path::PathBuf;

/// Default location of the base policy file inside the container image.
pub const DEFAULT_POLICY_FILE: &str = "/config/policy/tools.yaml";
/// Default overlay directory scanned for `*.yaml` fragments.
pub const DEFAULT_POLICY_DIR: &str = "/config/tools.d";

/// Immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub policy_file: PathBuf,
    pub policy_dir: PathBuf,

    pub audit_log_path: PathBuf,
    pub audit_sensitive_env_vars: Vec<String>,

    pub stage_root: PathBuf,
    pub publish_root: PathBuf,

    pub docker_socket: PathBuf,

    pub notifications_enabled: bool,
    pub push_url: String,
    pub push_token: String,

    pub default_timeout_sec: u64,
    pub output_truncate_limit: usize,

    pub strict_security_mode: bool,
    pub rate_limit_disabled: bool,

    pub server_name: String,
    pub server_version: String,
    pub host: String,
    pub port: u16,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            policy_file: PathBuf::from(DEFAULT_POLICY_FILE),
            policy_dir: PathBuf::from(DEFAULT_POLICY_DIR),
            audit_log_path: PathBuf::from("/var/log/agentops/audit.jsonl"),
            audit_sensitive_env_vars: Vec::new(),
            stage_root: PathBuf::from("/app/data/blog/stage"),
            publish_root: PathBuf::from("/app/data/blog/publish"),
            docker_socket: PathBuf::from("/var/run/docker.sock"),
            notifications_enabled: true,
            push_url: String::new(),
            push_token: String::new(),
            default_timeout_sec: 30,
            output_truncate_limit: 10240,
            strict_security_mode: true,
            rate_limit_disabled: false,
            server_name: "opsgate".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            host: "0.0.0.0".to_string(),
            port: 9400,
        }
    }
}

impl RuntimeConfig {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let audit_log_path = match std::env::var("AUDIT_LOG_PATH") {
            Ok(p) if !p.is_empty() => PathBuf::from(p),
            _ => {
                let dir = env_str("AUDIT_LOG_DIR", "/var/log/agentops");
                PathBuf::from(dir).join("audit.jsonl")
            }
        };

        Self {
            policy_file: env_path("POLICY_FILE", DEFAULT_POLICY_FILE),
            policy_dir: env_path("POLICY_DIR", DEFAULT_POLICY_DIR),
            audit_log_path,
            audit_sensitive_env_vars: env_list("AUDIT_SENSITIVE_ENV_VARS"),
            stage_root: env_path("BLOG_STAGE_ROOT", "/app/data/blog/stage"),
            publish_root: env_path("BLOG_PUBLISH_ROOT", "/app/data/blog/publish"),
            docker_socket: env_path("DOCKER_SOCKET", "/var/run/docker.sock"),
            notifications_enabled: env_bool("NOTIFICATIONS_ENABLED", true),
            push_url: env_str("PUSH_URL", "").trim_end_matches('/').to_string(),
            push_token: env_str("PUSH_TOKEN", ""),
            default_timeout_sec: env_u64("DEFAULT_TIMEOUT_SEC", defaults.default_timeout_sec),
            output_truncate_limit: env_u64(
                "OUTPUT_TRUNCATE_LIMIT",
                defaults.output_truncate_limit as u64,
            ) as usize,
            strict_security_mode: env_bool("STRICT_SECURITY_MODE", true),
            rate_limit_disabled: env_bool("RATE_LIMIT_DISABLED", false),
            server_name: env_str("SERVER_NAME", &defaults.server_name),
            server_version: env_str("SERVER_VERSION", &defaults.server_version),
            host: env_str("HOST", &defaults.host),
            port: env_u64("PORT", u64::from(defaults.port)) as u16,
        }
    }

    /// Per-tool timeout override (`TOOL_TIMEOUT_<NAME>`), if set.
    pub fn tool_timeout_override(&self, tool: &str) -> Option<u64> {
        std::env::var(format!("TOOL_TIMEOUT_{}", tool.to_uppercase()))
            .ok()
            .and_then(|v| v.parse().ok())
    }

    /// Per-tool output cap override (`TOOL_OUTPUT_LIMIT_<NAME>`), if set.
    pub fn tool_output_limit_override(&self, tool: &str) -> Option<usize> {
        std::env::var(format!("TOOL_OUTPUT_LIMIT_{}", tool.to_uppercase()))
            .ok()
            .and_then(|v| v.parse().ok())
    }

    /// Validate the runtime environment, creating writable directories where
    /// the server owns them. Returns the list of problems found; an empty
    /// list means the environment is usable.
    pub fn validate_environment(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (label, dir) in [
            ("stage root", &self.stage_root),
            ("publish root", &self.publish_root),
        ] {
            if let Err(e) = std::fs::create_dir_all(dir) {
                errors.push(format!("cannot create {} {}: {}", label, dir.display(), e));
            }
        }

        if let Some(parent) = self.audit_log_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                errors.push(format!(
                    "cannot create audit log directory {}: {}",
                    parent.display(),
                    e
                ));
            }
        }

        errors
    }

    /// Key configuration values for startup logging, secrets excluded.
    pub fn startup_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "server_name": self.server_name,
            "server_version": self.server_version,
            "policy_file": self.policy_file.display().to_string(),
            "policy_dir": self.policy_dir.display().to_string(),
            "audit_log_path": self.audit_log_path.display().to_string(),
            "stage_root": self.stage_root.display().to_string(),
            "publish_root": self.publish_root.display().to_string(),
            "docker_socket": self.docker_socket.display().to_string(),
            "notifications_enabled": self.notifications_enabled,
            "push_configured": !self.push_url.is_empty() && !self.push_token.is_empty(),
            "strict_security_mode": self.strict_security_mode,
            "host": self.host,
            "port": self.port,
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env_str(key, default))
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_without_environment() {
        for key in ["POLICY_FILE", "NOTIFICATIONS_ENABLED", "PORT"] {
            std::env::remove_var(key);
        }
        let cfg = RuntimeConfig::from_env();
        assert_eq!(cfg.policy_file, PathBuf::from(DEFAULT_POLICY_FILE));
        assert!(cfg.notifications_enabled);
        assert_eq!(cfg.port, 9400);
        assert_eq!(cfg.output_truncate_limit, 10240);
    }

    #[test]
    #[serial]
    fn environment_overrides() {
        std::env::set_var("POLICY_FILE", "/tmp/tools.yaml");
        std::env::set_var("NOTIFICATIONS_ENABLED", "false");
        std::env::set_var("TOOL_TIMEOUT_DISK_SPACE", "11");
        let cfg = RuntimeConfig::from_env();
        assert_eq!(cfg.policy_file, PathBuf::from("/tmp/tools.yaml"));
        assert!(!cfg.notifications_enabled);
        assert_eq!(cfg.tool_timeout_override("disk_space"), Some(11));
        std::env::remove_var("POLICY_FILE");
        std::env::remove_var("NOTIFICATIONS_ENABLED");
        std::env::remove_var("TOOL_TIMEOUT_DISK_SPACE");
    }
}
