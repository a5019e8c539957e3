//! Feature detection with graceful degradation.
//!
//! Optional host capabilities (container socket, notification endpoint,
//! policy file, staging/publish directories) are probed on demand and the
//! results cached for ~30 seconds. Tools that depend on an unavailable
//! feature are answered with a degraded envelope instead of an error.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::RuntimeConfig;

/// Cache lifetime for probe results.
const CACHE_TTL: Duration = Duration::from_secs(30);
/// Timeout for the container CLI version probe.
const CLI_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// The optional capabilities the server knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Docker,
    Notifications,
    Policy,
    StagingDirs,
}

impl Feature {
    pub fn as_str(self) -> &'static str {
        match self {
            Feature::Docker => "docker",
            Feature::Notifications => "notifications",
            Feature::Policy => "policy",
            Feature::StagingDirs => "staging_dirs",
        }
    }
}

/// Probe outcome for one feature.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureStatus {
    pub name: String,
    pub available: bool,
    pub configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl FeatureStatus {
    fn available(feature: Feature, details: Value) -> Self {
        Self {
            name: feature.as_str().to_string(),
            available: true,
            configured: true,
            error: None,
            details: Some(details),
            suggestion: None,
        }
    }

    fn unavailable(feature: Feature, error: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            name: feature.as_str().to_string(),
            available: false,
            configured: false,
            error: Some(error.into()),
            details: None,
            suggestion: Some(suggestion.into()),
        }
    }
}

pub struct FeatureDetector {
    config: Arc<RuntimeConfig>,
    cache: Cache<Feature, FeatureStatus>,
}

impl FeatureDetector {
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        Self {
            config,
            cache: Cache::builder().time_to_live(CACHE_TTL).build(),
        }
    }

    /// Probe one feature, consulting the cache first.
    pub async fn check(&self, feature: Feature) -> FeatureStatus {
        if let Some(status) = self.cache.get(&feature) {
            return status;
        }
        let status = match feature {
            Feature::Docker => self.probe_docker().await,
            Feature::Notifications => self.probe_notifications(),
            Feature::Policy => self.probe_policy(),
            Feature::StagingDirs => self.probe_staging_dirs(),
        };
        self.cache.insert(feature, status.clone());
        status
    }

    /// Probe everything, for health reporting.
    pub async fn all(&self) -> Value {
        let mut out = serde_json::Map::new();
        for feature in [
            Feature::Docker,
            Feature::Notifications,
            Feature::Policy,
            Feature::StagingDirs,
        ] {
            let status = self.check(feature).await;
            out.insert(
                feature.as_str().to_string(),
                serde_json::to_value(&status).unwrap_or(Value::Null),
            );
        }
        Value::Object(out)
    }

    /// Drop cached results so the next check probes again.
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    async fn probe_docker(&self) -> FeatureStatus {
        let socket = &self.config.docker_socket;

        let metadata = match std::fs::metadata(socket) {
            Ok(m) => m,
            Err(_) => {
                return FeatureStatus::unavailable(
                    Feature::Docker,
                    format!("container socket not found at {}", socket.display()),
                    format!("mount {} to enable container operations", socket.display()),
                );
            }
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if !metadata.file_type().is_socket() {
                return FeatureStatus::unavailable(
                    Feature::Docker,
                    "container socket path exists but is not a socket",
                    format!("ensure {} is properly mounted", socket.display()),
                );
            }
        }
        #[cfg(not(unix))]
        let _ = metadata;

        // Socket is present; confirm the CLI can actually talk to the daemon.
        let probe = tokio::time::timeout(
            CLI_PROBE_TIMEOUT,
            tokio::process::Command::new("docker")
                .args(["version", "--format", "{{.Server.Version}}"])
                .output(),
        )
        .await;

        match probe {
            Ok(Ok(output)) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
                FeatureStatus::available(
                    Feature::Docker,
                    json!({
                        "socket_path": socket.display().to_string(),
                        "server_version": version,
                    }),
                )
            }
            Ok(Ok(output)) => {
                let err = String::from_utf8_lossy(&output.stderr).trim().to_string();
                FeatureStatus::unavailable(
                    Feature::Docker,
                    if err.is_empty() {
                        "container daemon not accessible".to_string()
                    } else {
                        err
                    },
                    "ensure the container daemon is running and the socket is mounted",
                )
            }
            Ok(Err(_)) => FeatureStatus::unavailable(
                Feature::Docker,
                "docker CLI not found",
                "install the docker CLI in the server image",
            ),
            Err(_) => FeatureStatus::unavailable(
                Feature::Docker,
                "container daemon connection timed out",
                "check daemon status and socket connectivity",
            ),
        }
    }

    fn probe_notifications(&self) -> FeatureStatus {
        let url = self.config.push_url.trim();
        let token = self.config.push_token.trim();

        if url.is_empty() || token.is_empty() {
            let mut missing = Vec::new();
            if url.is_empty() {
                missing.push("PUSH_URL");
            }
            if token.is_empty() {
                missing.push("PUSH_TOKEN");
            }
            return FeatureStatus::unavailable(
                Feature::Notifications,
                "push endpoint not configured",
                format!("set {} to enable notifications", missing.join(" and ")),
            );
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return FeatureStatus::unavailable(
                Feature::Notifications,
                "invalid push endpoint URL",
                "PUSH_URL must start with http:// or https://",
            );
        }
        if token.len() < 10 {
            return FeatureStatus::unavailable(
                Feature::Notifications,
                "push token appears invalid (too short)",
                "verify PUSH_TOKEN is a valid application token",
            );
        }
        FeatureStatus::available(
            Feature::Notifications,
            json!({"url": url, "token_configured": true}),
        )
    }

    fn probe_policy(&self) -> FeatureStatus {
        let path = &self.config.policy_file;
        if path.is_file() {
            FeatureStatus::available(
                Feature::Policy,
                json!({"policy_file": path.display().to_string()}),
            )
        } else if self.config.policy_dir.is_dir() {
            // Overlay-only deployments are valid.
            FeatureStatus::available(
                Feature::Policy,
                json!({"policy_dir": self.config.policy_dir.display().to_string()}),
            )
        } else {
            FeatureStatus::unavailable(
                Feature::Policy,
                format!("policy file not found at {}", path.display()),
                "set POLICY_FILE or mount the policy directory",
            )
        }
    }

    fn probe_staging_dirs(&self) -> FeatureStatus {
        let stage = &self.config.stage_root;
        let publish = &self.config.publish_root;

        let mut issues = Vec::new();
        if !stage.is_dir() {
            issues.push(format!("stage root missing: {}", stage.display()));
        }
        if !publish.is_dir() {
            // The publish root is server-owned; try to create it before
            // reporting it missing.
            if std::fs::create_dir_all(publish).is_err() {
                issues.push(format!("publish root missing: {}", publish.display()));
            }
        }

        if issues.is_empty() {
            FeatureStatus::available(
                Feature::StagingDirs,
                json!({
                    "stage_root": stage.display().to_string(),
                    "publish_root": publish.display().to_string(),
                }),
            )
        } else {
            FeatureStatus::unavailable(
                Feature::StagingDirs,
                issues.join("; "),
                "set BLOG_STAGE_ROOT and BLOG_PUBLISH_ROOT to writable directories",
            )
        }
    }
}
