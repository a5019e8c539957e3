//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use opsgate_core::dispatch::Dispatcher;
use opsgate_core::mcp::Engine;
use opsgate_core::notify::Notifier;
use opsgate_core::policy::{NotifyEvent, PolicyConfig, ToolDefinition, ToolRegistry};
use opsgate_core::tools::ToolContext;
use opsgate_core::{AuditLog, FeatureDetector, RuntimeConfig};

pub struct Harness {
    pub dir: TempDir,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn stage_root(&self) -> std::path::PathBuf {
        self.dir.path().join("stage")
    }

    pub fn publish_root(&self) -> std::path::PathBuf {
        self.dir.path().join("publish")
    }

    pub fn audit_lines(&self) -> Vec<Value> {
        let path = self.dir.path().join("audit.jsonl");
        let content = std::fs::read_to_string(path).unwrap_or_default();
        content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    pub fn engine(self) -> (TempDir, Engine) {
        (self.dir, Engine::new(self.dispatcher))
    }
}

pub fn harness(tools: Vec<ToolDefinition>) -> Harness {
    harness_with_cap(tools, 10240)
}

pub fn harness_with_cap(tools: Vec<ToolDefinition>, output_cap: usize) -> Harness {
    let dir = TempDir::new().unwrap();
    let stage = dir.path().join("stage");
    let publish = dir.path().join("publish");
    std::fs::create_dir_all(&stage).unwrap();
    std::fs::create_dir_all(&publish).unwrap();

    let runtime = Arc::new(RuntimeConfig {
        stage_root: stage.clone(),
        publish_root: publish.clone(),
        audit_log_path: dir.path().join("audit.jsonl"),
        policy_file: dir.path().join("tools.yaml"),
        policy_dir: dir.path().join("tools.d"),
        docker_socket: dir.path().join("docker.sock"),
        output_truncate_limit: output_cap,
        ..RuntimeConfig::default()
    });
    // The policy feature probe wants a file to exist.
    std::fs::write(&runtime.policy_file, "tools: {}\n").unwrap();

    let policy = Arc::new(PolicyConfig {
        output_truncate_limit: output_cap,
        default_timeout_sec: 30,
        audit_log_path: runtime.audit_log_path.display().to_string(),
        stage_root: stage,
        publish_root: publish,
        allowed_extensions: vec![".md".to_string(), ".markdown".to_string()],
    });

    let ctx = ToolContext {
        audit: Arc::new(AuditLog::new(&runtime.audit_log_path, &[])),
        notifier: Arc::new(Notifier::disabled()),
        features: Arc::new(FeatureDetector::new(Arc::clone(&runtime))),
        policy,
        runtime,
    };

    let registry = Arc::new(ToolRegistry::build(tools).unwrap());
    Harness {
        dir,
        dispatcher: Dispatcher::new(registry, ctx),
    }
}

pub fn tool(name: &str, schema: Value, command: &[&str]) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: format!("{name} test tool"),
        args_schema: schema,
        command: command.iter().map(|s| s.to_string()).collect(),
        mutates: false,
        requires_confirm: false,
        timeout_sec: 10,
        notify: Vec::new(),
    }
}

pub fn blog_stage_tool() -> ToolDefinition {
    tool(
        "blog_stage_markdown",
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string"}
            },
            "required": ["file_path"],
            "additionalProperties": false
        }),
        &[],
    )
}

pub fn blog_publish_tool() -> ToolDefinition {
    let mut def = tool(
        "blog_publish_static",
        json!({
            "type": "object",
            "properties": {
                "source_files": {
                    "type": "array",
                    "items": {"type": "string"},
                    "minItems": 1
                },
                "_confirm": {"type": ["boolean", "string", "integer"]}
            },
            "required": ["source_files"],
            "additionalProperties": false
        }),
        &[],
    );
    def.mutates = true;
    def.requires_confirm = true;
    def.notify = vec![NotifyEvent::Failure, NotifyEvent::NeedConfirm];
    def
}

pub fn write_staged_file(stage_root: &Path, name: &str, content: &str) {
    std::fs::write(stage_root.join(name), content).unwrap();
}
