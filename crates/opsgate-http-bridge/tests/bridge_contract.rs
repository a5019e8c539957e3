//! End-to-end bridge contract: always HTTP 200 on /mcp, shape
//! normalization, health reporting. Runs against an in-process engine
//! built from a real policy load.

use std::net::SocketAddr;
use std::sync::Arc;

use opsgate_core::mcp::Engine;
use opsgate_core::RuntimeConfig;
use opsgate_http_bridge::transport::EngineTransport;
use opsgate_http_bridge::{serve, BridgeState};
use serde_json::{json, Value};
use tempfile::TempDir;

const POLICY: &str = r#"
tools:
  disk_space:
    description: "Report disk usage"
    args_schema:
      type: object
      additionalProperties: false
    command: ["/bin/echo", "disk ok"]
    mutates: false
    requires_confirm: false
    timeout_sec: 10
"#;

struct TestBridge {
    _dir: TempDir,
    base_url: String,
    client: reqwest::Client,
}

impl TestBridge {
    async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("stage")).unwrap();
        std::fs::create_dir_all(dir.path().join("publish")).unwrap();
        std::fs::write(dir.path().join("tools.yaml"), POLICY).unwrap();

        let config = Arc::new(RuntimeConfig {
            policy_file: dir.path().join("tools.yaml"),
            policy_dir: dir.path().join("tools.d"),
            audit_log_path: dir.path().join("audit.jsonl"),
            stage_root: dir.path().join("stage"),
            publish_root: dir.path().join("publish"),
            docker_socket: dir.path().join("docker.sock"),
            notifications_enabled: false,
            ..RuntimeConfig::default()
        });

        let (engine, _summary) = Engine::bootstrap(Arc::clone(&config)).unwrap();
        let state = Arc::new(BridgeState::new(
            config,
            EngineTransport::InProcess {
                engine: Arc::new(engine),
            },
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = serve(state, listener).await;
        });

        Self {
            _dir: dir,
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
        }
    }

    async fn post_mcp(&self, body: &str) -> (u16, Value) {
        let response = self
            .client
            .post(format!("{}/mcp", self.base_url))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        let body: Value = response.json().await.unwrap();
        (status, body)
    }
}

fn strip_elapsed(mut envelope: Value) -> Value {
    if let Some(metrics) = envelope.get_mut("metrics").and_then(Value::as_object_mut) {
        metrics.remove("elapsed_ms");
    }
    envelope
}

#[tokio::test]
async fn health_reports_required_fields_with_200() {
    let bridge = TestBridge::start().await;
    let response = bridge
        .client
        .get(format!("{}/health", bridge.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let body: Value = response.json().await.unwrap();
    for field in [
        "status",
        "server_name",
        "version",
        "tools_available",
        "notifications_enabled",
        "docker_available",
        "strict_security_mode",
        "policy_loaded",
        "uptime_seconds",
    ] {
        assert!(body.get(field).is_some(), "missing {field}");
    }
    // Policy loads and the in-process engine answers, so status is ok.
    assert_eq!(body["status"], "ok");
    assert_eq!(body["tools_available"], 1);
    assert_eq!(body["policy_loaded"], true);
    assert_eq!(body["docker_available"], false);
}

#[tokio::test]
async fn direct_and_wrapped_shapes_produce_identical_envelopes() {
    let bridge = TestBridge::start().await;

    let (status_a, direct) = bridge
        .post_mcp(r#"{"id":"a","method":"call_tool","name":"disk_space","args":{}}"#)
        .await;
    let (status_b, wrapped) = bridge
        .post_mcp(r#"{"id":"a","method":"call_tool","params":{"name":"disk_space","args":{}}}"#)
        .await;

    assert_eq!(status_a, 200);
    assert_eq!(status_b, 200);
    assert_eq!(direct["ok"], true);
    assert_eq!(strip_elapsed(direct), strip_elapsed(wrapped));
}

#[tokio::test]
async fn list_tools_round_trip() {
    let bridge = TestBridge::start().await;
    let (status, body) = bridge.post_mcp(r#"{"method":"list_tools"}"#).await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);
    assert_eq!(body["data"]["tools"][0]["name"], "disk_space");
    assert_eq!(body["data"]["tools"][0]["inputSchema"]["type"], "object");
}

#[tokio::test]
async fn malformed_body_still_returns_200_with_envelope() {
    let bridge = TestBridge::start().await;
    let (status, body) = bridge.post_mcp("this is not json").await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], false);
    assert_eq!(body["summary"], "Request validation failed");
    assert!(body["data"]["suggestion"].as_str().is_some());
}

#[tokio::test]
async fn oversized_body_is_rejected_with_200() {
    let bridge = TestBridge::start().await;
    let big = format!(
        r#"{{"method":"call_tool","name":"disk_space","args":{{"x":"{}"}}}}"#,
        "a".repeat(11 * 1024)
    );
    let (status, body) = bridge.post_mcp(&big).await;
    assert_eq!(status, 200);
    assert_eq!(body["summary"], "Request too large");
}

#[tokio::test]
async fn unsupported_method_is_rejected_with_suggestion() {
    let bridge = TestBridge::start().await;
    let (status, body) = bridge.post_mcp(r#"{"method":"delete_everything"}"#).await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], false);
    assert!(body["data"]["suggestion"].as_str().is_some());
}

#[tokio::test]
async fn invalid_tool_name_is_rejected_before_dispatch() {
    let bridge = TestBridge::start().await;
    let (status, body) = bridge
        .post_mcp(r#"{"method":"call_tool","name":"../../bin/sh","args":{}}"#)
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], false);
    assert_eq!(body["summary"], "Request validation failed");
}

#[tokio::test]
async fn unknown_tool_flows_through_the_engine() {
    let bridge = TestBridge::start().await;
    let (status, body) = bridge
        .post_mcp(r#"{"method":"call_tool","name":"ghost","args":{}}"#)
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["summary"], "Unknown tool");
    assert!(body["metrics"]["exit_code"].is_i64());
    assert!(body["metrics"]["elapsed_ms"].is_u64());
}
