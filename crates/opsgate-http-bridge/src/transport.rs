//! Engine transport: how the bridge reaches the MCP engine.
//!
//! The HTTP contract is identical whether the engine runs as a
//! per-request subprocess speaking the protocol on its stdio, or
//! in-process. Both variants answer with an envelope `Value`; transport
//! failures are themselves envelopes.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use opsgate_core::mcp::Engine;
use opsgate_core::tools::exec::sanitized_env;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

pub enum EngineTransport {
    /// Spawn the stdio engine for each request.
    Subprocess { command: Vec<String> },
    /// Dispatch directly into an engine living in this process.
    InProcess { engine: Arc<Engine> },
}

impl EngineTransport {
    /// Forward one normalized request and return the response envelope.
    pub async fn call(&self, request: &Value, timeout: Duration) -> Value {
        let start = Instant::now();
        let mut response = match self {
            EngineTransport::Subprocess { command } => {
                call_subprocess(command, request, timeout, start).await
            }
            EngineTransport::InProcess { engine } => call_in_process(engine, request).await,
        };

        // The bridge owns the observed wall time; exit_code defaults from
        // `ok` when the engine did not provide one.
        if let Some(obj) = response.as_object_mut() {
            let metrics = obj.entry("metrics").or_insert_with(|| json!({}));
            if let Some(metrics) = metrics.as_object_mut() {
                metrics.insert(
                    "elapsed_ms".to_string(),
                    json!(start.elapsed().as_millis() as u64),
                );
            }
        }
        ensure_exit_code(&mut response);
        response
    }
}

fn ensure_exit_code(response: &mut Value) {
    let ok = response.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if let Some(metrics) = response.get_mut("metrics").and_then(Value::as_object_mut) {
        metrics
            .entry("exit_code".to_string())
            .or_insert(json!(if ok { 0 } else { 1 }));
    }
}

async fn call_in_process(engine: &Engine, request: &Value) -> Value {
    let line = request.to_string();
    match engine.handle_line(&line).await {
        Some(mut envelope) => {
            envelope.sanitize();
            serde_json::to_value(&envelope).unwrap_or_else(|_| internal_error_envelope())
        }
        None => internal_error_envelope(),
    }
}

async fn call_subprocess(
    command: &[String],
    request: &Value,
    timeout: Duration,
    start: Instant,
) -> Value {
    let Some((program, args)) = command.split_first() else {
        return error_envelope("MCP engine communication failed", "engine command is empty", 1);
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env_clear()
        .envs(sanitized_env())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!(error = %e, "failed to spawn MCP engine");
            return error_envelope(
                "MCP engine communication failed",
                "failed to launch the MCP engine",
                1,
            );
        }
    };

    let exchange = async {
        let mut stdin = child.stdin.take()?;
        let line = format!("{request}\n");
        stdin.write_all(line.as_bytes()).await.ok()?;
        stdin.shutdown().await.ok()?;
        drop(stdin);

        let stdout = child.stdout.take()?;
        let mut reader = BufReader::new(stdout);
        let mut response_line = String::new();
        reader.read_line(&mut response_line).await.ok()?;
        Some(response_line)
    };

    let response_line = match tokio::time::timeout(timeout, exchange).await {
        Ok(line) => line,
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return json!({
                "ok": false,
                "summary": "MCP engine timeout",
                "error": format!(
                    "MCP engine did not respond within timeout period ({}s)",
                    timeout.as_secs()
                ),
                "metrics": {
                    "elapsed_ms": start.elapsed().as_millis() as u64,
                    "exit_code": 124,
                },
            });
        }
    };

    let status = child.wait().await.ok();
    let response_line = response_line.unwrap_or_default();

    if response_line.trim().is_empty() {
        if let Some(status) = status {
            if !status.success() {
                tracing::warn!(?status, "MCP engine process failed");
                return error_envelope(
                    "MCP engine process failed",
                    format!("engine exited with {status}"),
                    status.code().unwrap_or(1),
                );
            }
        }
        return error_envelope(
            "Empty response from MCP engine",
            "no response received from the MCP engine",
            1,
        );
    }

    match serde_json::from_str::<Value>(response_line.trim()) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::error!(error = %e, "invalid JSON from MCP engine");
            error_envelope(
                "Response parsing failed",
                "invalid JSON from the MCP engine",
                1,
            )
        }
    }
}

pub fn error_envelope(summary: &str, error: impl Into<String>, exit_code: i32) -> Value {
    json!({
        "ok": false,
        "summary": summary,
        "error": error.into(),
        "metrics": {"elapsed_ms": 0, "exit_code": exit_code},
    })
}

fn internal_error_envelope() -> Value {
    error_envelope("Internal server error", "Internal processing error", 1)
}
