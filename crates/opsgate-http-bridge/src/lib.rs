//! The HTTP bridge: a stable REST contract in front of the MCP engine.
//!
//! `GET /health` always answers 200 with a status body; `POST /mcp`
//! always answers 200 with a response envelope, errors included. The
//! engine behind the bridge is an opaque transport (subprocess or
//! in-process) and the HTTP contract does not depend on which.

pub mod transport;

use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use opsgate_core::features::Feature;
use opsgate_core::ratelimit::KeyedRateLimiter;
use opsgate_core::schema;
use opsgate_core::{FeatureDetector, RuntimeConfig};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;

use transport::{error_envelope, EngineTransport};

/// Maximum accepted request body on `/mcp`.
const MAX_REQUEST_BYTES: usize = 10 * 1024;
/// Hard timeout for one engine call, on top of per-tool timeouts.
const ENGINE_CALL_TIMEOUT: Duration = Duration::from_secs(60);
/// Engine probe timeout used by `/health`.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Health responses are cached this long.
const HEALTH_CACHE_TTL: Duration = Duration::from_secs(30);
/// Per-remote-address request budget per minute.
const REQUESTS_PER_MINUTE: usize = 60;

fn tool_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[A-Za-z0-9_]+$").expect("static pattern"))
}

pub struct BridgeState {
    pub config: Arc<RuntimeConfig>,
    pub transport: EngineTransport,
    pub features: Arc<FeatureDetector>,
    started: Instant,
    health_cache: Mutex<Option<(Instant, Value)>>,
    limiter: Option<KeyedRateLimiter<IpAddr>>,
}

impl BridgeState {
    pub fn new(config: Arc<RuntimeConfig>, transport: EngineTransport) -> Self {
        let limiter = if config.rate_limit_disabled {
            None
        } else {
            Some(KeyedRateLimiter::new(
                REQUESTS_PER_MINUTE,
                Duration::from_secs(60),
            ))
        };
        Self {
            features: Arc::new(FeatureDetector::new(Arc::clone(&config))),
            config,
            transport,
            started: Instant::now(),
            health_cache: Mutex::new(None),
            limiter,
        }
    }
}

pub fn router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route("/health", get(health_endpoint))
        .route("/mcp", post(mcp_endpoint))
        .with_state(state)
}

/// Serve the bridge until the task is dropped.
pub async fn serve(state: Arc<BridgeState>, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    let app = router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

async fn health_endpoint(State(state): State<Arc<BridgeState>>) -> Json<Value> {
    {
        let cache = state.health_cache.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((at, body)) = cache.as_ref() {
            if at.elapsed() < HEALTH_CACHE_TTL {
                return Json(body.clone());
            }
        }
    }

    let probe = state
        .transport
        .call(
            &json!({"id": "health-check", "method": "list_tools", "params": {}}),
            HEALTH_PROBE_TIMEOUT,
        )
        .await;
    let engine_ok = probe.get("ok").and_then(Value::as_bool).unwrap_or(false);
    let tools_available = probe
        .get("data")
        .and_then(|d| d.get("tools"))
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);

    let docker_available = state.features.check(Feature::Docker).await.available;
    let notifications_enabled = state.features.check(Feature::Notifications).await.available;
    let policy_loaded = state.features.check(Feature::Policy).await.available;

    let status = if engine_ok && policy_loaded {
        "ok"
    } else if engine_ok || policy_loaded {
        "degraded"
    } else {
        "error"
    };

    let body = json!({
        "status": status,
        "server_name": state.config.server_name,
        "version": state.config.server_version,
        "tools_available": tools_available,
        "notifications_enabled": notifications_enabled,
        "docker_available": docker_available,
        "strict_security_mode": state.config.strict_security_mode,
        "policy_loaded": policy_loaded,
        "uptime_seconds": state.started.elapsed().as_secs(),
    });

    let mut cache = state.health_cache.lock().unwrap_or_else(|p| p.into_inner());
    *cache = Some((Instant::now(), body.clone()));
    Json(body)
}

/// `POST /mcp`: normalize, guard, forward. Always HTTP 200; failures are
/// expressed in the envelope body.
async fn mcp_endpoint(
    State(state): State<Arc<BridgeState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Json<Value> {
    if body.len() > MAX_REQUEST_BYTES {
        return Json(guard_failure(
            "Request too large",
            format!("request body exceeds maximum size of {MAX_REQUEST_BYTES} bytes"),
            "Reduce request payload size",
        ));
    }

    if let Some(limiter) = &state.limiter {
        if !limiter.try_acquire(&addr.ip()) {
            return Json(guard_failure(
                "Rate limit exceeded",
                format!("limit is {REQUESTS_PER_MINUTE} requests per minute per address"),
                "Reduce request frequency or set RATE_LIMIT_DISABLED=true for lab environments",
            ));
        }
    }

    let request: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "rejected malformed /mcp body");
            return Json(guard_failure(
                "Request validation failed",
                "invalid request format or parameters",
                "Send a JSON object with method, name/args or params",
            ));
        }
    };

    let normalized = match normalize_request(&request) {
        Ok(n) => n,
        Err(envelope) => return Json(envelope),
    };

    let response = state.transport.call(&normalized, ENGINE_CALL_TIMEOUT).await;
    Json(response)
}

/// Canonicalize the two accepted request shapes.
///
/// Direct: `{"id", "method", "name", "args"}`.
/// Wrapped: `{"id", "method", "params": {"name", "args"}}`.
fn normalize_request(request: &Value) -> Result<Value, Value> {
    let method = request
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            guard_failure(
                "Request validation failed",
                "missing required field: method",
                "Include a method of list_tools or call_tool",
            )
        })?;

    if method != "list_tools" && method != "call_tool" {
        return Err(guard_failure(
            "Request validation failed",
            format!("method must be one of: list_tools, call_tool (got '{method}')"),
            "Use list_tools or call_tool",
        ));
    }

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let params = request.get("params");

    if method == "list_tools" {
        return Ok(json!({
            "id": id,
            "method": "list_tools",
            "params": params.cloned().unwrap_or_else(|| json!({})),
        }));
    }

    let name = request
        .get("name")
        .or_else(|| params.and_then(|p| p.get("name")))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            guard_failure(
                "Request validation failed",
                "call_tool requires a tool name",
                "Provide name directly or inside params",
            )
        })?;

    if !tool_name_pattern().is_match(name) || name.len() > 100 {
        return Err(guard_failure(
            "Request validation failed",
            "tool name must contain only alphanumeric characters and underscores (max 100)",
            "Fix the tool name",
        ));
    }

    let args = request
        .get("args")
        .or_else(|| params.and_then(|p| p.get("args")))
        .cloned()
        .unwrap_or_else(|| json!({}));

    if let Err(e) = schema::check_complexity(&args, name) {
        return Err(guard_failure(
            "Request validation failed",
            e.message,
            "Reduce argument complexity",
        ));
    }

    Ok(json!({
        "id": id,
        "method": "call_tool",
        "name": name,
        "args": args,
    }))
}

fn guard_failure(summary: &str, error: impl Into<String>, suggestion: &str) -> Value {
    let mut envelope = error_envelope(summary, error, 1);
    envelope["data"] = json!({"suggestion": suggestion});
    envelope
}
