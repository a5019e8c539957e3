//! The protocol engine: read a line, answer a line.
//!
//! One request is in flight at a time per engine instance and responses
//! are written in request order. Every per-request failure becomes an
//! envelope; only EOF ends the loop.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::audit::AuditLog;
use crate::config::RuntimeConfig;
use crate::dispatch::Dispatcher;
use crate::errors::PolicyError;
use crate::features::FeatureDetector;
use crate::mcp::envelope::Envelope;
use crate::mcp::request::{self, McpRequest, Method, ParseError};
use crate::notify::Notifier;
use crate::policy::{LoadSummary, PolicyLoader};
use crate::ratelimit::RateWindow;
use crate::tools::ToolContext;

/// Engine-level limit: 60 requests per sliding minute.
const REQUESTS_PER_MINUTE: usize = 60;

pub struct Engine {
    dispatcher: Dispatcher,
    limiter: std::sync::Mutex<RateWindow>,
}

impl Engine {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            limiter: std::sync::Mutex::new(RateWindow::per_minute(REQUESTS_PER_MINUTE)),
        }
    }

    /// Wire up a complete engine from runtime configuration: audit log,
    /// notification fan-out, feature detector, policy registry. Policy
    /// failure is fatal to the caller.
    pub fn bootstrap(runtime: Arc<RuntimeConfig>) -> Result<(Self, LoadSummary), PolicyError> {
        let load = PolicyLoader::from_config(&runtime).load(&runtime)?;

        let audit = Arc::new(AuditLog::new(
            &runtime.audit_log_path,
            &runtime.audit_sensitive_env_vars,
        ));
        let notifier = Arc::new(Notifier::from_env(runtime.notifications_enabled));
        let features = Arc::new(FeatureDetector::new(Arc::clone(&runtime)));

        let ctx = ToolContext {
            runtime,
            policy: Arc::new(load.config),
            audit,
            notifier,
            features,
        };
        let dispatcher = Dispatcher::new(Arc::new(load.registry), ctx);
        Ok((Self::new(dispatcher), load.summary))
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Handle one parsed request.
    pub async fn handle_request(&self, request: &McpRequest) -> Envelope {
        let start = Instant::now();
        match request.method {
            Method::ListTools => {
                let tools = self.dispatcher.registry().metadata();
                Envelope::success(
                    format!("Available tools: {} tools found", tools.len()),
                    start.elapsed().as_millis() as u64,
                )
                .with_data(json!({"tools": tools}))
            }
            Method::CallTool => {
                let Some(name) = request.name.as_deref() else {
                    return Envelope::failure(
                        "Missing tool name",
                        "call_tool requires a tool name",
                        1,
                        start.elapsed().as_millis() as u64,
                    );
                };
                // Catch panics at the dispatch boundary; the loop continues.
                let dispatcher = self.dispatcher.clone();
                let name = name.to_string();
                let args = request.args.clone();
                match tokio::spawn(async move { dispatcher.execute(&name, &args).await }).await {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::error!(error = %e, "tool dispatch aborted unexpectedly");
                        Envelope::failure(
                            "Internal server error",
                            "Internal processing error",
                            1,
                            start.elapsed().as_millis() as u64,
                        )
                    }
                }
            }
        }
    }

    /// Handle one raw input line. Returns `None` for blank lines.
    pub async fn handle_line(&self, line: &str) -> Option<Envelope> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        let admitted = {
            let mut limiter = match self.limiter.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            limiter.try_acquire()
        };
        if !admitted {
            return Some(Envelope::failure(
                "Rate limit exceeded",
                format!("limit is {REQUESTS_PER_MINUTE} requests per minute"),
                1,
                0,
            ));
        }

        match request::parse_request(trimmed) {
            Ok(req) => Some(self.handle_request(&req).await),
            Err(ParseError::UnsupportedMethod(method)) => Some(Envelope::failure(
                "Method not supported",
                format!("unsupported method: {method}"),
                1,
                0,
            )),
            Err(e) => Some(Envelope::failure("Request parsing failed", e.to_string(), 1, 0)),
        }
    }

    /// The protocol loop: read framed requests until EOF, answer each on
    /// one line, flush after every response.
    pub async fn run<R, W>(&self, mut reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!("protocol loop started");
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line).await?;
            if read == 0 {
                tracing::info!("EOF received, protocol loop terminating");
                break;
            }
            if let Some(mut envelope) = self.handle_line(&line).await {
                envelope.sanitize();
                let serialized = serde_json::to_string(&envelope).unwrap_or_else(|_| {
                    // Fallback that cannot fail to serialize.
                    r#"{"ok":false,"summary":"Internal server error","error":"response serialization failed","metrics":{"elapsed_ms":0,"exit_code":1}}"#.to_string()
                });
                writer.write_all(serialized.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }
}
