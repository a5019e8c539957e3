//! HTTP bridge binary.

use std::sync::Arc;

use clap::Parser;
use opsgate_http_bridge::transport::EngineTransport;
use opsgate_http_bridge::{serve, BridgeState};
use opsgate_core::RuntimeConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "opsgate-http-bridge", version, about = "HTTP bridge for the opsgate MCP engine")]
struct Args {
    /// Command used to spawn the MCP engine (overrides MCP_ENGINE_CMD).
    #[arg(long)]
    engine_cmd: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Arc::new(RuntimeConfig::from_env());

    let engine_cmd = args
        .engine_cmd
        .or_else(|| std::env::var("MCP_ENGINE_CMD").ok())
        .unwrap_or_else(|| "opsgate-mcp-server".to_string());
    let command: Vec<String> = engine_cmd.split_whitespace().map(String::from).collect();
    if command.is_empty() {
        anyhow::bail!("engine command is empty");
    }

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(
        %addr,
        engine = %engine_cmd,
        rate_limiting = !config.rate_limit_disabled,
        "HTTP bridge starting, /health and /mcp available"
    );

    let state = Arc::new(BridgeState::new(
        config,
        EngineTransport::Subprocess { command },
    ));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve(state, listener).await?;
    Ok(())
}
