//! The stdio MCP engine.
//!
//! Reads line-delimited JSON requests on stdin, writes one envelope per
//! request on stdout, and keeps every diagnostic on stderr so the
//! protocol stream stays clean. Policy or environment failures at
//! startup exit non-zero; after startup, every failure is an envelope.

use std::sync::Arc;

use clap::Parser;
use opsgate_core::mcp::Engine;
use opsgate_core::RuntimeConfig;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "opsgate-mcp-server", version, about = "Policy-gated MCP tool server")]
struct Args {
    /// Base policy file (overrides POLICY_FILE).
    #[arg(long)]
    policy_file: Option<std::path::PathBuf>,

    /// Overlay policy directory (overrides POLICY_DIR).
    #[arg(long)]
    policy_dir: Option<std::path::PathBuf>,

    /// Validate the policy and exit without serving.
    #[arg(long)]
    check: bool,
}

/// Diagnostics go to stderr, never stdout (the protocol stream). When
/// `LOG_DIR` is set, logs are mirrored into a file there as well.
fn init_logging() {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let log_file = std::env::var("LOG_DIR").ok().and_then(|dir| {
        std::fs::create_dir_all(&dir).ok()?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(std::path::Path::new(&dir).join("opsgate-mcp.log"))
            .ok()
    });

    match log_file {
        Some(file) => builder
            .with_writer(std::io::stderr.and(std::sync::Mutex::new(file)))
            .init(),
        None => builder.with_writer(std::io::stderr).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    let mut config = RuntimeConfig::from_env();
    if let Some(policy_file) = args.policy_file {
        config.policy_file = policy_file;
    }
    if let Some(policy_dir) = args.policy_dir {
        config.policy_dir = policy_dir;
    }

    tracing::info!(
        config = %config.startup_summary(),
        "starting {} v{}", config.server_name, config.server_version
    );

    let environment_errors = config.validate_environment();
    if !environment_errors.is_empty() {
        for error in &environment_errors {
            tracing::error!("environment validation failed: {error}");
        }
        std::process::exit(1);
    }

    let config = Arc::new(config);
    let (engine, summary) = match Engine::bootstrap(Arc::clone(&config)) {
        Ok(built) => built,
        Err(e) => {
            tracing::error!(error = %e, "cannot start without a valid policy");
            std::process::exit(1);
        }
    };

    tracing::info!(
        tools = engine.dispatcher().registry().len(),
        enabled = summary.enabled,
        disabled = summary.disabled,
        invalid = summary.invalid.len(),
        "policy engine initialized"
    );

    if args.check {
        println!(
            "{}",
            serde_json::json!({
                "ok": true,
                "tools": engine.dispatcher().registry().names(),
                "summary": summary,
            })
        );
        return Ok(());
    }

    tracing::info!("server ready, waiting for requests on stdin");
    engine
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;

    tracing::info!("shutdown complete");
    Ok(())
}
