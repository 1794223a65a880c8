//! Warden gateway binary.
//!
//! Exit codes: 0 after a clean shutdown with the audit sink drained, 1 on an
//! unexpected runtime failure, 2 on refusal to start (invalid bundle or
//! configuration).

use audit_log::JsonlPartitionWriter;
use clap::Parser;
use gateway::{Gateway, GatewayConfig, SensitivityConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

/// Policy-enforcement gateway for MCP tool invocations.
#[derive(Debug, Parser)]
#[command(name = "warden", version)]
struct Args {
    /// Path to the policy bundle manifest (JSON).
    #[arg(long)]
    bundle: PathBuf,

    /// Sensitivity/classifier document (.toml or .json); defaults apply
    /// when omitted.
    #[arg(long)]
    sensitivity_config: Option<PathBuf>,

    /// Listen address; overrides WARDEN_LISTEN_ADDR.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Cache sweep interval in seconds.
    #[arg(long, default_value_t = 30)]
    sweep_interval_secs: u64,
}

#[derive(Debug, Error)]
enum StartupError {
    #[error("sensitivity config: {0}")]
    Sensitivity(#[from] gateway::ClassifierConfigError),
    #[error("configuration: {0}")]
    Config(#[from] gateway::ConfigError),
    #[error("audit writer: {0}")]
    Audit(#[from] audit_log::AuditError),
    #[error("read bundle {path}: {source}")]
    ReadBundle {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bundle is not valid JSON: {0}")]
    BundleJson(#[from] serde_json::Error),
    #[error("bundle rejected: {0}")]
    BundleRejected(#[from] policy::LoadError),
}

fn build(args: &Args) -> Result<(Arc<Gateway>, SocketAddr), StartupError> {
    let sensitivity = args
        .sensitivity_config
        .as_deref()
        .map(SensitivityConfig::from_path)
        .transpose()?;
    let mut config = GatewayConfig::from_env(sensitivity)?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    let writer = Arc::new(JsonlPartitionWriter::new(&config.audit_dir)?);
    let gw = Gateway::new(&config, writer);

    let raw = std::fs::read_to_string(&args.bundle).map_err(|source| {
        StartupError::ReadBundle { path: args.bundle.display().to_string(), source }
    })?;
    let manifest: serde_json::Value = serde_json::from_str(&raw)?;
    gw.reload_json(&manifest)?;

    Ok((Arc::new(gw), config.listen_addr))
}

async fn run(gw: Arc<Gateway>, addr: SocketAddr, sweep_interval: Duration) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, version = ?gw.policy_version(), "gateway listening");

    let sweeper = {
        let gw = Arc::clone(&gw);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                ticker.tick().await;
                let removed = gw.sweep_cache();
                if removed > 0 {
                    tracing::debug!(removed, "cache sweep");
                }
            }
        })
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    };
    gateway::http::serve(listener, Arc::clone(&gw), shutdown).await?;

    sweeper.abort();
    gw.shutdown()
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    info!("audit sink drained; exiting");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    telemetry::init_json_logging();
    let args = Args::parse();
    let sweep_interval = Duration::from_secs(args.sweep_interval_secs.max(1));

    let (gw, addr) = match build(&args) {
        Ok(built) => built,
        Err(err) => {
            error!(error = %err, "refusing to start");
            return ExitCode::from(2);
        }
    };

    match run(gw, addr, sweep_interval).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "gateway failed");
            ExitCode::from(1)
        }
    }
}
