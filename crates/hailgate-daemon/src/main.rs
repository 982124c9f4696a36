// crates/hailgate-daemon/src/main.rs
//
// Binary entrypoint for the Hailgate daemon.
//
// Initializes tracing, parses CLI arguments, loads configuration, starts
// the RPC server, and blocks until a termination signal arrives before
// draining in-flight calls and exiting.

mod config;

use std::time::Duration;

use clap::Parser;
use config::DaemonConfig;

use hailgate_rpc::{GreeterRpcServer, RpcConfig};

/// Hailgate daemon — greeting RPC server with per-connection call limits.
#[derive(Parser, Debug)]
#[command(
    name = "hailgate-daemon",
    version = "0.1.0",
    about = "Hailgate greeting RPC daemon"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "~/.hailgate/config.toml")]
    config: String,

    /// Override the configured listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the configured per-connection call threshold.
    #[arg(long)]
    call_threshold: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration from TOML file, falling back to defaults if the
    // file is not found. The load outcome is logged once tracing is up.
    let config_path = expand_tilde(&args.config);
    let (mut daemon_config, load_error) = match DaemonConfig::load(&config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (DaemonConfig::default(), Some(e.to_string())),
    };

    // CLI flags override config-file values.
    if let Some(port) = args.port {
        daemon_config.port = port;
    }
    if let Some(threshold) = args.call_threshold {
        daemon_config.call_threshold = threshold;
    }

    // Initialize tracing subscriber for structured logging; RUST_LOG takes
    // precedence over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&daemon_config.log_level)),
        )
        .init();

    match load_error {
        None => tracing::info!("loaded configuration from {}", config_path),
        Some(e) => tracing::warn!(
            "could not load config from {}: {}. Using defaults.",
            config_path,
            e
        ),
    }

    tracing::info!("Hailgate daemon v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "listen address: {}:{}",
        daemon_config.host,
        daemon_config.port
    );
    tracing::info!(
        "per-connection call threshold: {}",
        daemon_config.call_threshold
    );
    tracing::info!(
        "shutdown drain timeout: {}s",
        daemon_config.shutdown_timeout_secs
    );

    let server = GreeterRpcServer::new(RpcConfig {
        host: daemon_config.host.clone(),
        port: daemon_config.port,
        call_threshold: daemon_config.call_threshold,
    });

    // A bind failure propagates out of main and the process exits non-zero.
    let handle = server.start().await?;
    tracing::info!("server started, listening on {}", handle.local_addr());

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining in-flight calls");
    handle
        .stop(Duration::from_secs(daemon_config.shutdown_timeout_secs))
        .await;
    tracing::info!("Hailgate daemon shut down gracefully");

    Ok(())
}

/// Resolves when the process is asked to terminate: ctrl-c everywhere,
/// plus SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("failed to listen for ctrl-c: {}", e);
                }
                return;
            }
        };

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("failed to listen for ctrl-c: {}", e);
                }
            }
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
        }
    }
}

/// Expand `~` at the start of a path to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{}", home.display(), &path[1..]);
        }
    }
    path.to_string()
}
