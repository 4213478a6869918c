use clap::Parser;
use portico_bridge::backend::ToolBackend;
use portico_bridge::bridge::StdioBridge;
use portico_bridge::config::BridgeConfig;
use portico_bridge::error::BridgeError;
use portico_bridge::server::{self, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Expose a stdio tool server as an authenticated HTTP API.
#[derive(Debug, Parser)]
#[command(name = "portico-bridge", version)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Address to listen on.
    #[arg(long, env = "PORTICO_BIND", default_value = "127.0.0.1:8000")]
    bind: SocketAddr,

    /// Pre-shared API key every request must present.
    #[arg(long, env = "PORTICO_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Log filter (tracing env-filter syntax); RUST_LOG wins when set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines instead of human-readable output.
    #[arg(long)]
    log_json: bool,
}

// Distinct exit codes let an external supervisor tell a bad deployment
// (config or child never came up) from a crash at runtime.
const EXIT_STARTUP: u8 = 10;
const EXIT_DISCOVERY: u8 = 11;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = match BridgeConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ BridgeError::Startup(_)) => {
            tracing::error!(error = %e, "startup failed");
            ExitCode::from(EXIT_STARTUP)
        }
        Err(e @ BridgeError::Discovery(_)) => {
            tracing::error!(error = %e, "tool discovery failed");
            ExitCode::from(EXIT_DISCOVERY)
        }
        Err(e) => {
            tracing::error!(error = %e, "gateway terminated unexpectedly");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(cli: &Cli) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli, config: BridgeConfig) -> Result<(), BridgeError> {
    let bridge = StdioBridge::start(config).await?;
    let backend: Arc<dyn ToolBackend> = bridge.clone();

    let app = server::router(AppState {
        backend,
        api_key: cli.api_key,
    });

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .map_err(|e| BridgeError::Startup(format!("failed to bind {}: {e}", cli.bind)))?;
    tracing::info!(addr = %cli.bind, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    bridge.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        _ = terminate => {},
    }
}
