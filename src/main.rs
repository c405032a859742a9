use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use car_rental_api::config::{AppConfig, LoggingConfig};
use car_rental_api::http::{self, HttpServer};
use car_rental_api::ratelimit::{CleanupTask, FileAbuseSink, LimitConfig, RateLimiter};

#[derive(Parser, Debug)]
#[command(name = "car-rental-api")]
#[command(about = "Car rental REST API with per-client rate limiting")]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listen address
    #[arg(short, long)]
    addr: Option<SocketAddr>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if args.log_json {
        config.logging.json = true;
    }

    init_tracing(&config.logging);

    info!("Starting Car Rental API");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        addr = %config.server.addr,
        environment = %config.server.environment,
        "Configuration loaded"
    );

    let (abuse_sink, abuse_writer) = FileAbuseSink::spawn(&config.rate_limiting.abuse_log_path);
    let rate_limiter = Arc::new(RateLimiter::new(
        LimitConfig::from(&config.rate_limiting),
        Arc::new(abuse_sink),
    ));
    let cleanup = CleanupTask::start(
        rate_limiter.clone(),
        Duration::from_millis(config.rate_limiting.cleanup_interval_ms),
    );
    info!(
        max_requests = config.rate_limiting.max_requests,
        window_ms = config.rate_limiting.window_ms,
        abuse_log = %config.rate_limiting.abuse_log_path.display(),
        "Rate limiter initialized"
    );

    let router = http::router(&config.server, rate_limiter.clone());
    let server = HttpServer::bind(config.server.addr, router).await?;

    info!("Starting HTTP server on {}", server.local_addr()?);

    server.serve_with_shutdown(shutdown_signal()).await?;

    cleanup.shutdown().await;
    // The writer drains once the limiter, the last holder of the sink, is gone.
    drop(rate_limiter);
    if tokio::time::timeout(Duration::from_secs(5), abuse_writer).await.is_err() {
        info!("Abuse log writer did not drain in time");
    }

    info!("Car Rental API stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
