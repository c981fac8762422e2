use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use turnstile::config::TurnstileConfig;
use turnstile::metrics::{LogSink, MetricsEmitter};
use turnstile::ratelimit::{spawn_cleanup, RateLimiterFactory};
use turnstile::service::AdmissionService;

/// Admission control rate limiter reading `<limiter> <identifier> [cost]` lines from stdin.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting Turnstile admission service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TurnstileConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    info!(
        cleanup_interval_secs = config.service.cleanup_interval_secs,
        metrics_interval_secs = config.service.metrics_interval_secs,
        "Configuration loaded"
    );

    let factory = RateLimiterFactory::new();
    let limiters = config
        .build_limiters(&factory)
        .context("failed to build limiters")?;

    // Both tasks share the factory's store and clock with every limiter.
    let cleanup = spawn_cleanup(
        factory.store().clone(),
        factory.clock().clone(),
        config.service.cleanup_interval(),
    );

    let emitter = limiters.iter().fold(
        MetricsEmitter::new(Arc::new(LogSink)).top_blocked(config.service.top_blocked),
        |emitter, (name, limiter)| emitter.register(name.clone(), limiter.clone()),
    );
    let emitter = Arc::new(emitter);
    let metrics = emitter.clone().spawn(config.service.metrics_interval());

    let service = AdmissionService::new(limiters);
    info!("Reading admission requests from stdin");

    let interrupted = tokio::select! {
        result = service.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout()) => {
            if let Err(err) = result {
                error!(error = %err, "Admission service failed");
            }
            false
        }
        _ = shutdown_signal() => true,
    };

    metrics.shutdown().await;
    cleanup.shutdown().await;
    emitter.emit().await;

    info!("Turnstile admission service stopped");
    if interrupted {
        // A pending stdin read would keep the runtime from shutting down.
        std::process::exit(0);
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Pretty => builder.with_thread_ids(true).init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
