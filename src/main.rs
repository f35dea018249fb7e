//! Main entry point for the skillqueue matchmaking service
//!
//! Loads configuration, initializes logging, starts the service and shuts it
//! down gracefully on SIGINT or SIGTERM.

use anyhow::Result;
use clap::Parser;
use skillqueue::config::{validate_config, AppConfig};
use skillqueue::service::AppState;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

/// Skillqueue - skill-based 1v1 matchmaking over AMQP
#[derive(Parser)]
#[command(
    name = "skillqueue",
    version,
    about = "Skill-based 1v1 matchmaking service",
    long_about = "Skillqueue consumes match requests from an AMQP topic, queues players by \
                 difficulty and session duration in skill order, pairs them on a periodic sweep \
                 whose skill window widens with waiting time, and publishes queue updates and \
                 match batches back to the broker."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// AMQP URL override
    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    /// Health port override
    #[arg(long, value_name = "PORT", help = "Override health and metrics port")]
    health_port: Option<u16>,

    /// Match range override
    #[arg(long, value_name = "SKILL", help = "Override base skill match range")]
    match_range: Option<f64>,

    /// Tick interval override
    #[arg(long, value_name = "MS", help = "Override sweep interval in milliseconds")]
    tick_interval_ms: Option<u64>,

    /// Run without a broker
    #[arg(
        long,
        help = "Run without AMQP: nothing is consumed and outbound events are only logged"
    )]
    no_broker: bool,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
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
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig, no_broker: bool) {
    let mm = &config.matchmaking;
    info!("🚀 Skillqueue Matchmaking Service v{}", skillqueue::VERSION);
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    if no_broker {
        info!("   AMQP: disabled");
    } else {
        info!("   AMQP: {} (exchange {})", config.amqp.url, config.amqp.exchange_name);
        info!(
            "   Topics: in={} updates={} matches={}",
            config.amqp.request_topic, config.amqp.queue_update_topic, config.amqp.match_found_topic
        );
    }
    info!(
        "   Match range: {} (+{} per second waited)",
        mm.match_range, mm.time_decay_multiplier
    );
    info!("   Sweep interval: {}ms", mm.tick_interval_ms);
    info!("   Durations: {:?} minutes", mm.durations_minutes);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load configuration from file or environment, then apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(config_path) => AppConfig::from_file(config_path)?,
        None => AppConfig::from_env()?,
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }

    if let Some(health_port) = args.health_port {
        config.service.health_port = health_port;
    }

    if let Some(match_range) = args.match_range {
        config.matchmaking.match_range = match_range;
    }

    if let Some(tick_interval_ms) = args.tick_interval_ms {
        config.matchmaking.tick_interval_ms = tick_interval_ms;
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {:#}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    display_startup_banner(&config, args.no_broker);

    if args.dry_run {
        info!("Configuration validation successful");
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    let app_state = if args.no_broker {
        AppState::without_broker(config.clone())
    } else {
        AppState::new(config.clone()).await
    };
    let mut app_state = match app_state {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize service: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        if let Err(e) = app_state.shutdown(config.shutdown_timeout()).await {
            warn!("Cleanup after failed start did not complete: {}", e);
        }
        std::process::exit(1);
    }

    info!("✅ Skillqueue is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;

    info!("🛑 Shutdown signal received, draining engine...");

    match app_state.shutdown(config.shutdown_timeout()).await {
        Ok(()) => info!("✅ Graceful shutdown completed successfully"),
        Err(e) => warn!("⚠️  Shutdown did not complete cleanly: {}", e),
    }

    info!("🛑 Skillqueue stopped");
    Ok(())
}
