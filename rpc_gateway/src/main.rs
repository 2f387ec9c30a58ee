//! Marketplace RPC Gateway - Main entry point
//!
//! Runs the gateway against the configured endpoints and reports endpoint
//! health until interrupted.

use clap::{Arg, ArgAction, Command};
use std::time::Duration;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marketplace_rpc_gateway::{
    config::GatewayConfig, error::Result, Gateway, GatewayError, SYSTEM_NAME, VERSION,
};

const DEFAULT_CONFIG_PATH: &str = "config/rpc-gateway.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let matches = Command::new("rpc-gateway")
        .version(VERSION)
        .about("Marketplace RPC Gateway - resilient JSON-RPC access with failover")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error); overrides the config file"),
        )
        .arg(
            Arg::new("probe")
                .long("probe")
                .help("Probe every endpoint once, print health and exit")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);

    // Configuration comes first so its log level can apply
    let config = GatewayConfig::load(config_path);
    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .or_else(|| config.as_ref().ok().map(|c| c.global.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    init_logging(&log_level)?;

    info!(version = VERSION, system = SYSTEM_NAME, "Starting RPC gateway");
    info!(config_path = config_path, "Loading configuration");

    let mut config = match config {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e);
        }
    };

    if matches.get_flag("probe") {
        config.health.enabled = false;
        return probe_endpoints(config).await;
    }

    let gateway = Gateway::start(config)?;

    tokio::select! {
        _ = report_status(&gateway) => {}
        _ = setup_shutdown_signal() => {
            info!("Shutdown signal received, stopping RPC gateway...");
        }
    }

    gateway.shutdown().await;
    Ok(())
}

/// Initialize logging with the specified level
fn init_logging(log_level: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => {
            eprintln!("Invalid log level: {}. Using 'info'", log_level);
            tracing::Level::INFO
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("marketplace_rpc_gateway={},rpc_gateway={}", level, level).into()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| GatewayError::internal(format!("failed to initialize logging: {}", e)))?;

    Ok(())
}

/// Run a single probe cycle and report per-endpoint health
async fn probe_endpoints(config: GatewayConfig) -> Result<()> {
    info!("Probing endpoints...");
    let gateway = Gateway::start(config)?;
    let summary = gateway.probe_once().await;

    for result in &summary.results {
        match &result.error {
            None => info!(
                endpoint = result.endpoint.as_str(),
                status = %result.status,
                response_time_ms = result.response_time_ms,
                "Endpoint probe"
            ),
            Some(e) => warn!(
                endpoint = result.endpoint.as_str(),
                status = %result.status,
                response_time_ms = result.response_time_ms,
                error = e.as_str(),
                "Endpoint probe"
            ),
        }
    }

    let report = serde_json::to_string_pretty(&summary)
        .map_err(|e| GatewayError::internal(format!("failed to encode probe report: {}", e)))?;
    println!("{}", report);

    let healthy = summary.healthy_count();
    let total = summary.results.len();
    gateway.shutdown().await;

    info!(healthy = healthy, total = total, "Probe completed");
    if healthy == 0 {
        return Err(GatewayError::transient("no endpoint passed its health probe"));
    }
    Ok(())
}

/// Periodically log endpoint health and the latest block height
async fn report_status(gateway: &Gateway) {
    let period = Duration::from_secs(gateway.config().global.status_interval_seconds.max(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let snapshot = gateway.health_snapshot();
        let healthy = snapshot.iter().filter(|e| e.is_healthy()).count();
        let unhealthy: Vec<&str> = snapshot
            .iter()
            .filter(|e| !e.is_healthy())
            .map(|e| e.name.as_str())
            .collect();

        match gateway.client().get_latest_height().await {
            Ok(height) => info!(
                healthy = healthy,
                total = snapshot.len(),
                unhealthy = ?unhealthy,
                latest_block = height,
                "Gateway status"
            ),
            Err(e) => warn!(
                healthy = healthy,
                total = snapshot.len(),
                unhealthy = ?unhealthy,
                error = %e,
                "Gateway status: latest block unavailable"
            ),
        }

        let metrics = gateway.executor().metrics();
        info!(
            total_requests = metrics.total_requests,
            success_rate = metrics.success_rate(),
            failovers = metrics.failovers,
            avg_response_time_ms = metrics.avg_response_time_ms,
            "Gateway request metrics"
        );
    }
}

/// Set up graceful shutdown signal handling
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
