//! TCP Router
//!
//! Control plane for the TCP routing tier. Watches the routing API for TCP
//! route changes and keeps the local load balancer configured to match.
//!
//! # Startup
//!
//! 1. Load configuration from the environment
//! 2. Initialize tracing in the configured log format
//! 3. Install the Prometheus exporter
//! 4. Build the token fetcher, routing API client and reload script runner
//! 5. Build the routing table updater
//! 6. Start the sync ticker and invoke the watcher
//! 7. Wait for SIGINT/SIGTERM, then stop the watcher

use common::token_manager::{OAuthClientConfig, OAuthTokenFetcher};
use std::sync::Arc;
use tcp_router::config::Config;
use tcp_router::configurer::{CommandScriptRunner, ReloadingConfigurer};
use tcp_router::errors::RouterError;
use tcp_router::observability::init_metrics_recorder;
use tcp_router::process::Process;
use tcp_router::routing_api::RoutingApiClient;
use tcp_router::updater::RoutingTableUpdater;
use tcp_router::watcher::{sync_ticker, Watcher};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "tcp_router=info,common=info";

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The log format comes from the config; an invalid config logs as text.
    let config = Config::from_env();
    init_tracing(config.as_ref().is_ok_and(|c| c.log_json));

    info!("Starting TCP Router");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        RouterError::from(e)
    })?;

    info!(
        routing_api_url = %config.routing_api_url,
        oauth_token_url = %config.oauth_token_url,
        oauth_client_id = %config.oauth_client_id,
        has_client_secret = config.has_client_secret(),
        subscription_retry_interval_secs = config.subscription_retry_interval.as_secs(),
        sync_interval_secs = config.sync_interval.as_secs(),
        log_json = config.log_json,
        reload_script = %config.reload_script,
        "Configuration loaded successfully"
    );

    init_metrics_recorder(config.metrics_bind_address).map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        RouterError::Metrics(e)
    })?;
    info!(addr = %config.metrics_bind_address, "Metrics listener started");

    let token_config = OAuthClientConfig::new(
        config.oauth_token_url.clone(),
        config.oauth_client_id.clone(),
        config.oauth_client_secret.clone(),
    )
    .with_refresh_threshold(config.token_refresh_threshold);
    let token_source = Arc::new(OAuthTokenFetcher::new(token_config).map_err(|e| {
        error!("Failed to create token fetcher: {}", e);
        RouterError::from(e)
    })?);

    let routing_api = Arc::new(RoutingApiClient::new(config.routing_api_url.clone()).map_err(
        |e| {
            error!("Failed to create routing API client: {}", e);
            RouterError::from(e)
        },
    )?);

    let script_runner = Arc::new(CommandScriptRunner::new(config.reload_script.clone()));
    let configurer = Arc::new(ReloadingConfigurer::new(script_runner));
    let updater = Arc::new(RoutingTableUpdater::new(
        routing_api.clone(),
        token_source.clone(),
        configurer,
    ));

    let ticker_token = CancellationToken::new();
    let sync_rx = sync_ticker(config.sync_interval, ticker_token.clone());

    let watcher = Watcher::new(
        routing_api,
        updater,
        token_source,
        config.subscription_retry_interval,
        sync_rx,
    );
    let process = Process::invoke(watcher).await?;

    info!("TCP Router running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, stopping watcher...");
    ticker_token.cancel();
    process.signal();
    process.wait().await?;

    info!("TCP Router shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
#[expect(
    clippy::expect_used,
    reason = "Signal handler installation failure is unrecoverable at startup"
)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
}
