//! Resale sniper: watches marketplace resale listings and buys
//! underpriced collectibles.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the shared context and spawns one polling worker per channel
//! plus the account monitor, the telemetry reporter and the dashboard.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use resale_sniper::auth::AuthSession;
use resale_sniper::config::AppConfig;
use resale_sniper::dashboard::{self, routes::DashboardState};
use resale_sniper::data::{DealFeed, RolimonsDealFeed, RolimonsValuations, ValuationSource};
use resale_sniper::engine::executor::BuyExecutor;
use resale_sniper::engine::monitor::AccountMonitor;
use resale_sniper::engine::sampler::ItemSampler;
use resale_sniper::engine::worker::PollingWorker;
use resale_sniper::engine::{ClaimSet, SniperContext, WatchMode};
use resale_sniper::http::endpoints::Endpoints;
use resale_sniper::http::Transport;
use resale_sniper::strategy::DealStrategy;
use resale_sniper::telemetry::{self, Telemetry};
use resale_sniper::types::Channel;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("SNIPER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    let channels = cfg.channels();
    info!(
        watch_list = cfg.limiteds.len(),
        channels = channels.len(),
        dashboard = cfg.dashboard.enabled,
        "Resale sniper starting up"
    );

    // -- Shared components -----------------------------------------------

    let cookie = cfg.cookie()?;
    let endpoints = Arc::new(Endpoints::default());
    let local = Arc::new(Transport::new(Channel::Local).context("Failed to build local client")?);
    let telemetry = Arc::new(Telemetry::new());

    let session = Arc::new(AuthSession::new(
        cookie,
        Arc::clone(&local),
        Arc::clone(&endpoints),
    ));
    if let Err(e) = session.populate_identity().await {
        warn!(error = %e, "Initial identity lookup failed; the account monitor will retry");
    }

    let valuations: Arc<dyn ValuationSource> = Arc::new(RolimonsValuations::new(
        Arc::clone(&local),
        Arc::clone(&endpoints),
    ));

    let mode = if cfg.limiteds.is_empty() {
        let feed: Arc<dyn DealFeed> =
            Arc::new(RolimonsDealFeed::new(Arc::clone(&local), Arc::clone(&endpoints)));
        WatchMode::DealFeed(feed)
    } else {
        WatchMode::Listed(Arc::new(ItemSampler::new(cfg.watch_list())))
    };
    info!(mode = mode.name(), "Watch mode selected");

    let executor = BuyExecutor::new(
        Arc::clone(&local),
        Arc::clone(&session),
        Arc::clone(&endpoints),
        Arc::clone(&telemetry),
    );

    let ctx = Arc::new(SniperContext {
        strategy: DealStrategy::new(cfg.buy_settings.clone()),
        polling: cfg.polling.clone(),
        session: Arc::clone(&session),
        endpoints: Arc::clone(&endpoints),
        valuations,
        mode: mode.clone(),
        telemetry: Arc::clone(&telemetry),
        executor,
        claims: ClaimSet::new(),
    });

    // -- Background tasks ------------------------------------------------

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor = AccountMonitor::new(
        Arc::clone(&session),
        Arc::clone(&local),
        Arc::clone(&endpoints),
        Arc::clone(&telemetry),
        cfg.polling.clone(),
    );
    let monitor_handle = tokio::spawn(monitor.run(shutdown_rx.clone()));

    let reporter_handle = tokio::spawn(telemetry::run_summary_loop(
        Arc::clone(&telemetry),
        cfg.polling.summary_interval(),
        shutdown_rx.clone(),
    ));

    let dashboard_handle = if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(
            Arc::clone(&telemetry),
            mode.name(),
            cfg.limiteds.len(),
        ));
        Some(dashboard::spawn_dashboard(state, cfg.dashboard.port))
    } else {
        None
    };

    let mut workers = Vec::with_capacity(channels.len());
    for channel in channels {
        let transport = match channel {
            Channel::Local => Arc::clone(&local),
            proxy => Arc::new(
                Transport::new(proxy.clone())
                    .with_context(|| format!("Failed to build client for {proxy}"))?,
            ),
        };
        let worker = PollingWorker::new(Arc::clone(&ctx), transport);
        workers.push(tokio::spawn(worker.run(shutdown_rx.clone())));
    }

    info!(workers = workers.len(), "Sniper running. Press Ctrl+C to stop.");

    // -- Shutdown --------------------------------------------------------

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutdown signal received.");

    let _ = shutdown_tx.send(true);
    monitor_handle.abort();
    if let Some(handle) = dashboard_handle {
        handle.abort();
    }

    for result in futures::future::join_all(workers).await {
        if let Err(e) = result {
            warn!(error = %e, "Worker task ended abnormally");
        }
    }
    let _ = reporter_handle.await;

    let counters = telemetry.counters().await;
    info!(
        requests = counters.requests,
        checked = counters.checked,
        bought = counters.bought,
        failed = counters.failed,
        "Resale sniper shut down cleanly."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("resale_sniper=info"));

    let json_logging = std::env::var("SNIPER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
