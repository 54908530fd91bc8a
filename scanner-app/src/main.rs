//! Momentum Scanner Application
//!
//! Polls public market-data endpoints on a fixed cadence and streams tokens
//! in the momentum window to WebSocket subscribers. Optionally forwards each
//! cycle's new candidates to an external scoring service.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use momentum_core::{MomentumScannerService, ScannerConfig};
use scoring_bridge::{ScoringBridge, ScoringConfig};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting Momentum Scanner");

    let config = ScannerConfig::from_env()?;
    info!(
        "Scanning {} endpoints every {:?}, window {}%..={}%",
        config.endpoints.len(),
        config.scan_interval,
        config.window.min_change,
        config.window.max_change
    );

    let service = MomentumScannerService::new(config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Subscriber and metrics API
    let (addr, server) = service.bind_api(shutdown_rx.clone())?;
    let server_task = tokio::spawn(server);
    info!("📡 Subscribers connect to ws://{}/", addr);

    // Optional scoring bridge
    let bridge_task = match ScoringConfig::from_env()? {
        Some(scoring) => {
            let bridge = Arc::new(ScoringBridge::new(&scoring)?);
            match bridge.client().health().await {
                Ok(health) => info!("Scoring service healthy: {}", health),
                Err(e) => warn!("Scoring service health check failed: {}", e),
            }
            let deltas = service.hub().subscribe_deltas();
            let shutdown = shutdown_rx.clone();
            Some(tokio::spawn(async move { bridge.run(deltas, shutdown).await }))
        }
        None => {
            info!("SCORING_URL not set, scoring bridge disabled");
            None
        }
    };

    let scanner_task = service.spawn_scanner(shutdown_rx);
    info!("📈 Momentum scanner is running. Press Ctrl+C to stop.");

    signal::ctrl_c().await?;
    info!("🛑 Shutdown signal received...");

    if shutdown_tx.send(true).is_err() {
        warn!("All shutdown receivers already dropped");
    }
    let closed = service.hub().close_all();
    info!("Closed {} subscriber connections", closed);

    let drain = async {
        if let Err(e) = scanner_task.await {
            error!("Scanner task failed: {}", e);
        }
        if let Err(e) = server_task.await {
            error!("API server task failed: {}", e);
        }
        if let Some(task) = bridge_task {
            if let Err(e) = task.await {
                error!("Scoring bridge task failed: {}", e);
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("Tasks did not stop within {:?}", SHUTDOWN_GRACE);
    }

    let report = service.metrics().report(0);
    info!(
        "✅ Momentum Scanner stopped after {} cycles ({} failed), {} tokens in snapshot",
        report.total_cycles,
        report.failed_cycles,
        service.snapshot().len()
    );

    Ok(())
}
