//! Momentum Scanner Library
//!
//! Polls public market-data endpoints, keeps the tokens whose 24h price
//! change sits inside the momentum window, and pushes each cycle's new
//! candidates to WebSocket subscribers.

pub mod api;
pub mod broadcast;
pub mod errors;
pub mod market_scanner;
pub mod metrics;

// Re-export main types for easy access
pub use api::ScannerApiServer;
pub use broadcast::{BroadcastHub, BroadcastReport, DeltaStream, HubMessage, SubscriberId};
pub use errors::{ConfigError, FetchError, HubError, NormalizeError, ScanError};
pub use market_scanner::{
    CycleReport, Endpoint, EndpointSource, HttpFetcher, MarketScanner, OpportunityWindow,
    ScannerConfig, ShapeTag, Snapshot, Token,
};
pub use metrics::{MetricsReport, ScanMetrics};

use anyhow::Result;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Wires the scan loop, subscriber hub and API around one shared snapshot
pub struct MomentumScannerService {
    config: ScannerConfig,
    scanner: Arc<MarketScanner>,
    hub: Arc<BroadcastHub>,
    metrics: Arc<ScanMetrics>,
}

impl MomentumScannerService {
    /// Create a service that fetches over HTTP
    pub fn new(config: ScannerConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.request_timeout)?;
        Self::with_source(config, Arc::new(fetcher))
    }

    /// Create a service over any endpoint source
    pub fn with_source(config: ScannerConfig, source: Arc<dyn EndpointSource>) -> Result<Self> {
        config.validate()?;

        let snapshot = Arc::new(Snapshot::new(config.max_tokens));
        let hub = Arc::new(BroadcastHub::new(snapshot.clone(), config.subscriber_buffer));
        let metrics = Arc::new(ScanMetrics::new());
        let scanner = Arc::new(MarketScanner::new(
            config.clone(),
            source,
            snapshot,
            hub.clone(),
            metrics.clone(),
        ));

        Ok(Self {
            config,
            scanner,
            hub,
            metrics,
        })
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        self.scanner.snapshot()
    }

    pub fn metrics(&self) -> &Arc<ScanMetrics> {
        &self.metrics
    }

    /// Start the scan loop on its own task
    pub fn spawn_scanner(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let scanner = self.scanner.clone();
        tokio::spawn(scanner.run(shutdown))
    }

    /// Bind the subscriber/metrics API on the configured address
    pub fn bind_api(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(SocketAddr, impl Future<Output = ()> + 'static)> {
        ScannerApiServer::new(self.hub.clone(), self.metrics.clone(), self.config.listen_addr)
            .bind(shutdown)
    }
}
