use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::aggregator::{Aggregator, Snapshot};
use super::data_feeds::{fetch_all, EndpointSource};
use super::normalizers::Normalizer;
use super::ScannerConfig;
use crate::broadcast::{BroadcastHub, BroadcastReport};
use crate::errors::ScanError;
use crate::metrics::ScanMetrics;

/// Summary of one fetch-normalize-aggregate-broadcast pass
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub endpoints_ok: usize,
    pub endpoints_failed: usize,
    pub admitted: usize,
    pub snapshot_size: usize,
    pub broadcast: BroadcastReport,
    pub duration: Duration,
}

/// Drives the scan cadence.
pub struct MarketScanner {
    config: ScannerConfig,
    source: Arc<dyn EndpointSource>,
    normalizer: Normalizer,
    aggregator: Aggregator,
    hub: Arc<BroadcastHub>,
    metrics: Arc<ScanMetrics>,
}

impl MarketScanner {
    pub fn new(
        config: ScannerConfig,
        source: Arc<dyn EndpointSource>,
        snapshot: Arc<Snapshot>,
        hub: Arc<BroadcastHub>,
        metrics: Arc<ScanMetrics>,
    ) -> Self {
        let normalizer = Normalizer::new(config.chain_tag.clone(), config.window);
        Self {
            config,
            source,
            normalizer,
            aggregator: Aggregator::new(snapshot),
            hub,
            metrics,
        }
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        self.aggregator.snapshot()
    }

    /// Run one cycle. Endpoint failures are absorbed here and only reduce
    /// that endpoint's contribution to zero.
    pub async fn run_cycle(&self) -> Result<CycleReport, ScanError> {
        let started = Instant::now();
        let endpoints = &self.config.endpoints;

        let results = fetch_all(self.source.as_ref(), endpoints, self.config.request_timeout).await;

        let mut batches = Vec::with_capacity(results.len());
        let mut endpoints_failed = 0;

        for (endpoint, result) in endpoints.iter().zip(results) {
            match result {
                Ok(body) => {
                    let tokens = self.normalizer.normalize(&body, endpoint.shape());
                    debug!("{} contributed {} tokens", endpoint, tokens.len());
                    self.metrics.record_endpoint_success(endpoint, tokens.len());
                    batches.push(tokens);
                }
                Err(e) => {
                    warn!("Error fetching {} ({}): {}", endpoint.label(), endpoint.url(), e);
                    self.metrics.record_endpoint_failure(endpoint, &e);
                    endpoints_failed += 1;
                }
            }
        }

        let delta = self.aggregator.merge(batches);
        let broadcast = self.hub.broadcast_delta(&delta)?;

        let report = CycleReport {
            endpoints_ok: endpoints.len() - endpoints_failed,
            endpoints_failed,
            admitted: delta.len(),
            snapshot_size: self.snapshot().len(),
            broadcast,
            duration: started.elapsed(),
        };

        info!(
            "Scan found {} tokens in range ({}/{} endpoints ok, snapshot {})",
            report.admitted,
            report.endpoints_ok,
            endpoints.len(),
            report.snapshot_size
        );
        self.metrics.record_cycle(&report);

        Ok(report)
    }

    /// Scan until shutdown is signalled.
    ///
    /// Each cycle runs in its own task so a panic is handled like any other
    /// cycle failure: logged, followed by the longer backoff.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting scan loop over {} endpoints (interval {:?}, backoff {:?})",
            self.config.endpoints.len(),
            self.config.scan_interval,
            self.config.error_backoff
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let scanner = Arc::clone(&self);
            let outcome = tokio::spawn(async move { scanner.run_cycle().await }).await;

            let pause = match outcome {
                Ok(Ok(_)) => self.config.scan_interval,
                Ok(Err(e)) => self.cycle_failed(e),
                Err(join_error) => self.cycle_failed(ScanError::Panicked(join_error.to_string())),
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Scan loop stopped");
    }

    fn cycle_failed(&self, error: ScanError) -> Duration {
        error!("Scan error: {}", error);
        self.metrics.record_cycle_failure(&error.to_string());
        self.config.error_backoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::HubMessage;
    use crate::errors::{FetchError, FetchResult};
    use crate::market_scanner::endpoints::{Endpoint, ShapeTag};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    enum Reply {
        Body(Value),
        Fail(FetchError),
        Hang,
        Panic,
    }

    #[derive(Default)]
    struct StubSource {
        replies: HashMap<String, Reply>,
        calls: AtomicUsize,
    }

    impl StubSource {
        fn with(mut self, url: &str, reply: Reply) -> Self {
            self.replies.insert(url.to_string(), reply);
            self
        }
    }

    #[async_trait]
    impl EndpointSource for StubSource {
        async fn fetch(&self, endpoint: &Endpoint) -> FetchResult<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.get(endpoint.url()) {
                Some(Reply::Body(body)) => Ok(body.clone()),
                Some(Reply::Fail(e)) => Err(e.clone()),
                Some(Reply::Hang) => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Err(FetchError::Timeout)
                }
                Some(Reply::Panic) if call == 0 => panic!("upstream exploded"),
                Some(Reply::Panic) => Ok(json!([])),
                None => Err(FetchError::Status(404)),
            }
        }
    }

    fn pair_body(entries: &[(&str, f64, &str)]) -> Value {
        let pairs: Vec<Value> = entries
            .iter()
            .map(|(address, change, price)| {
                json!({
                    "baseToken": { "address": address, "symbol": "PAIR", "name": "Pair Token" },
                    "priceUsd": price,
                    "priceChange": { "h24": change },
                    "volume": { "h24": 1000.0 }
                })
            })
            .collect();
        json!({ "pairs": pairs })
    }

    fn flat_body(entries: &[(&str, f64, f64)]) -> Value {
        let items: Vec<Value> = entries
            .iter()
            .map(|(id, change, price)| {
                json!({ "id": id, "symbol": "flt", "name": "Flat Token", "priceUsd": price, "changePercent24Hr": change })
            })
            .collect();
        Value::Array(items)
    }

    fn config(endpoints: Vec<Endpoint>) -> ScannerConfig {
        ScannerConfig {
            endpoints,
            request_timeout: Duration::from_millis(200),
            scan_interval: Duration::from_millis(20),
            error_backoff: Duration::from_millis(40),
            ..ScannerConfig::default()
        }
    }

    fn build_scanner(config: ScannerConfig, source: StubSource) -> (Arc<MarketScanner>, Arc<BroadcastHub>, Arc<ScanMetrics>) {
        let snapshot = Arc::new(Snapshot::new(config.max_tokens));
        let hub = Arc::new(BroadcastHub::new(snapshot.clone(), config.subscriber_buffer));
        let metrics = Arc::new(ScanMetrics::new());
        let scanner = MarketScanner::new(config, Arc::new(source), snapshot, hub.clone(), metrics.clone());
        (Arc::new(scanner), hub, metrics)
    }

    #[tokio::test]
    async fn test_mixed_shapes_only_window_tokens_reach_snapshot() {
        let pairs = Endpoint::new("pairs", "stub://pairs", ShapeTag::PairList);
        let flat = Endpoint::new("flat", "stub://flat", ShapeTag::FlatList);
        let source = StubSource::default()
            .with("stub://pairs", Reply::Body(pair_body(&[("0xten", 10.0, "1.5")])))
            .with("stub://flat", Reply::Body(flat_body(&[("fifteen", 15.0, 2.0)])));

        let (scanner, _hub, _metrics) = build_scanner(config(vec![pairs, flat]), source);
        let report = scanner.run_cycle().await.unwrap();

        assert_eq!(report.admitted, 1);
        assert_eq!(report.endpoints_ok, 2);
        let tokens = scanner.snapshot().tokens();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].address, "0xten");
        assert_eq!(tokens[0].price_change_24h, 10.0);
    }

    #[tokio::test]
    async fn test_same_key_from_two_endpoints_is_deduplicated() {
        let first = Endpoint::new("first", "stub://first", ShapeTag::PairList);
        let second = Endpoint::new("second", "stub://second", ShapeTag::FlatList);
        let source = StubSource::default()
            .with("stub://first", Reply::Body(pair_body(&[("shared", 10.0, "1.00")])))
            .with("stub://second", Reply::Body(flat_body(&[("shared", 11.0, 1.02)])));

        let (scanner, _hub, _metrics) = build_scanner(config(vec![first, second]), source);
        let report = scanner.run_cycle().await.unwrap();

        assert_eq!(report.admitted, 1);
        assert_eq!(scanner.snapshot().len(), 1);
        let price = scanner.snapshot().tokens()[0].price;
        assert!(price == 1.00 || price == 1.02);
    }

    #[tokio::test]
    async fn test_failing_endpoints_do_not_reduce_healthy_contribution() {
        let healthy = Endpoint::new("healthy", "stub://healthy", ShapeTag::PairList);
        let body = pair_body(&[("a", 9.5, "1"), ("b", 12.0, "2"), ("c", 20.0, "3")]);

        let alone = StubSource::default().with("stub://healthy", Reply::Body(body.clone()));
        let (scanner_alone, _, _) = build_scanner(config(vec![healthy.clone()]), alone);
        let baseline = scanner_alone.run_cycle().await.unwrap().admitted;

        let crowded = StubSource::default()
            .with("stub://healthy", Reply::Body(body))
            .with("stub://broken", Reply::Fail(FetchError::Malformed("eof".into())))
            .with("stub://slow", Reply::Hang);
        let endpoints = vec![
            Endpoint::new("slow", "stub://slow", ShapeTag::FlatList),
            healthy,
            Endpoint::new("broken", "stub://broken", ShapeTag::FlatList),
        ];
        let (scanner_crowded, _, metrics) = build_scanner(config(endpoints), crowded);
        let report = scanner_crowded.run_cycle().await.unwrap();

        assert_eq!(baseline, 2);
        assert_eq!(report.admitted, baseline);
        assert_eq!(report.endpoints_failed, 2);

        let failures: u64 = metrics.report(0).endpoints.iter().map(|e| e.failures).sum();
        assert_eq!(failures, 2);
    }

    #[tokio::test]
    async fn test_cycle_broadcasts_delta_to_subscribers() {
        let pairs = Endpoint::new("pairs", "stub://pairs", ShapeTag::PairList);
        let source = StubSource::default()
            .with("stub://pairs", Reply::Body(pair_body(&[("0xup", 11.0, "0.5")])));
        let (scanner, hub, _metrics) = build_scanner(config(vec![pairs]), source);

        let (tx, mut rx) = mpsc::channel(8);
        hub.connect(tx).unwrap();
        rx.recv().await.unwrap();

        let report = scanner.run_cycle().await.unwrap();
        assert_eq!(report.broadcast.delivered, 1);

        let message: HubMessage = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        match message {
            HubMessage::Update { tokens, .. } => assert_eq!(tokens[0].address, "0xup"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_after_cycle_sees_current_snapshot() {
        let pairs = Endpoint::new("pairs", "stub://pairs", ShapeTag::PairList);
        let source = StubSource::default()
            .with("stub://pairs", Reply::Body(pair_body(&[("0xlive", 10.0, "1")])));
        let (scanner, hub, _metrics) = build_scanner(config(vec![pairs]), source);
        scanner.run_cycle().await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        hub.connect(tx).unwrap();

        let message: HubMessage = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            message,
            HubMessage::Connected { tokens: scanner.snapshot().tokens(), count: 1 }
        );
    }

    #[tokio::test]
    async fn test_loop_survives_panicking_cycle_and_stops_on_shutdown() {
        let flaky = Endpoint::new("flaky", "stub://flaky", ShapeTag::FlatList);
        let source = StubSource::default().with("stub://flaky", Reply::Panic);
        let (scanner, _hub, metrics) = build_scanner(config(vec![flaky]), source);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scanner.run(shutdown_rx));

        let deadline = Instant::now() + Duration::from_secs(5);
        while metrics.total_cycles() < 3 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(metrics.failed_cycles(), 1);
        assert!(metrics.total_cycles() >= 3);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scan loop did not stop")
            .unwrap();
    }
}
