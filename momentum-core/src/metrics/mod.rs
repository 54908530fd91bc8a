//! Scan metrics
//!
//! Counters and timings for the scan loop and per-endpoint health, exposed
//! through the HTTP API.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::FetchError;
use crate::market_scanner::endpoints::Endpoint;
use crate::market_scanner::scanner::CycleReport;

/// Per-endpoint fetch health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointMetrics {
    pub label: String,
    pub url: String,
    pub successes: u64,
    pub failures: u64,
    pub last_tokens: usize,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of all scan metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub timestamp: DateTime<Utc>,
    pub total_cycles: u64,
    pub failed_cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_ms: f64,
    pub avg_cycle_ms: f64,
    pub last_admitted: usize,
    pub snapshot_size: usize,
    pub subscribers: usize,
    pub last_error: Option<String>,
    pub endpoints: Vec<EndpointMetrics>,
}

#[derive(Debug, Default)]
struct ScanState {
    total_cycles: u64,
    failed_cycles: u64,
    last_cycle_at: Option<DateTime<Utc>>,
    last_cycle_ms: f64,
    avg_cycle_ms: f64,
    completed_cycles: u64,
    total_cycle_ms: f64,
    last_admitted: usize,
    snapshot_size: usize,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
pub struct ScanMetrics {
    scans: RwLock<ScanState>,
    endpoints: RwLock<HashMap<String, EndpointMetrics>>,
}

impl ScanMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_endpoint_success(&self, endpoint: &Endpoint, tokens: usize) {
        let mut endpoints = self.endpoints.write();
        let entry = endpoint_entry(&mut endpoints, endpoint);
        entry.successes += 1;
        entry.last_tokens = tokens;
        entry.last_success_at = Some(Utc::now());
    }

    pub fn record_endpoint_failure(&self, endpoint: &Endpoint, error: &FetchError) {
        let mut endpoints = self.endpoints.write();
        let entry = endpoint_entry(&mut endpoints, endpoint);
        entry.failures += 1;
        entry.last_tokens = 0;
        entry.last_error = Some(error.to_string());
    }

    pub fn record_cycle(&self, report: &CycleReport) {
        let mut scans = self.scans.write();
        let elapsed_ms = as_millis(report.duration);

        scans.total_cycles += 1;
        scans.completed_cycles += 1;
        scans.total_cycle_ms += elapsed_ms;
        scans.last_cycle_at = Some(Utc::now());
        scans.last_cycle_ms = elapsed_ms;
        scans.avg_cycle_ms = scans.total_cycle_ms / scans.completed_cycles as f64;
        scans.last_admitted = report.admitted;
        scans.snapshot_size = report.snapshot_size;
    }

    pub fn record_cycle_failure(&self, error: &str) {
        let mut scans = self.scans.write();
        scans.total_cycles += 1;
        scans.failed_cycles += 1;
        scans.last_cycle_at = Some(Utc::now());
        scans.last_error = Some(error.to_string());
    }

    pub fn total_cycles(&self) -> u64 {
        self.scans.read().total_cycles
    }

    pub fn failed_cycles(&self) -> u64 {
        self.scans.read().failed_cycles
    }

    pub fn report(&self, subscribers: usize) -> MetricsReport {
        let scans = self.scans.read();
        let mut endpoints: Vec<EndpointMetrics> = self.endpoints.read().values().cloned().collect();
        endpoints.sort_by(|a, b| a.label.cmp(&b.label));

        MetricsReport {
            timestamp: Utc::now(),
            total_cycles: scans.total_cycles,
            failed_cycles: scans.failed_cycles,
            last_cycle_at: scans.last_cycle_at,
            last_cycle_ms: scans.last_cycle_ms,
            avg_cycle_ms: scans.avg_cycle_ms,
            last_admitted: scans.last_admitted,
            snapshot_size: scans.snapshot_size,
            subscribers,
            last_error: scans.last_error.clone(),
            endpoints,
        }
    }
}

fn endpoint_entry<'a>(
    endpoints: &'a mut HashMap<String, EndpointMetrics>,
    endpoint: &Endpoint,
) -> &'a mut EndpointMetrics {
    endpoints
        .entry(endpoint.url().to_string())
        .or_insert_with(|| EndpointMetrics {
            label: endpoint.label().to_string(),
            url: endpoint.url().to_string(),
            successes: 0,
            failures: 0,
            last_tokens: 0,
            last_error: None,
            last_success_at: None,
        })
}

fn as_millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
