//! Scanner-Scoring Bridge
//!
//! Forwards each scan cycle's new candidates to an external token scoring
//! service and keeps the latest recommendation per token. The scanner never
//! waits on this crate; it only reads the hub's delta stream.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast::error::RecvError, watch};
use tracing::{debug, info, warn};

use momentum_core::{DeltaStream, Token};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Bridge error types
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("scoring request timed out")]
    Timeout,

    #[error("scoring transport error: {0}")]
    Transport(String),

    #[error("scoring service returned status {0}")]
    Status(u16),

    #[error("malformed scoring response: {0}")]
    Malformed(String),

    #[error("scoring service rejected the batch: {0}")]
    Rejected(String),

    #[error("invalid value for {key}: {value:?}")]
    InvalidConfig { key: &'static str, value: String },
}

impl From<reqwest::Error> for ScoringError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ScoringError::Timeout
        } else if err.is_decode() {
            ScoringError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            ScoringError::Status(status.as_u16())
        } else {
            ScoringError::Transport(err.to_string())
        }
    }
}

/// Result type for bridge operations
pub type ScoringResult<T> = Result<T, ScoringError>;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub batch_size: usize,
}

impl ScoringConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
            batch_size: 100,
        }
    }

    /// Read `SCORING_URL`, `SCORING_TIMEOUT_MS` and `SCORING_BATCH_SIZE`.
    /// Returns `None` when no scoring service is configured.
    pub fn from_env() -> ScoringResult<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> ScoringResult<Option<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = match lookup("SCORING_URL") {
            Some(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => return Ok(None),
        };

        let mut config = Self::new(base_url);
        if let Some(raw) = lookup("SCORING_TIMEOUT_MS") {
            let ms: u64 = parse_positive(&raw, "SCORING_TIMEOUT_MS")?;
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("SCORING_BATCH_SIZE") {
            config.batch_size = parse_positive(&raw, "SCORING_BATCH_SIZE")?;
        }

        Ok(Some(config))
    }
}

fn parse_positive<T>(raw: &str, key: &'static str) -> ScoringResult<T>
where
    T: std::str::FromStr + PartialEq + Default,
{
    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => Ok(value),
        _ => Err(ScoringError::InvalidConfig {
            key,
            value: raw.to_string(),
        }),
    }
}

/// Recommendation strength, strongest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    #[serde(rename = "STRONG BUY")]
    StrongBuy,
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "HOLD")]
    Hold,
    #[serde(rename = "WEAK BUY")]
    WeakBuy,
    #[serde(rename = "AVOID")]
    Avoid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// One scored token as returned by the scoring service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecommendation {
    #[serde(default)]
    pub symbol: String,
    pub address: String,
    #[serde(default)]
    pub chain: String,
    pub recommendation: Recommendation,
    pub buy_score: f64,
    pub risk_level: RiskLevel,
    pub risk_confidence: f64,
    pub expected_profit_percent: f64,
    pub optimal_hold_hours: f64,
}

impl ScoreRecommendation {
    /// Same `chain-address` key the scanner snapshot uses.
    pub fn key(&self) -> String {
        format!("{}-{}", self.chain, self.address)
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    tokens: &'a [Token],
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    success: bool,
    #[serde(default)]
    analyzed_count: usize,
    #[serde(default)]
    recommendations: Vec<ScoreRecommendation>,
    error: Option<String>,
}

/// HTTP client for the scoring service
#[derive(Debug, Clone)]
pub struct ScoringClient {
    client: Client,
    base_url: String,
}

impl ScoringClient {
    pub fn new(config: &ScoringConfig) -> ScoringResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    /// Score a batch of tokens.
    pub async fn analyze(&self, tokens: &[Token]) -> ScoringResult<Vec<ScoreRecommendation>> {
        let response = self
            .client
            .post(format!("{}/analyze", self.base_url))
            .json(&AnalyzeRequest { tokens })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScoringError::Status(status.as_u16()));
        }

        let body: AnalyzeResponse = response.json().await?;
        if !body.success {
            return Err(ScoringError::Rejected(
                body.error.unwrap_or_else(|| "no reason given".to_string()),
            ));
        }

        debug!(
            "Scoring service analyzed {} of {} tokens",
            body.analyzed_count,
            tokens.len()
        );
        Ok(body.recommendations)
    }

    /// Fetch the service's health document.
    pub async fn health(&self) -> ScoringResult<serde_json::Value> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScoringError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}

/// Latest score for one token
#[derive(Debug, Clone)]
pub struct CachedScore {
    pub recommendation: ScoreRecommendation,
    pub scored_at: DateTime<Utc>,
}

/// Consumes cycle deltas and keeps a per-token score cache
pub struct ScoringBridge {
    client: ScoringClient,
    batch_size: usize,
    scores: Arc<DashMap<String, CachedScore>>,
}

impl ScoringBridge {
    pub fn new(config: &ScoringConfig) -> ScoringResult<Self> {
        Ok(Self {
            client: ScoringClient::new(config)?,
            batch_size: config.batch_size.max(1),
            scores: Arc::new(DashMap::new()),
        })
    }

    pub fn client(&self) -> &ScoringClient {
        &self.client
    }

    /// Latest recommendation for a token
    pub fn score(&self, token: &Token) -> Option<CachedScore> {
        self.scores.get(&token.key()).map(|entry| entry.value().clone())
    }

    pub fn scored_count(&self) -> usize {
        self.scores.len()
    }

    /// Score one delta in batches. Returns how many recommendations were cached.
    pub async fn process_delta(&self, tokens: &[Token]) -> usize {
        let mut cached = 0;
        for batch in tokens.chunks(self.batch_size) {
            match self.client.analyze(batch).await {
                Ok(recommendations) => {
                    let scored_at = Utc::now();
                    for recommendation in recommendations {
                        self.scores.insert(
                            recommendation.key(),
                            CachedScore {
                                recommendation,
                                scored_at,
                            },
                        );
                        cached += 1;
                    }
                }
                Err(e) => warn!("Scoring batch of {} tokens failed: {}", batch.len(), e),
            }
        }
        cached
    }

    /// Run until the delta stream closes or shutdown is signalled.
    pub async fn run(&self, mut deltas: DeltaStream, mut shutdown: watch::Receiver<bool>) {
        info!("Scoring bridge forwarding deltas to {}", self.client.base_url);

        loop {
            tokio::select! {
                received = deltas.recv() => match received {
                    Ok(delta) => {
                        let cached = self.process_delta(&delta).await;
                        debug!("Cached {} scores from a delta of {}", cached, delta.len());
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Scoring bridge lagged, skipped {} deltas", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scoring bridge stopped");
    }
}
