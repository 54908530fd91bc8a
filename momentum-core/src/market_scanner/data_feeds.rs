use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::endpoints::Endpoint;
use crate::errors::{FetchError, FetchResult};

/// A source of decoded endpoint bodies.
#[async_trait]
pub trait EndpointSource: Send + Sync {
    async fn fetch(&self, endpoint: &Endpoint) -> FetchResult<Value>;
}

/// Plain HTTP GET with a bounded per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> FetchResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("momentum-scanner/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl EndpointSource for HttpFetcher {
    async fn fetch(&self, endpoint: &Endpoint) -> FetchResult<Value> {
        let response = self.client.get(endpoint.url()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Malformed(e.to_string()))
    }
}

/// Fetch every endpoint concurrently and wait for all of them.
///
/// Results come back in endpoint order. Each fetch carries its own timeout,
/// so a slow endpoint never holds back its siblings past that bound.
pub async fn fetch_all(
    source: &dyn EndpointSource,
    endpoints: &[Endpoint],
    timeout: Duration,
) -> Vec<FetchResult<Value>> {
    let fetches = endpoints.iter().map(|endpoint| async move {
        match tokio::time::timeout(timeout, source.fetch(endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    });

    join_all(fetches).await
}
