//! HTTP and WebSocket surface
//!
//! A single listener serves the subscriber WebSocket on `/` plus a few JSON
//! endpoints for health checks and dashboards.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use crate::broadcast::BroadcastHub;
use crate::metrics::ScanMetrics;

const SERVICE_NAME: &str = "momentum-scanner";

/// API server for subscribers and metrics endpoints
#[derive(Clone)]
pub struct ScannerApiServer {
    hub: Arc<BroadcastHub>,
    metrics: Arc<ScanMetrics>,
    addr: SocketAddr,
}

impl ScannerApiServer {
    pub fn new(hub: Arc<BroadcastHub>, metrics: Arc<ScanMetrics>, addr: SocketAddr) -> Self {
        Self { hub, metrics, addr }
    }

    pub fn routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let hub = self.hub.clone();
        let metrics = self.metrics.clone();

        // Subscriber channel
        let subscribe = warp::path::end()
            .and(warp::ws())
            .and(with_hub(hub.clone()))
            .map(|ws: Ws, hub: Arc<BroadcastHub>| {
                ws.on_upgrade(move |socket| subscriber_session(socket, hub))
            });

        // Health check endpoint
        let health = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_hub(hub.clone()))
            .map(|hub: Arc<BroadcastHub>| {
                warp::reply::json(&json!({
                    "status": "ok",
                    "service": SERVICE_NAME,
                    "subscribers": hub.subscriber_count(),
                    "snapshot_size": hub.snapshot().len(),
                    "timestamp": chrono::Utc::now()
                }))
            });

        // Current snapshot
        let tokens = warp::path!("api" / "v1" / "tokens")
            .and(warp::get())
            .and(with_hub(hub.clone()))
            .map(|hub: Arc<BroadcastHub>| {
                let tokens = hub.snapshot().tokens();
                warp::reply::json(&json!({ "count": tokens.len(), "tokens": tokens }))
            });

        // Scan metrics
        let scan_metrics = warp::path!("api" / "v1" / "metrics")
            .and(warp::get())
            .and(with_hub(hub))
            .and(warp::any().map(move || metrics.clone()))
            .map(|hub: Arc<BroadcastHub>, metrics: Arc<ScanMetrics>| {
                warp::reply::json(&metrics.report(hub.subscriber_count()))
            });

        subscribe.or(health).or(tokens).or(scan_metrics)
    }

    /// Bind the listener. The returned future serves until shutdown is signalled.
    pub fn bind(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<(SocketAddr, impl Future<Output = ()> + 'static)> {
        let signal = async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            info!("API server shutting down");
        };

        let (addr, server) =
            warp::serve(self.routes()).try_bind_with_graceful_shutdown(self.addr, signal)?;
        info!("Starting scanner API on {}", addr);
        Ok((addr, server))
    }
}

fn with_hub(
    hub: Arc<BroadcastHub>,
) -> impl Filter<Extract = (Arc<BroadcastHub>,), Error = Infallible> + Clone {
    warp::any().map(move || hub.clone())
}

/// One connected subscriber: registers with the hub, forwards queued
/// messages to the socket, and deregisters when the client goes away.
async fn subscriber_session(socket: WebSocket, hub: Arc<BroadcastHub>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(hub.buffer());

    let id = match hub.connect(outbound_tx) {
        Ok(id) => id,
        Err(e) => {
            warn!("Rejected subscriber: {}", e);
            let _ = ws_tx.close().await;
            return;
        }
    };

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if let Err(e) = ws_tx.send(Message::text(text)).await {
                debug!("Subscriber write failed: {}", e);
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(msg) if msg.is_close() => break,
            Ok(msg) => {
                if let Ok(text) = msg.to_str() {
                    debug!("Subscriber {} sent: {}", id, text);
                }
            }
            Err(e) => {
                debug!("Subscriber {} read error: {}", id, e);
                break;
            }
        }
    }

    hub.disconnect(&id);
    let _ = writer.await;
}
