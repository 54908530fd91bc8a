//! Live subscriber fan-out
//!
//! The hub owns the set of connected subscribers. Each subscriber is an
//! outbound queue drained by its connection task; sending never waits on a
//! socket. A closed or full queue counts as a failed send and removes the
//! subscriber after the pass completes.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::HubError;
use crate::market_scanner::aggregator::Snapshot;
use crate::market_scanner::{unix_timestamp, Token};

pub type SubscriberId = Uuid;

/// Stream of non-empty cycle deltas for in-process consumers.
pub type DeltaStream = broadcast::Receiver<Arc<Vec<Token>>>;

const DELTA_STREAM_CAPACITY: usize = 64;

/// Wire messages sent to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HubMessage {
    Connected { tokens: Vec<Token>, count: usize },
    Update { tokens: Vec<Token>, timestamp: f64 },
}

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct BroadcastHub {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<String>>>,
    snapshot: Arc<Snapshot>,
    deltas: broadcast::Sender<Arc<Vec<Token>>>,
    buffer: usize,
}

impl BroadcastHub {
    pub fn new(snapshot: Arc<Snapshot>, buffer: usize) -> Self {
        let (deltas, _) = broadcast::channel(DELTA_STREAM_CAPACITY);
        Self {
            subscribers: Mutex::new(HashMap::new()),
            snapshot,
            deltas,
            buffer,
        }
    }

    /// Outbound queue size each connection should allocate.
    pub fn buffer(&self) -> usize {
        self.buffer
    }

    /// Register a subscriber after queueing the full snapshot for it.
    ///
    /// The live-set lock is held across the snapshot read and the insert, so
    /// a concurrent broadcast either precedes the snapshot or reaches the new
    /// subscriber. If the initial send fails the subscriber is not registered.
    pub fn connect(&self, outbound: mpsc::Sender<String>) -> Result<SubscriberId, HubError> {
        let mut subscribers = self.subscribers.lock();

        let tokens = self.snapshot.tokens();
        let count = tokens.len();
        let payload = serde_json::to_string(&HubMessage::Connected { tokens, count })?;
        deliver(&outbound, payload)?;

        let id = Uuid::new_v4();
        subscribers.insert(id, outbound);
        info!(
            "Subscriber {} connected with {} tokens ({} live)",
            id,
            count,
            subscribers.len()
        );

        Ok(id)
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn disconnect(&self, id: &SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let removed = subscribers.remove(id).is_some();
        if removed {
            info!("Subscriber {} disconnected ({} live)", id, subscribers.len());
        }
        removed
    }

    /// Send a cycle delta to every live subscriber.
    ///
    /// Empty deltas are not sent. Failed subscribers are collected during the
    /// pass and removed afterwards; delivery to the rest is unaffected.
    pub fn broadcast_delta(&self, tokens: &[Token]) -> Result<BroadcastReport, HubError> {
        if tokens.is_empty() {
            return Ok(BroadcastReport::default());
        }

        // No receivers is fine; the stream is optional.
        let _ = self.deltas.send(Arc::new(tokens.to_vec()));

        let live: Vec<(SubscriberId, mpsc::Sender<String>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        if live.is_empty() {
            return Ok(BroadcastReport::default());
        }

        let payload = serde_json::to_string(&HubMessage::Update {
            tokens: tokens.to_vec(),
            timestamp: unix_timestamp(),
        })?;

        let mut failed = Vec::new();
        for (id, outbound) in &live {
            if let Err(e) = deliver(outbound, payload.clone()) {
                warn!("Dropping subscriber {}: {}", id, e);
                failed.push(*id);
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for id in &failed {
                subscribers.remove(id);
            }
        }

        let report = BroadcastReport {
            delivered: live.len() - failed.len(),
            dropped: failed.len(),
        };
        debug!(
            "Broadcast {} tokens to {} subscribers ({} dropped)",
            tokens.len(),
            report.delivered,
            report.dropped
        );

        Ok(report)
    }

    pub fn subscribe_deltas(&self) -> DeltaStream {
        self.deltas.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Drop every subscriber queue, which ends each connection task.
    pub fn close_all(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        let closed = subscribers.len();
        subscribers.clear();
        if closed > 0 {
            info!("Closed {} subscriber connections", closed);
        }
        closed
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }
}

fn deliver(outbound: &mpsc::Sender<String>, payload: String) -> Result<(), HubError> {
    outbound.try_send(payload).map_err(|e| match e {
        mpsc::error::TrySendError::Full(_) => HubError::SubscriberLagging,
        mpsc::error::TrySendError::Closed(_) => HubError::SubscriberClosed,
    })
}
