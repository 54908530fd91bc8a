//! Cross-source aggregation into the resident snapshot

use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::Token;

/// Latest observed token per `chain-address` key.
///
/// Written only by the aggregator; read by the broadcast hub and the HTTP
/// surface, so reads go through the same lock as the writer.
#[derive(Debug)]
pub struct Snapshot {
    entries: RwLock<HashMap<String, Token>>,
    capacity: usize,
}

impl Snapshot {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Copy of the current contents, newest first.
    pub fn tokens(&self) -> Vec<Token> {
        let mut tokens: Vec<Token> = self.entries.read().values().cloned().collect();
        tokens.sort_by(|a, b| {
            b.timestamp
                .total_cmp(&a.timestamp)
                .then_with(|| a.address.cmp(&b.address))
        });
        tokens
    }

    pub fn get(&self, key: &str) -> Option<Token> {
        self.entries.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

pub struct Aggregator {
    snapshot: Arc<Snapshot>,
}

impl Aggregator {
    pub fn new(snapshot: Arc<Snapshot>) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    /// Merge one cycle's batches into the snapshot.
    ///
    /// Returns the cycle delta with one entry per key: the last value seen
    /// wins, at the position where the key first appeared. Tokens evicted by
    /// the capacity bound in this same merge are left out of the delta.
    pub fn merge<I>(&self, batches: I) -> Vec<Token>
    where
        I: IntoIterator<Item = Vec<Token>>,
    {
        let mut delta: Vec<Token> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for token in batches.into_iter().flatten() {
            match positions.entry(token.key()) {
                Entry::Occupied(slot) => delta[*slot.get()] = token,
                Entry::Vacant(slot) => {
                    slot.insert(delta.len());
                    delta.push(token);
                }
            }
        }

        if delta.is_empty() {
            return delta;
        }

        let mut entries = self.snapshot.entries.write();
        for token in &delta {
            entries.insert(token.key(), token.clone());
        }

        let overflow = entries.len().saturating_sub(self.snapshot.capacity);
        if overflow > 0 {
            let mut by_age: Vec<(String, f64)> = entries
                .iter()
                .map(|(key, token)| (key.clone(), token.timestamp))
                .collect();
            by_age.sort_by(|a, b| a.1.total_cmp(&b.1));

            for (key, _) in by_age.into_iter().take(overflow) {
                entries.remove(&key);
            }
            debug!("Evicted {} stale snapshot entries", overflow);

            delta.retain(|token| entries.contains_key(&token.key()));
        }

        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(address: &str, price: f64, timestamp: f64) -> Token {
        Token {
            address: address.to_string(),
            symbol: address.to_uppercase(),
            name: String::new(),
            price,
            price_change_24h: 10.0,
            volume_24h: 0.0,
            chain: "multi-source".to_string(),
            timestamp,
        }
    }

    #[test]
    fn test_duplicate_key_keeps_last_value() {
        let aggregator = Aggregator::new(Arc::new(Snapshot::new(100)));
        let delta = aggregator.merge(vec![
            vec![token("0xdup", 1.00, 1.0), token("0xother", 5.0, 1.0)],
            vec![token("0xdup", 1.02, 1.0)],
        ]);

        assert_eq!(delta.len(), 2);
        assert_eq!(delta[0].address, "0xdup");
        assert_eq!(delta[0].price, 1.02);

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("multi-source-0xdup").map(|t| t.price), Some(1.02));
    }

    #[test]
    fn test_same_record_twice_is_idempotent() {
        let aggregator = Aggregator::new(Arc::new(Snapshot::new(100)));
        let record = token("0xsame", 2.0, 1.0);
        aggregator.merge(vec![vec![record.clone(), record.clone()]]);

        assert_eq!(aggregator.snapshot().len(), 1);
        assert_eq!(aggregator.snapshot().get(&record.key()), Some(record));
    }

    #[test]
    fn test_later_cycles_overwrite() {
        let aggregator = Aggregator::new(Arc::new(Snapshot::new(100)));
        aggregator.merge(vec![vec![token("0xa", 1.0, 1.0)]]);
        aggregator.merge(vec![vec![token("0xa", 3.0, 2.0)]]);

        assert_eq!(aggregator.snapshot().len(), 1);
        assert_eq!(aggregator.snapshot().tokens()[0].price, 3.0);
    }

    #[test]
    fn test_empty_addresses_share_one_key() {
        let aggregator = Aggregator::new(Arc::new(Snapshot::new(100)));
        aggregator.merge(vec![vec![token("", 1.0, 1.0)], vec![token("", 2.0, 1.0)]]);

        assert_eq!(aggregator.snapshot().len(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let aggregator = Aggregator::new(Arc::new(Snapshot::new(2)));
        aggregator.merge(vec![vec![token("old", 1.0, 1.0), token("mid", 1.0, 2.0)]]);
        aggregator.merge(vec![vec![token("new", 1.0, 3.0)]]);

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.get("multi-source-old").is_none());

        let addresses: Vec<_> = snapshot.tokens().into_iter().map(|t| t.address).collect();
        assert_eq!(addresses, vec!["new", "mid"]);
    }

    #[test]
    fn test_oversized_delta_matches_snapshot() {
        let aggregator = Aggregator::new(Arc::new(Snapshot::new(2)));
        let delta = aggregator.merge(vec![vec![
            token("a", 1.0, 5.0),
            token("b", 1.0, 5.0),
            token("c", 1.0, 5.0),
        ]]);

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(delta.len(), 2);
        for token in &delta {
            assert_eq!(snapshot.get(&token.key()).as_ref(), Some(token));
        }
    }

    #[test]
    fn test_empty_cycle_leaves_snapshot_untouched() {
        let aggregator = Aggregator::new(Arc::new(Snapshot::new(10)));
        aggregator.merge(vec![vec![token("keep", 1.0, 1.0)]]);

        let delta = aggregator.merge(Vec::<Vec<Token>>::new());
        assert!(delta.is_empty());
        assert_eq!(aggregator.snapshot().len(), 1);
    }
}
