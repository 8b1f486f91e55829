//! Time-ordered collections used to dedupe postpone-resumption UUIDs and to
//! track rate-limit ban entries.
//!
//! Backed by a deque of `(expiry, key)` pairs plus a hash index so lookup
//! is O(1) while expiry sweeps stay amortized O(1) per entry.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::Instant;

pub struct ExpiringMap<K, V> {
    index: HashMap<K, V>,
    order: VecDeque<(Instant, K)>,
}

impl<K, V> ExpiringMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self { index: HashMap::new(), order: VecDeque::new() }
    }

    /// Insert or replace `key`, due to expire at `expiry`.
    pub fn add(&mut self, key: K, value: V, expiry: Instant) {
        self.order.push_back((expiry, key.clone()));
        self.index.insert(key, value);
    }

    /// Remove and return `key`'s value if present, regardless of expiry.
    pub fn extract(&mut self, key: &K) -> Option<V> {
        self.index.remove(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.index.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn count(&self) -> usize {
        self.index.len()
    }

    /// Pop every entry whose expiry is `<= now`, in expiry order. Entries
    /// already removed via `extract` are skipped (the stale order-deque
    /// slot is discarded lazily).
    pub fn expire_due(&mut self, now: Instant) -> Vec<(K, V)> {
        let mut expired = Vec::new();
        while let Some((expiry, _)) = self.order.front() {
            if *expiry > now {
                break;
            }
            let (_, key) = self.order.pop_front().unwrap();
            if let Some(value) = self.index.remove(&key) {
                expired.push((key, value));
            }
        }
        expired
    }
}

impl<K, V> Default for ExpiringMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

pub type ExpiringSet<K> = ExpiringMap<K, ()>;
