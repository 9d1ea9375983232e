//! Memoization for upstream lookups during enhancement runs.
//!
//! Five independent TTL caches, one per lookup type. Negative results are
//! cached with the same TTL; without that the multi-hop search re-queries
//! shared subgraphs on every event that touches them.

use {
    classifier::NodeOperator,
    dashmap::DashMap,
    indexer::{AddressTx, ChainTransaction},
    std::{
        hash::Hash,
        sync::atomic::{AtomicU64, Ordering},
        time::{Duration, Instant},
    },
};

/// A single map from key to value with per-entry expiry. Expired entries
/// are evicted lazily on access and in `clear_expired`.
pub struct TtlCache<K, V> {
    name: &'static str,
    map: DashMap<K, Entry<V>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub entries: usize,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            map: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        {
            match self.map.get(key) {
                Some(entry) if entry.expires_at > now => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }
        // The read guard is released; evict the stale entry.
        self.map.remove_if(key, |_, entry| entry.expires_at <= now);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
        self.map.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn clear_expired(&self) {
        let now = Instant::now();
        self.map.retain(|_, entry| entry.expires_at > now);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            entries: self.map.len(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Result of a coinbase receipt scan over a block window.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CoinbaseInfo {
    pub count: u32,
    pub last_block: i64,
    pub last_timestamp: i64,
}

/// Result of a historical connection scan.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionInfo {
    pub node_wallet: String,
    pub connection_txid: String,
    pub connection_timestamp: i64,
    pub coinbase_count: Option<u32>,
}

/// TTLs per lookup type. Short relative to how often the underlying data
/// can actually change, long relative to one enhancement run.
#[derive(Clone, Copy, Debug)]
pub struct CacheTtls {
    pub wallet_transactions: Duration,
    pub coinbase: Duration,
    pub connection: Duration,
    pub operator_status: Duration,
    pub transaction_bodies: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            wallet_transactions: Duration::from_secs(5 * 60),
            coinbase: Duration::from_secs(60 * 60),
            connection: Duration::from_secs(60 * 60),
            operator_status: Duration::from_secs(5 * 60),
            transaction_bodies: Duration::from_secs(10 * 60),
        }
    }
}

/// The five caches used by one engine instance.
pub struct EnhancementCache {
    pub wallet_transactions: TtlCache<String, Vec<AddressTx>>,
    /// Keyed by (address, window start, window end); `None` is a cached
    /// negative.
    pub coinbase: TtlCache<(String, i64, i64), Option<CoinbaseInfo>>,
    /// Keyed by (address, trace direction, window start).
    pub connection: TtlCache<(String, &'static str, i64), Option<ConnectionInfo>>,
    pub operator_status: TtlCache<String, Option<NodeOperator>>,
    pub transaction_bodies: TtlCache<String, ChainTransaction>,
}

impl EnhancementCache {
    pub fn new(ttls: CacheTtls) -> Self {
        Self {
            wallet_transactions: TtlCache::new("wallet_transactions", ttls.wallet_transactions),
            coinbase: TtlCache::new("coinbase", ttls.coinbase),
            connection: TtlCache::new("connection", ttls.connection),
            operator_status: TtlCache::new("operator_status", ttls.operator_status),
            transaction_bodies: TtlCache::new("transaction_bodies", ttls.transaction_bodies),
        }
    }

    /// Opportunistic cleanup at the end of a run.
    pub fn clear_expired(&self) {
        self.wallet_transactions.clear_expired();
        self.coinbase.clear_expired();
        self.connection.clear_expired();
        self.operator_status.clear_expired();
        self.transaction_bodies.clear_expired();
    }

    pub fn log_stats(&self) {
        for (name, stats) in [
            ("wallet_transactions", self.wallet_transactions.stats()),
            ("coinbase", self.coinbase.stats()),
            ("connection", self.connection.stats()),
            ("operator_status", self.operator_status.stats()),
            ("transaction_bodies", self.transaction_bodies.stats()),
        ] {
            tracing::debug!(
                cache = name,
                hits = stats.hits,
                misses = stats.misses,
                inserts = stats.inserts,
                entries = stats.entries,
                "cache stats"
            );
        }
    }
}

impl Default for EnhancementCache {
    fn default() -> Self {
        Self::new(CacheTtls::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_values_until_expiry() {
        let cache: TtlCache<String, u32> = TtlCache::new("test", Duration::from_secs(60));
        assert_eq!(cache.get(&"a".to_string()), None);
        cache.insert("a".to_string(), 7);
        assert_eq!(cache.get(&"a".to_string()), Some(7));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.inserts, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn expired_entries_are_evicted_on_access() {
        let cache: TtlCache<String, u32> = TtlCache::new("test", Duration::ZERO);
        cache.insert("a".to_string(), 7);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&"a".to_string()), None);
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn negative_results_are_cached() {
        let cache: TtlCache<(String, i64, i64), Option<CoinbaseInfo>> =
            TtlCache::new("coinbase", Duration::from_secs(60));
        let key = ("t1a".to_string(), 0, 100);
        cache.insert(key.clone(), None);
        // A cached negative is a hit, not a miss.
        assert_eq!(cache.get(&key), Some(None));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn clear_expired_retains_live_entries() {
        let cache: TtlCache<u32, u32> = TtlCache::new("test", Duration::from_secs(60));
        cache.insert(1, 1);
        cache.clear_expired();
        assert_eq!(cache.stats().entries, 1);
    }
}
