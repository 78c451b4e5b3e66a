use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Bytes the primary pass samples at most (stride-sampled)
const HASH_SAMPLE_TARGET: usize = 4096;
/// Bytes at the end of the input that are always hashed in full
const HASH_TAIL_WINDOW: usize = 1024;

/// Memoization key for image content. Not cryptographic.
///
/// A DJB2 pass over a stride-sampled subsequence, a second DJB2 variant over
/// the tail, and the input length.
pub fn content_hash(bytes: &[u8]) -> u64 {
    let len = bytes.len();
    let stride = (len / HASH_SAMPLE_TARGET).max(1);

    let mut primary: u64 = 5381;
    for &b in bytes.iter().step_by(stride) {
        primary = primary.wrapping_mul(33).wrapping_add(b as u64);
    }

    let tail = &bytes[len.saturating_sub(HASH_TAIL_WINDOW)..];
    let mut secondary: u64 = 5381;
    for &b in tail {
        secondary = secondary.wrapping_mul(33) ^ b as u64;
    }

    primary ^ secondary.rotate_left(29) ^ (len as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
    /// Entries dropped in one pass once `max_entries` is exceeded
    pub evict_batch: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_entries: 50,
            evict_batch: 10,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    /// Breaks ties between entries inserted within the same clock tick
    seq: u64,
}

/// Content-hash keyed cache with TTL expiry and oldest-first batch eviction
#[derive(Debug)]
pub struct ResultCache<V> {
    entries: HashMap<u64, CacheEntry<V>>,
    ttl: Duration,
    max_entries: usize,
    evict_batch: usize,
    next_seq: u64,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_ttl(
            Duration::from_secs(config.ttl_secs),
            config.max_entries,
            config.evict_batch,
        )
    }

    pub fn with_ttl(ttl: Duration, max_entries: usize, evict_batch: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
            evict_batch: evict_batch.max(1),
            next_seq: 0,
        }
    }

    pub fn get(&mut self, key: u64) -> Option<V> {
        let expired = self
            .entries
            .get(&key)
            .map(|e| e.inserted_at.elapsed() >= self.ttl)?;
        if expired {
            self.entries.remove(&key);
            debug!("Cache entry {:016x} expired", key);
            return None;
        }
        self.entries.get(&key).map(|e| e.value.clone())
    }

    pub fn insert(&mut self, key: u64, value: V) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                seq,
            },
        );

        if self.entries.len() > self.max_entries {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!("Cache purged {} expired entries", purged);
            }
            if self.entries.len() > self.max_entries {
                self.evict_oldest();
            }
        }
    }

    fn evict_oldest(&mut self) {
        let mut by_age: Vec<(Instant, u64, u64)> = self
            .entries
            .iter()
            .map(|(k, e)| (e.inserted_at, e.seq, *k))
            .collect();
        by_age.sort_unstable();

        // at least enough to get back under the cap
        let count = self
            .evict_batch
            .max(self.entries.len() - self.max_entries)
            .min(by_age.len());
        for (_, _, key) in by_age.into_iter().take(count) {
            self.entries.remove(&key);
        }
        debug!("Cache evicted {} oldest entries, {} remain", count, self.entries.len());
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
        before - self.entries.len()
    }

    pub fn contains(&self, key: u64) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i * 31 % 251) as u8).collect();
        assert_eq!(content_hash(&data), content_hash(&data.clone()));
        assert_eq!(content_hash(&[]), content_hash(&[]));
    }

    #[test]
    fn test_hash_sees_length_and_tail() {
        let data = vec![7u8; 50_000];
        let mut longer = data.clone();
        longer.push(7);
        assert_ne!(content_hash(&data), content_hash(&longer));

        let mut tail_changed = data.clone();
        tail_changed[49_999] = 8;
        assert_ne!(content_hash(&data), content_hash(&tail_changed));

        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
    }

    #[test]
    fn test_eviction_drops_oldest_ten() {
        let mut cache = ResultCache::with_ttl(Duration::from_secs(60), 50, 10);
        for key in 0..50u64 {
            cache.insert(key, key);
        }
        assert_eq!(cache.len(), 50);

        cache.insert(50, 50);
        assert_eq!(cache.len(), 41);
        for key in 0..10u64 {
            assert!(!cache.contains(key), "key {} should be evicted", key);
        }
        for key in 10..=50u64 {
            assert_eq!(cache.get(key), Some(key));
        }
    }

    #[test]
    fn test_reinsert_does_not_evict() {
        let mut cache = ResultCache::with_ttl(Duration::from_secs(60), 3, 10);
        cache.insert(1, "a");
        cache.insert(2, "b");
        cache.insert(3, "c");
        cache.insert(3, "c2");
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(3), Some("c2"));
    }

    #[test]
    fn test_full_cache_drops_expired_before_evicting() {
        let mut cache = ResultCache::with_ttl(Duration::from_millis(50), 3, 10);
        for key in 1..=3u64 {
            cache.insert(key, key);
        }
        std::thread::sleep(Duration::from_millis(80));

        cache.insert(4, 4);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(4), Some(4));
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = ResultCache::with_ttl(Duration::ZERO, 10, 2);
        cache.insert(1, "a");
        assert_eq!(cache.get(1), None);
        assert!(cache.is_empty());

        let mut cache = ResultCache::with_ttl(Duration::ZERO, 10, 2);
        cache.insert(1, "a");
        cache.insert(2, "b");
        assert_eq!(cache.purge_expired(), 2);
    }
}
