// Latest-price cache keyed by canonical token key
// Lookups fall back from exact key to suffix variants to a prefix index.

use crate::key::KeyNormalizer;
use crate::models::PriceUpdate;
use crate::settings::StreamSettings;
use log::debug;
use lru::LruCache;
use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Which lookup strategy produced a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupPath {
    Exact,
    SuffixVariant,
    /// Best-effort match on a shared key prefix. May be a false positive.
    Prefix,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceHit {
    pub price: f64,
    /// Cache key that matched
    pub key: String,
    pub path: LookupPath,
}

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price: f64,
    sequence: Option<u64>,
}

struct CacheInner {
    entries: LruCache<String, CachedPrice>,
    prefix_index: HashMap<String, BTreeSet<String>>,
}

pub struct PriceCache {
    normalizer: KeyNormalizer,
    /// Longest first
    prefix_lengths: Vec<usize>,
    inner: RwLock<CacheInner>,
    fuzzy_hits: AtomicU64,
}

impl PriceCache {
    pub fn new(
        normalizer: KeyNormalizer,
        prefix_lengths: &[usize],
        capacity: Option<NonZeroUsize>,
    ) -> Self {
        let mut lengths: Vec<usize> = prefix_lengths.iter().copied().filter(|l| *l > 0).collect();
        lengths.sort_unstable_by(|a, b| b.cmp(a));
        lengths.dedup();

        let entries = match capacity {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };

        Self {
            normalizer,
            prefix_lengths: lengths,
            inner: RwLock::new(CacheInner {
                entries,
                prefix_index: HashMap::new(),
            }),
            fuzzy_hits: AtomicU64::new(0),
        }
    }

    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self::new(
            KeyNormalizer::new(&settings.key_suffix),
            &settings.prefix_lengths,
            settings.price_cache_capacity.and_then(NonZeroUsize::new),
        )
    }

    pub fn normalizer(&self) -> &KeyNormalizer {
        &self.normalizer
    }

    /// Store `price` under the canonical form of `raw_key` (last write wins).
    pub fn update(&self, raw_key: &str, price: f64) {
        self.store(raw_key, price, None);
    }

    /// Store a decoded update. Returns false when the update carries a
    /// sequence older than the one already cached.
    pub fn apply(&self, update: &PriceUpdate) -> bool {
        self.store(&update.key, update.price, update.sequence)
    }

    fn store(&self, raw_key: &str, price: f64, sequence: Option<u64>) -> bool {
        let key = self.normalizer.normalize(raw_key);
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        if let (Some(new_seq), Some(existing)) = (sequence, inner.entries.peek(key.as_str())) {
            if let Some(cached_seq) = existing.sequence {
                if new_seq < cached_seq {
                    debug!(
                        "Dropping stale price for {}: seq {} < cached {}",
                        key, new_seq, cached_seq
                    );
                    return false;
                }
            }
        }

        let evicted = inner
            .entries
            .push(key.clone(), CachedPrice { price, sequence });
        if let Some((old_key, _)) = evicted {
            if old_key != key {
                self.unindex(&mut inner, &old_key);
            }
        }

        for len in &self.prefix_lengths {
            if let Some(prefix) = key.get(..*len) {
                inner
                    .prefix_index
                    .entry(prefix.to_string())
                    .or_default()
                    .insert(key.clone());
            }
        }
        true
    }

    fn unindex(&self, inner: &mut CacheInner, key: &str) {
        for len in &self.prefix_lengths {
            if let Some(prefix) = key.get(..*len) {
                if let Some(bucket) = inner.prefix_index.get_mut(prefix) {
                    bucket.remove(key);
                    if bucket.is_empty() {
                        inner.prefix_index.remove(prefix);
                    }
                }
            }
        }
    }

    /// Latest price for `raw_key`, or 0.0 when no strategy finds one.
    pub fn lookup(&self, raw_key: &str) -> f64 {
        self.resolve(raw_key).map(|hit| hit.price).unwrap_or(0.0)
    }

    /// Exact or suffix-variant match only.
    pub fn lookup_exact(&self, raw_key: &str) -> Option<PriceHit> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        self.resolve_exact(&inner, raw_key)
    }

    pub fn resolve(&self, raw_key: &str) -> Option<PriceHit> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = self.resolve_exact(&inner, raw_key) {
            return Some(hit);
        }
        self.resolve_by_prefix(&inner, raw_key)
    }

    fn resolve_exact(&self, inner: &CacheInner, raw_key: &str) -> Option<PriceHit> {
        for (idx, candidate) in self.normalizer.candidates(raw_key).into_iter().enumerate() {
            if let Some(entry) = inner.entries.peek(candidate.as_str()) {
                let path = if idx == 0 {
                    LookupPath::Exact
                } else {
                    LookupPath::SuffixVariant
                };
                return Some(PriceHit {
                    price: entry.price,
                    key: candidate,
                    path,
                });
            }
        }
        None
    }

    fn resolve_by_prefix(&self, inner: &CacheInner, raw_key: &str) -> Option<PriceHit> {
        let key = self.normalizer.normalize(raw_key);
        for len in &self.prefix_lengths {
            let Some(prefix) = key.get(..*len) else {
                continue;
            };
            let Some(bucket) = inner.prefix_index.get(prefix) else {
                continue;
            };
            for cached_key in bucket {
                if let Some(entry) = inner.entries.peek(cached_key.as_str()) {
                    self.fuzzy_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "Price for {} resolved by {}-char prefix match on {}",
                        key, len, cached_key
                    );
                    return Some(PriceHit {
                        price: entry.price,
                        key: cached_key.clone(),
                        path: LookupPath::Prefix,
                    });
                }
            }
        }
        None
    }

    /// Copy of every cached price
    pub fn snapshot(&self) -> HashMap<String, f64> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.price))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of lookups answered by the prefix fallback so far
    pub fn fuzzy_hit_count(&self) -> u64 {
        self.fuzzy_hits.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn indexed_keys(&self, prefix: &str) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .prefix_index
            .get(prefix)
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::from_settings(&StreamSettings::default())
    }
}
