//! Init-state cache
//!
//! Clients bootstrap from an "init" payload assembled from a handful of
//! metadata records (ruler, culture, religion, ...). Assembled payloads are
//! kept here until one of those records is written, at which point the
//! ledger calls [`InitCache::invalidate_on_write`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info};

use crate::store::METADATA_COLLECTION;

/// Prefix shared by every init payload key
pub const INIT_KEY_PREFIX: &str = "init:";

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL for assembled init payloads
    pub ttl: Duration,
    /// Metadata ids whose writes invalidate init payloads
    pub watched_metadata_ids: HashSet<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            watched_metadata_ids: [
                "ruler",
                "culture",
                "religion",
                "religionGeneral",
                "capital",
                "province",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

/// Lookaside cache for init payloads
pub struct InitCache {
    entries: DashMap<String, CacheEntry>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl InitCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Cache key for an init payload variant (e.g. a locale)
    pub fn init_key(variant: &str) -> String {
        format!("{}{}", INIT_KEY_PREFIX, variant)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = key, "Cache hit");
                return Some(entry.value.clone());
            }
            drop(entry);
            self.entries.remove(key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = key, "Cache miss");
        None
    }

    pub fn set(&self, key: &str, value: Value) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.config.ttl,
        };
        self.entries.insert(key.to_string(), entry);
    }

    /// Remove entries whose key starts with `prefix`
    pub fn invalidate_pattern(&self, prefix: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();

        let count = keys.len();
        for key in keys {
            self.entries.remove(&key);
        }
        count
    }

    /// Hook called after a write to `collection/id` has been committed.
    ///
    /// Returns the number of entries dropped.
    pub fn invalidate_on_write(&self, collection: &str, id: &str) -> usize {
        if collection != METADATA_COLLECTION || !self.config.watched_metadata_ids.contains(id) {
            return 0;
        }

        self.invalidations.fetch_add(1, Ordering::Relaxed);
        let removed = self.invalidate_pattern(INIT_KEY_PREFIX);
        info!(id = id, removed = removed, "Init cache invalidated");
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}
