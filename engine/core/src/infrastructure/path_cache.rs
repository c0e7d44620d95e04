// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Path Resolution Cache
//!
//! Bounded LRU+TTL map from `(tenant, [user,] path)` to resolved nodes.
//! Tenant isolation is always enforced; user isolation is optional and
//! gives each principal a separate entry space so nodes whose permissions
//! differ between principals never leak across a shared entry.
//!
//! Invalidation is the only thing keeping this cache correct — it runs on
//! every mutation (see the resolver's event subscription). Entries are
//! additionally re-verified by the resolver on every hit, so a stale entry
//! can cost one extra lookup but never serves a deleted or moved node.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::domain::node::Node;

#[derive(Debug, Clone)]
pub struct PathCacheConfig {
    /// Capacity; least-recently-accessed entries are evicted on overflow
    pub max_entries: usize,
    /// Entry time-to-live; expired entries are treated as misses
    pub ttl: Duration,
    /// When enabled, each user gets a separate entry space
    pub user_isolation: bool,
    /// Expired-entry sweep cadence
    pub sweep_interval: Duration,
}

impl Default for PathCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_millis(300_000),
            user_isolation: false,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    tenant: String,
    user: Option<String>,
    path: String,
}

struct CacheEntry {
    node: Node,
    created_at: Instant,
}

/// Point-in-time statistics snapshot
#[derive(Debug, Clone, serde::Serialize)]
pub struct PathCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub size: usize,
    pub hit_rate: f64,
}

/// Shared, concurrency-safe path cache
pub struct PathCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    config: PathCacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl PathCache {
    pub fn new(config: PathCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries.max(1)).expect("max(1) is non-zero");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(PathCacheConfig::default())
    }

    fn key(&self, tenant: &str, user: &str, path: &str) -> CacheKey {
        CacheKey {
            tenant: tenant.to_string(),
            user: self.config.user_isolation.then(|| user.to_string()),
            path: path.to_string(),
        }
    }

    /// Look up a path. Expired entries count as misses and are dropped.
    pub fn get(&self, tenant: &str, user: &str, path: &str) -> Option<Node> {
        let key = self.key(tenant, user, path);
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(entry) if entry.created_at.elapsed() < self.config.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.node.clone())
            }
            Some(_) => {
                entries.pop(&key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, tenant: &str, user: &str, path: &str, node: Node) {
        let key = self.key(tenant, user, path);
        let mut entries = self.entries.lock();
        let evicted = entries.push(
            key.clone(),
            CacheEntry {
                node,
                created_at: Instant::now(),
            },
        );
        if let Some((old_key, _)) = evicted {
            if old_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Remove one path (every user's entry for it)
    pub fn invalidate_path(&self, tenant: &str, path: &str) {
        self.remove_matching(|key, _| key.tenant == tenant && key.path == path);
    }

    /// Remove a whole subtree: folder rename, move or delete
    pub fn invalidate_prefix(&self, tenant: &str, prefix: &str) {
        let normalized = prefix.trim_end_matches('/');
        self.remove_matching(|key, _| {
            key.tenant == tenant
                && (key.path == normalized
                    || key
                        .path
                        .strip_prefix(normalized)
                        .is_some_and(|rest| rest.starts_with('/')))
        });
    }

    /// Fallback when the caller knows the uuid but not the path; linear scan
    pub fn invalidate_by_uuid(&self, tenant: &str, uuid: &str) {
        self.remove_matching(|key, entry| key.tenant == tenant && entry.node.uuid == uuid);
    }

    /// Invalidate the paths of every entry resolving to `uuid`, each as a
    /// prefix — the uuid may be a folder
    pub fn invalidate_subtree_by_uuid(&self, tenant: &str, uuid: &str) {
        let paths: Vec<String> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .filter(|(key, entry)| key.tenant == tenant && entry.node.uuid == uuid)
                .map(|(key, _)| key.path.clone())
                .collect()
        };
        for path in paths {
            self.invalidate_prefix(tenant, &path);
        }
    }

    pub fn invalidate_tenant(&self, tenant: &str) {
        self.remove_matching(|key, _| key.tenant == tenant);
    }

    /// Drop expired entries
    pub fn sweep(&self) {
        let ttl = self.config.ttl;
        let mut entries = self.entries.lock();
        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| entry.created_at.elapsed() >= ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            entries.pop(&key);
        }
    }

    /// Spawn the periodic sweep task
    pub fn start_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let cache = self;
        let interval = cache.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.sweep();
                debug!(size = cache.len(), "path cache sweep completed");
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PathCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        PathCacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            size: self.len(),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    fn remove_matching(&self, predicate: impl Fn(&CacheKey, &CacheEntry) -> bool) {
        let mut entries = self.entries.lock();
        let keys: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, entry)| predicate(key, entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            entries.pop(key);
        }
        self.invalidations
            .fetch_add(keys.len() as u64, Ordering::Relaxed);
    }
}
