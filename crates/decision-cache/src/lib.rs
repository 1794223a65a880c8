//! Sharded LRU+TTL cache for authorization decisions.
//!
//! Entries are keyed by the 128-bit input fingerprint and carry the decision
//! plus per-entry expiry. Shard selection uses the fingerprint's own bits, so
//! readers on different shards never contend; writers contend only within a
//! shard. Secondary indices by principal id and by policy version make
//! pattern invalidation O(affected entries) instead of O(capacity).
//!
//! The cache never fails: expired entries are dropped lazily on lookup plus
//! a periodic sweep, index inconsistencies are self-healed and counted, and
//! the shard locks do not poison on panic.

#![deny(unsafe_code)]

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;
use warden_core::decision::AuthorizationDecision;
use warden_core::fingerprint::Fingerprint;

/// Cache sizing knobs.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Total entry budget across shards.
    pub capacity: usize,
    /// Shard count; rounded up to a power of two, minimum 1.
    pub shard_count: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 10_000, shard_count: 16 }
    }
}

/// Which index to purge in [`DecisionCache::invalidate_matching`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationKey {
    /// All entries whose input principal has this id.
    Principal(String),
    /// All entries produced under this policy bundle version.
    PolicyVersion(String),
}

/// Counter snapshot for the stats endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    /// Live entries (including not-yet-swept expired ones).
    pub size: usize,
    /// Configured total capacity.
    pub capacity: usize,
    /// Number of shards.
    pub shard_count: usize,
    /// Lookup hits.
    pub hits: u64,
    /// Lookup misses (including expired-on-lookup).
    pub misses: u64,
    /// LRU evictions.
    pub evictions: u64,
    /// Entries dropped because their TTL passed.
    pub expirations: u64,
    /// Entries removed by explicit invalidation.
    pub invalidations: u64,
    /// Self-healed index inconsistencies.
    pub inconsistencies: u64,
}

struct CacheEntry {
    decision: Arc<AuthorizationDecision>,
    principal_id: String,
    policy_version: String,
    #[allow(dead_code)] // surfaced for debugging; not read on the hot path
    inserted_at: DateTime<Utc>,
    expires_at: Instant,
    hits: AtomicU64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
    inconsistencies: AtomicU64,
}

type Shard = Mutex<LruCache<Fingerprint, CacheEntry>>;

/// Concurrent decision cache. Construct once, share via `Arc`.
pub struct DecisionCache {
    shards: Box<[Shard]>,
    shard_mask: u64,
    capacity: usize,
    by_principal: DashMap<String, HashSet<Fingerprint>>,
    by_version: DashMap<String, HashSet<Fingerprint>>,
    counters: Counters,
}

impl DecisionCache {
    /// Build a cache with the given capacity and shard count.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let shard_count = config.shard_count.max(1).next_power_of_two();
        let capacity = config.capacity.max(1);
        let per_shard = capacity.div_ceil(shard_count);
        let per_shard = NonZeroUsize::new(per_shard).unwrap_or(NonZeroUsize::MIN);
        let shards: Vec<Shard> =
            (0..shard_count).map(|_| Mutex::new(LruCache::new(per_shard))).collect();
        Self {
            shards: shards.into_boxed_slice(),
            shard_mask: (shard_count - 1) as u64,
            capacity,
            by_principal: DashMap::new(),
            by_version: DashMap::new(),
            counters: Counters::default(),
        }
    }

    fn shard_for(&self, fingerprint: &Fingerprint) -> &Shard {
        let idx = (fingerprint.shard_key() & self.shard_mask) as usize;
        &self.shards[idx]
    }

    /// Look up a live decision. Updates LRU recency and hit counters;
    /// expired entries are dropped on the way out.
    #[must_use]
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<AuthorizationDecision>> {
        let mut shard = self.shard_for(fingerprint).lock();
        // Resolve to an owned outcome first so the entry borrow is released
        // before any removal.
        let lookup: Option<Option<Arc<AuthorizationDecision>>> =
            shard.get(fingerprint).map(|entry| {
                if entry.expires_at > Instant::now() {
                    entry.hits.fetch_add(1, Ordering::Relaxed);
                    Some(Arc::clone(&entry.decision))
                } else {
                    None
                }
            });
        match lookup {
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                trace!(%fingerprint, "decision cache miss");
                None
            }
            Some(Some(decision)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                trace!(%fingerprint, "decision cache hit");
                Some(decision)
            }
            Some(None) => {
                if let Some(entry) = shard.pop(fingerprint) {
                    self.unlink_indices(fingerprint, &entry);
                }
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                trace!(%fingerprint, "decision cache entry expired");
                None
            }
        }
    }

    /// Insert or replace a decision with the given TTL, evicting the shard's
    /// LRU victim at capacity.
    pub fn put(
        &self,
        fingerprint: Fingerprint,
        principal_id: impl Into<String>,
        decision: AuthorizationDecision,
        ttl: Duration,
    ) {
        let principal_id = principal_id.into();
        let new_version = decision.policy_version.clone();
        let entry = CacheEntry {
            policy_version: new_version.clone(),
            decision: Arc::new(decision),
            principal_id: principal_id.clone(),
            inserted_at: Utc::now(),
            expires_at: Instant::now() + ttl,
            hits: AtomicU64::new(0),
        };
        self.link_indices(fingerprint, &entry);
        let evicted = {
            let mut shard = self.shard_for(&fingerprint).lock();
            shard.push(fingerprint, entry)
        };
        if let Some((victim_fp, victim)) = evicted {
            if victim_fp == fingerprint {
                // Same-key replacement: keep the fresh links, drop only the
                // stale ones the new entry does not share.
                if victim.principal_id != principal_id {
                    self.unlink_one(&self.by_principal, &victim.principal_id, &victim_fp, false);
                }
                if victim.policy_version != new_version {
                    self.unlink_one(&self.by_version, &victim.policy_version, &victim_fp, false);
                }
            } else {
                self.unlink_indices(&victim_fp, &victim);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                trace!(fingerprint = %victim_fp, "decision cache eviction");
            }
        }
    }

    /// Remove a single entry; no-op when absent.
    pub fn invalidate(&self, fingerprint: &Fingerprint) {
        let popped = self.shard_for(fingerprint).lock().pop(fingerprint);
        if let Some(entry) = popped {
            self.unlink_indices(fingerprint, &entry);
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove every entry matching the index key. Returns the number of
    /// entries removed. Repeated invalidation of the same key is a no-op
    /// beyond counter increments.
    pub fn invalidate_matching(&self, key: &InvalidationKey) -> usize {
        let fingerprints: Vec<Fingerprint> = match key {
            InvalidationKey::Principal(id) => {
                self.by_principal.remove(id).map(|(_, set)| set.into_iter().collect())
            }
            InvalidationKey::PolicyVersion(version) => {
                self.by_version.remove(version).map(|(_, set)| set.into_iter().collect())
            }
        }
        .unwrap_or_default();

        let mut removed = 0usize;
        for fingerprint in fingerprints {
            let popped = self.shard_for(&fingerprint).lock().pop(&fingerprint);
            match popped {
                Some(entry) => {
                    // Unlink from the *other* index only; this key's set is
                    // already taken.
                    match key {
                        InvalidationKey::Principal(_) => {
                            self.unlink_one(
                                &self.by_version,
                                &entry.policy_version,
                                &fingerprint,
                                true,
                            );
                        }
                        InvalidationKey::PolicyVersion(_) => {
                            self.unlink_one(
                                &self.by_principal,
                                &entry.principal_id,
                                &fingerprint,
                                true,
                            );
                        }
                    }
                    removed += 1;
                }
                None => {
                    // Index pointed at a missing entry; self-heal and move on.
                    self.counters.inconsistencies.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.counters.invalidations.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Drop entries whose TTL has passed. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0usize;
        for shard in self.shards.iter() {
            let mut guard = shard.lock();
            let expired: Vec<Fingerprint> = guard
                .iter()
                .filter(|(_, entry)| entry.expires_at <= now)
                .map(|(fp, _)| *fp)
                .collect();
            for fingerprint in expired {
                if let Some(entry) = guard.pop(&fingerprint) {
                    self.unlink_indices(&fingerprint, &entry);
                    self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Drop everything. Rarely used (disaster recovery).
    pub fn bulk_flush(&self) {
        let mut removed = 0u64;
        for shard in self.shards.iter() {
            let mut guard = shard.lock();
            removed += guard.len() as u64;
            guard.clear();
        }
        self.by_principal.clear();
        self.by_version.clear();
        self.counters.invalidations.fetch_add(removed, Ordering::Relaxed);
    }

    /// Current counter snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let size = self.shards.iter().map(|s| s.lock().len()).sum();
        CacheStats {
            size,
            capacity: self.capacity,
            shard_count: self.shards.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            inconsistencies: self.counters.inconsistencies.load(Ordering::Relaxed),
        }
    }

    fn link_indices(&self, fingerprint: Fingerprint, entry: &CacheEntry) {
        self.by_principal
            .entry(entry.principal_id.clone())
            .or_default()
            .insert(fingerprint);
        self.by_version
            .entry(entry.policy_version.clone())
            .or_default()
            .insert(fingerprint);
    }

    fn unlink_indices(&self, fingerprint: &Fingerprint, entry: &CacheEntry) {
        self.unlink_one(&self.by_principal, &entry.principal_id, fingerprint, false);
        self.unlink_one(&self.by_version, &entry.policy_version, fingerprint, false);
    }

    fn unlink_one(
        &self,
        index: &DashMap<String, HashSet<Fingerprint>>,
        key: &str,
        fingerprint: &Fingerprint,
        count_missing: bool,
    ) {
        let mut drop_set = false;
        if let Some(mut set) = index.get_mut(key) {
            if !set.remove(fingerprint) && count_missing {
                self.counters.inconsistencies.fetch_add(1, Ordering::Relaxed);
            }
            drop_set = set.is_empty();
        } else if count_missing {
            self.counters.inconsistencies.fetch_add(1, Ordering::Relaxed);
        }
        if drop_set {
            index.remove_if(key, |_, set| set.is_empty());
        }
    }
}

impl std::fmt::Debug for DecisionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionCache")
            .field("capacity", &self.capacity)
            .field("shards", &self.shards.len())
            .finish_non_exhaustive()
    }
}
