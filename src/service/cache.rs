//! Memoized solve results, bounded by entry count and age.
//!
//! Entries are spread over shards by fingerprint, each shard an LRU list
//! behind its own mutex. Locking is per shard, not per key: two fingerprints
//! that land in the same shard serialize, fingerprints in different shards do
//! not contend. The capacity bound is global. When it is exceeded, the entry
//! least recently used across all shards is evicted.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use log::trace;
use lru::LruCache;
use parking_lot::Mutex;

use crate::domain::fingerprint::Fingerprint;
use crate::domain::result::{SolveResult, SolveStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub result: SolveResult,
    /// Time budget the result was produced under.
    pub time_limit: Duration,
    pub created_at: Instant,
    pub last_access: Instant,
    /// Global access order; the smallest tail across shards is evicted first.
    recency: u64,
}

impl CacheEntry {
    /// A `TIMEOUT` result only answers requests that grant no more time than
    /// the solve that produced it.
    pub fn serves(&self, time_limit: Duration) -> bool {
        self.result.status != SolveStatus::Timeout || time_limit <= self.time_limit
    }
}

type Shard = Mutex<LruCache<Fingerprint, CacheEntry>>;

pub struct ResultCache {
    shards: Vec<Shard>,
    capacity: usize,
    ttl: Duration,
    len: AtomicUsize,
    clock: AtomicU64,
    expired: AtomicU64,
}

impl ResultCache {
    /// Holds at most `capacity` entries in total. A capacity of zero disables
    /// caching.
    pub fn new(capacity: usize, ttl: Duration, shards: usize) -> Self {
        let shard_count = if capacity == 0 {
            0
        } else {
            shards.clamp(1, capacity)
        };
        // Shards are unbounded; `put` enforces the global bound.
        ResultCache {
            shards: (0..shard_count)
                .map(|_| Mutex::new(LruCache::unbounded()))
                .collect(),
            capacity,
            ttl,
            len: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    fn shard(&self, fingerprint: &Fingerprint) -> Option<&Shard> {
        self.shards.get(fingerprint.shard_index(self.shards.len()))
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<SolveResult> {
        self.lookup(fingerprint).map(|entry| entry.result)
    }

    /// Full entry for `fingerprint`, refreshing its LRU position. Expired
    /// entries are dropped on the way.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let mut shard = self.shard(fingerprint)?.lock();
        let now = Instant::now();
        let expired = shard
            .peek(fingerprint)
            .is_some_and(|entry| now.duration_since(entry.created_at) >= self.ttl);
        if expired {
            if shard.pop(fingerprint).is_some() {
                self.len.fetch_sub(1, Ordering::Relaxed);
            }
            self.expired.fetch_add(1, Ordering::Relaxed);
            trace!("Cache entry {fingerprint:?} expired");
            return None;
        }
        let recency = self.tick();
        let entry = shard.get_mut(fingerprint)?;
        entry.last_access = now;
        entry.recency = recency;
        Some(entry.clone())
    }

    pub fn put(&self, fingerprint: Fingerprint, result: SolveResult, time_limit: Duration) {
        if !result.status.is_cacheable() {
            return;
        }
        let Some(shard) = self.shard(&fingerprint) else {
            return;
        };
        let now = Instant::now();
        let entry = CacheEntry {
            fingerprint,
            result,
            time_limit,
            created_at: now,
            last_access: now,
            recency: self.tick(),
        };
        // replaced in place
        if shard.lock().put(fingerprint, entry).is_some() {
            return;
        }
        let mut len = self.len.fetch_add(1, Ordering::Relaxed) + 1;
        while len > self.capacity {
            if !self.evict_oldest() {
                break;
            }
            len = self.len.load(Ordering::Relaxed);
        }
    }

    /// Remove the least recently used entry across all shards. Only one shard
    /// lock is held at a time; if the chosen tail moved in between, the scan
    /// starts over.
    fn evict_oldest(&self) -> bool {
        loop {
            let oldest = self
                .shards
                .iter()
                .enumerate()
                .filter_map(|(i, shard)| {
                    shard
                        .lock()
                        .peek_lru()
                        .map(|(fp, entry)| (i, *fp, entry.recency))
                })
                .min_by_key(|(_, _, recency)| *recency);
            let Some((index, fingerprint, recency)) = oldest else {
                return false;
            };
            let mut shard = self.shards[index].lock();
            let still_oldest = shard
                .peek_lru()
                .is_some_and(|(fp, entry)| *fp == fingerprint && entry.recency == recency);
            if still_oldest {
                shard.pop_lru();
                self.len.fetch_sub(1, Ordering::Relaxed);
                trace!("Cache entry {fingerprint:?} evicted");
                return true;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            let mut shard = shard.lock();
            self.len.fetch_sub(shard.len(), Ordering::Relaxed);
            shard.clear();
        }
    }

    /// Drop every entry past its time-to-live. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let stale: Vec<Fingerprint> = shard
                .iter()
                .filter(|(_, entry)| now.duration_since(entry.created_at) >= self.ttl)
                .map(|(fp, _)| *fp)
                .collect();
            for fp in &stale {
                shard.pop(fp);
            }
            self.len.fetch_sub(stale.len(), Ordering::Relaxed);
            removed += stale.len();
        }
        self.expired.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Entries dropped because of their age so far.
    pub fn expired_count(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }
}
