//! In-memory state for both limiter algorithms.
//!
//! The store keeps two independent concurrent maps, one per algorithm. A
//! check runs its whole read-compute-write under the key's shard lock, so two
//! concurrent requests for the same key can never both observe the last free
//! slot.
//!
//! There is no background task. Each map counts its accesses and sweeps
//! stale entries every `cleanup_interval` accesses, which keeps the store
//! safe in runtimes that freeze or recycle the process between requests.
//! When a map is at its `max_entries` ceiling, inserting a new key first
//! evicts the oldest tenth of entries by insertion order. New keys are
//! admitted one at a time so concurrent inserts cannot overshoot the
//! ceiling; updates to existing keys never wait on admission.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use super::sliding_window::SlidingWindowEntry;
use super::token_bucket::TokenBucketEntry;
use crate::config::StoreConfig;
use crate::error::Result;

/// Entry counts per map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Keys tracked by the sliding window limiter
    pub sliding_window_entries: usize,
    /// Keys tracked by the token bucket limiter
    pub token_bucket_entries: usize,
}

impl StoreStats {
    /// Total tracked keys across both maps.
    pub fn total(&self) -> usize {
        self.sliding_window_entries + self.token_bucket_entries
    }
}

/// Stored value tagged with its insertion sequence number.
#[derive(Debug)]
struct Slot<E> {
    seq: u64,
    entry: E,
}

/// One algorithm's key map with its housekeeping counters.
#[derive(Debug)]
struct EntryMap<E> {
    name: &'static str,
    entries: DashMap<String, Slot<E>>,
    accesses: AtomicU64,
    next_seq: AtomicU64,
    /// Held across the capacity check and the insert of a new key.
    admission: Mutex<()>,
}

impl<E> EntryMap<E> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            accesses: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
            admission: Mutex::new(()),
        }
    }

    /// Read-modify-write the entry for `key` atomically.
    ///
    /// `on_hit` updates an existing entry; `on_insert` builds the entry for a
    /// key seen for the first time. Both return the caller's result.
    fn upsert<R>(
        &self,
        key: &str,
        config: &StoreConfig,
        expired: impl Fn(&E) -> bool,
        on_insert: impl FnOnce() -> (E, R),
        on_hit: impl FnOnce(&mut E) -> R,
    ) -> R {
        self.touch(config, expired);

        if let Some(mut slot) = self.entries.get_mut(key) {
            return on_hit(&mut slot.entry);
        }

        // Never hold a shard lock here: eviction walks every shard.
        let _admission = self.admission.lock();
        self.enforce_capacity(config.max_entries);

        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => on_hit(&mut occupied.get_mut().entry),
            Entry::Vacant(vacant) => {
                let (entry, result) = on_insert();
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                vacant.insert(Slot { seq, entry });
                result
            }
        }
    }

    /// Count an access and sweep on every `cleanup_interval`th one.
    fn touch(&self, config: &StoreConfig, expired: impl Fn(&E) -> bool) {
        let count = self.accesses.fetch_add(1, Ordering::Relaxed) + 1;
        if count % config.cleanup_interval.max(1) == 0 {
            self.sweep(expired);
        }
    }

    fn sweep(&self, expired: impl Fn(&E) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| !expired(&slot.entry));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(map = self.name, removed, remaining = self.entries.len(), "Swept stale entries");
        }
        removed
    }

    /// Evict the oldest 10% (at least one) when the map is full.
    fn enforce_capacity(&self, max_entries: usize) {
        let len = self.entries.len();
        if len < max_entries {
            return;
        }

        let to_evict = (max_entries / 10).max(1).min(len);
        let mut by_age: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|item| (item.value().seq, item.key().clone()))
            .collect();
        if to_evict < by_age.len() {
            by_age.select_nth_unstable(to_evict - 1);
        }
        for (_, key) in by_age.into_iter().take(to_evict) {
            self.entries.remove(&key);
        }

        warn!(
            map = self.name,
            evicted = to_evict,
            max_entries,
            "Store at capacity, evicted oldest entries"
        );
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

/// Per-key limiter state for both algorithms.
#[derive(Debug)]
pub struct Store {
    config: StoreConfig,
    windows: EntryMap<SlidingWindowEntry>,
    buckets: EntryMap<TokenBucketEntry>,
}

impl Store {
    /// Create an empty store with default housekeeping settings.
    pub fn new() -> Self {
        Self::unchecked(StoreConfig::default())
    }

    /// Create an empty store with the given housekeeping settings.
    ///
    /// Fails with [`TollgateError::Config`](crate::error::TollgateError::Config)
    /// when `cleanup_interval` or `max_entries` is zero.
    pub fn with_config(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::unchecked(config))
    }

    fn unchecked(config: StoreConfig) -> Self {
        Self {
            config,
            windows: EntryMap::new("sliding_window"),
            buckets: EntryMap::new("token_bucket"),
        }
    }

    /// The housekeeping settings in effect.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn update_window<R>(
        &self,
        key: &str,
        now: Instant,
        on_insert: impl FnOnce() -> (SlidingWindowEntry, R),
        on_hit: impl FnOnce(&mut SlidingWindowEntry) -> R,
    ) -> R {
        self.windows
            .upsert(key, &self.config, |e| e.is_expired(now), on_insert, on_hit)
    }

    pub(crate) fn update_bucket<R>(
        &self,
        key: &str,
        now: Instant,
        on_insert: impl FnOnce() -> (TokenBucketEntry, R),
        on_hit: impl FnOnce(&mut TokenBucketEntry) -> R,
    ) -> R {
        let idle_ttl = self.config.bucket_idle_ttl();
        self.buckets
            .upsert(key, &self.config, |e| e.is_expired(now, idle_ttl), on_insert, on_hit)
    }

    /// Snapshot of the sliding window entry for `key`.
    pub fn window_entry(&self, key: &str) -> Option<SlidingWindowEntry> {
        self.windows.entries.get(key).map(|slot| slot.entry.clone())
    }

    /// Snapshot of the token bucket entry for `key`.
    pub fn bucket_entry(&self, key: &str) -> Option<TokenBucketEntry> {
        self.buckets.entries.get(key).map(|slot| slot.entry.clone())
    }

    /// Sweep both maps immediately, returning the number of entries removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let idle_ttl = self.config.bucket_idle_ttl();
        self.windows.sweep(|e| e.is_expired(now)) + self.buckets.sweep(|e| e.is_expired(now, idle_ttl))
    }

    /// Current entry counts. Does not trigger housekeeping.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            sliding_window_entries: self.windows.len(),
            token_bucket_entries: self.buckets.len(),
        }
    }

    /// Drop all state.
    pub fn clear(&self) {
        self.windows.clear();
        self.buckets.clear();
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
