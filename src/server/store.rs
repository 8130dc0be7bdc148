//! TTL key store
//!
//! In-memory map from key to value bytes with optional expiry. Expiry is
//! evaluated on every access (`now >= expires_at` means absent), so the very
//! next observation after elapse reports NO_SUCH_KEY. A background sweeper
//! only reclaims capacity; it is never needed for correctness.
//!
//! Capacity follows the backing store file: a maximum number of keys and a
//! pool of fixed-size value blocks.

use crate::common::{validate_key, StoreLimits};
use crate::common::utils::glob_match;
use crate::protocol::Status;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Source of monotonic milliseconds for expiry decisions
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_ms(&self) -> u64;
}

/// Milliseconds elapsed since the clock was created
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_ms(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    /// Monotonic deadline in ms; `None` never expires
    expires_at: Option<u64>,
    blocks: u64,
}

impl Entry {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    map: HashMap<String, Entry>,
    used_blocks: u64,
}

impl StoreInner {
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.map.remove(key)?;
        self.used_blocks -= entry.blocks;
        Some(entry)
    }

    /// Drop every expired entry, returning how many were removed
    fn purge_expired(&mut self, now: u64) -> usize {
        let expired: Vec<String> = self
            .map
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }
}

/// Point-in-time store statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub keys: usize,
    pub keys_with_ttl: usize,
    pub value_bytes: u64,
    pub used_blocks: u64,
    pub free_blocks: u64,
    pub expired_total: u64,
    pub limits: StoreLimits,
}

pub struct KeyStore {
    limits: StoreLimits,
    clock: Arc<dyn Clock>,
    inner: Mutex<StoreInner>,
    expired_total: AtomicU64,
}

impl KeyStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self::with_clock(limits, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(limits: StoreLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            limits,
            clock,
            inner: Mutex::new(StoreInner::default()),
            expired_total: AtomicU64::new(0),
        }
    }

    pub fn limits(&self) -> &StoreLimits {
        &self.limits
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn deadline(&self, now: u64, seconds: u64) -> u64 {
        now.saturating_add(seconds.saturating_mul(1000))
    }

    fn blocks_for(&self, len: usize) -> u64 {
        (len as u64).div_ceil(self.limits.value_block_size)
    }

    /// Remove `key` if its TTL has elapsed. Returns whether it is still live.
    fn check_live(&self, inner: &mut StoreInner, key: &str, now: u64) -> bool {
        let expired = match inner.map.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return false,
        };
        if expired {
            inner.remove(key);
            self.expired_total.fetch_add(1, Ordering::Relaxed);
        }
        !expired
    }

    fn purge(&self, inner: &mut StoreInner, now: u64) -> usize {
        let removed = inner.purge_expired(now);
        if removed > 0 {
            self.expired_total
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Store `value` under `key`, replacing any value and TTL.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Status {
        if let Err(status) = validate_key(key, self.limits.max_key_length) {
            return status;
        }
        if value.is_empty() {
            return Status::ValueEmpty;
        }
        if value.len() as u64 > self.limits.value_capacity() {
            return Status::ValueTooBig;
        }

        let now = self.clock.now_ms();
        let blocks = self.blocks_for(value.len());
        let mut inner = self.lock();

        let replacing = self.check_live(&mut inner, key, now);
        let fits = |inner: &StoreInner| {
            let reclaimed = if replacing {
                inner.map.get(key).map(|e| e.blocks).unwrap_or(0)
            } else {
                0
            };
            let key_slot_free = replacing || inner.map.len() < self.limits.max_keys;
            let free_blocks = self.limits.value_blocks - inner.used_blocks + reclaimed;
            key_slot_free && blocks <= free_blocks
        };

        if !fits(&*inner) {
            self.purge(&mut inner, now);
            if !fits(&*inner) {
                return Status::NoMem;
            }
        }

        inner.remove(key);
        inner.used_blocks += blocks;
        inner.map.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|secs| self.deadline(now, secs)),
                blocks,
            },
        );
        Status::Ok
    }

    /// Current value of `key`
    pub fn get(&self, key: &str) -> Result<Vec<u8>, Status> {
        validate_key(key, self.limits.max_key_length)?;

        let now = self.clock.now_ms();
        let mut inner = self.lock();
        if !self.check_live(&mut inner, key, now) {
            return Err(Status::NoSuchKey);
        }
        inner
            .map
            .get(key)
            .map(|entry| entry.value.clone())
            .ok_or(Status::NoSuchKey)
    }

    pub fn delete(&self, key: &str) -> Status {
        if let Err(status) = validate_key(key, self.limits.max_key_length) {
            return status;
        }

        let now = self.clock.now_ms();
        let mut inner = self.lock();
        if !self.check_live(&mut inner, key, now) {
            return Status::NoSuchKey;
        }
        inner.remove(key);
        Status::Ok
    }

    /// `Ok` if the key is present and unexpired, `NoSuchKey` otherwise
    pub fn test(&self, key: &str) -> Status {
        if let Err(status) = validate_key(key, self.limits.max_key_length) {
            return status;
        }

        let now = self.clock.now_ms();
        let mut inner = self.lock();
        if self.check_live(&mut inner, key, now) {
            Status::Ok
        } else {
            Status::NoSuchKey
        }
    }

    /// Set or replace the TTL of a live key. Zero expires it immediately.
    pub fn expire(&self, key: &str, seconds: u64) -> Status {
        if let Err(status) = validate_key(key, self.limits.max_key_length) {
            return status;
        }

        let now = self.clock.now_ms();
        let deadline = self.deadline(now, seconds);
        let mut inner = self.lock();
        if !self.check_live(&mut inner, key, now) {
            return Status::NoSuchKey;
        }
        match inner.map.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(deadline);
                Status::Ok
            }
            None => Status::NoSuchKey,
        }
    }

    /// Live keys matching a glob pattern, sorted
    pub fn keys(&self, pattern: &str) -> Vec<String> {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        self.purge(&mut inner, now);

        let mut keys: Vec<String> = inner
            .map
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Number of live keys matching a glob pattern
    pub fn nrkeys(&self, pattern: &str) -> u64 {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        self.purge(&mut inner, now);

        inner
            .map
            .keys()
            .filter(|key| glob_match(pattern, key))
            .count() as u64
    }

    /// Remove all expired keys and return the number removed
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        self.purge(&mut inner, now)
    }

    pub fn stats(&self) -> StoreStats {
        let now = self.clock.now_ms();
        let inner = self.lock();
        let live = inner.map.values().filter(|e| !e.is_expired(now));

        let (mut keys, mut keys_with_ttl, mut value_bytes) = (0usize, 0usize, 0u64);
        for entry in live {
            keys += 1;
            value_bytes += entry.value.len() as u64;
            if entry.expires_at.is_some() {
                keys_with_ttl += 1;
            }
        }

        StoreStats {
            keys,
            keys_with_ttl,
            value_bytes,
            used_blocks: inner.used_blocks,
            free_blocks: self.limits.value_blocks - inner.used_blocks,
            expired_total: self.expired_total.load(Ordering::Relaxed),
            limits: self.limits,
        }
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("limits", &self.limits)
            .field("clock", &self.clock)
            .finish()
    }
}

/// Periodically reclaim expired entries
pub fn spawn_expiry_sweeper(store: Arc<KeyStore>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = store.cleanup_expired();
            if removed > 0 {
                tracing::debug!("Expiry sweep removed {} keys", removed);
            }
        }
    })
}
