//! TTL cache for idempotent tool results.
//!
//! Entries are keyed by [`cache_key`]: the tool name plus a canonical,
//! key-sorted serialization of the arguments, so argument order never
//! affects hits. Expiry is enforced two ways:
//!
//! - lazily: [`ToolCache::get`] deletes an expired entry it encounters;
//! - eagerly: [`ToolCache::clean_expired`] sweeps the whole map, usually
//!   from the background task started by [`spawn_sweeper`].
//!
//! All operations go through one mutex, so a `get` never observes a
//! half-written entry and racing `set`s resolve last-write-wins.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::tool::Arguments;

// ── Key derivation ───────────────────────────────────────────────────

/// Derives the cache key for a call to `tool_name` with `arguments`.
///
/// Object keys are sorted recursively before serialization.
///
/// # Errors
///
/// Returns the serializer's error if the arguments cannot be encoded; the
/// dispatcher treats that as "skip caching for this call".
pub fn cache_key(tool_name: &str, arguments: &Arguments) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_string(&CanonicalMap(arguments))?;
    Ok(format!("{tool_name}:{canonical}"))
}

struct CanonicalMap<'a>(&'a Arguments);

impl Serialize for CanonicalMap<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut keys: Vec<&String> = self.0.keys().collect();
        keys.sort();
        let mut out = serializer.serialize_map(Some(keys.len()))?;
        for key in keys {
            out.serialize_entry(key, &Canonical(&self.0[key]))?;
        }
        out.end()
    }
}

/// Serializes a `Value` with object keys in sorted order regardless of how
/// the map was built.
struct Canonical<'a>(&'a Value);

impl Serialize for Canonical<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;

        match self.0 {
            Value::Object(map) => CanonicalMap(map).serialize(serializer),
            Value::Array(items) => {
                let mut out = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    out.serialize_element(&Canonical(item))?;
                }
                out.end()
            }
            other => other.serialize(serializer),
        }
    }
}

// ── Configuration ────────────────────────────────────────────────────

/// Configuration for the tool cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL used by [`ToolCache::set_default`].
    pub default_ttl: Duration,
    /// Period of the background sweep started by
    /// [`Dispatcher::spawn_cache_sweeper`](crate::dispatch::Dispatcher::spawn_cache_sweeper).
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

// ── Stats ────────────────────────────────────────────────────────────

/// Hit/miss/eviction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// `get` calls that returned a live entry.
    pub hits: u64,
    /// `get` calls that found nothing usable.
    pub misses: u64,
    /// Entries removed by expiry, invalidation or `clear`.
    pub evictions: u64,
    /// Entries currently stored (live or not yet swept).
    pub entries: usize,
}

impl CacheStats {
    /// Total number of lookups.
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }

    /// Hit rate as a percentage, `0.0` before any lookup.
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64 * 100.0
    }
}

// ── ToolCache ────────────────────────────────────────────────────────

/// A stored value and its deadline.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached tool result.
    pub value: Value,
    /// Visible to `get` only while `now < expires_at`.
    pub expires_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

/// Thread-safe TTL cache of tool results.
pub struct ToolCache {
    state: Mutex<CacheState>,
    config: CacheConfig,
}

impl fmt::Debug for ToolCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCache")
            .field("entries", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for ToolCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ToolCache {
    /// Creates an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            config,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().expect("tool cache lock poisoned")
    }

    /// Returns the value stored under `key` if it has not expired.
    ///
    /// An expired entry is removed as a side effect.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lookup(key, true)
    }

    /// Like [`get`](Self::get), but a miss is not counted. Used for the
    /// second lookup of a miss that has already been recorded.
    pub(crate) fn recheck(&self, key: &str) -> Option<Value> {
        self.lookup(key, false)
    }

    fn lookup(&self, key: &str, count_miss: bool) -> Option<Value> {
        let mut state = self.lock();
        let now = Instant::now();
        let found = match state.entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                state.entries.remove(key);
                state.stats.evictions += 1;
                state.stats.entries = state.entries.len();
                None
            }
            None => None,
        };
        if found.is_some() {
            state.stats.hits += 1;
        } else if count_miss {
            state.stats.misses += 1;
        }
        found
    }

    /// Stores `value` under `key` for `ttl`.
    ///
    /// A zero TTL stores an already-expired entry: it still replaces any
    /// previous value but will never be returned by `get`.
    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        let mut state = self.lock();
        state
            .entries
            .insert(key.into(), CacheEntry { value, expires_at });
        state.stats.entries = state.entries.len();
    }

    /// Stores `value` with the configured default TTL.
    pub fn set_default(&self, key: impl Into<String>, value: Value) {
        self.set(key, value, self.config.default_ttl);
    }

    /// Removes the entry for `key`, if any.
    pub fn invalidate(&self, key: &str) {
        let mut state = self.lock();
        if state.entries.remove(key).is_some() {
            state.stats.evictions += 1;
            state.stats.entries = state.entries.len();
        }
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut state = self.lock();
        let evicted = u64::try_from(state.entries.len()).unwrap_or(u64::MAX);
        state.entries.clear();
        state.stats.evictions += evicted;
        state.stats.entries = 0;
    }

    /// Removes all expired entries, returning the count removed.
    pub fn clean_expired(&self) -> usize {
        let mut state = self.lock();
        let now = Instant::now();
        let before = state.entries.len();
        state.entries.retain(|_, entry| now < entry.expires_at);
        let removed = before - state.entries.len();
        state.stats.evictions += u64::try_from(removed).unwrap_or(u64::MAX);
        state.stats.entries = state.entries.len();
        removed
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// The configuration this cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

/// Spawns a task that calls [`ToolCache::clean_expired`] every `interval`.
///
/// Must be called from within a Tokio runtime. Abort the returned handle
/// to stop sweeping.
pub fn spawn_sweeper(cache: Arc<ToolCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = cache.clean_expired();
            if removed > 0 {
                tracing::debug!(removed, "swept expired tool cache entries");
            }
        }
    })
}
