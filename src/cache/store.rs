//! In-memory artifact store with per-category TTLs, a capacity ceiling and
//! memory-pressure eviction.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use metrics::{counter, gauge};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::Artifact;

use super::config::CacheConfig;
use super::keys::{ContentKey, KeyParams};
use super::lock::{rw_read, rw_write};
use super::memory::{MemoryProbe, NoPressure};

const SOURCE: &str = "cache::store";
const METRIC_CACHE_HIT: &str = "kirie_cache_hit_total";
const METRIC_CACHE_MISS: &str = "kirie_cache_miss_total";
const METRIC_CACHE_EVICT: &str = "kirie_cache_evict_total";
const METRIC_CACHE_REJECTED: &str = "kirie_cache_rejected_total";
const METRIC_CACHE_KEYS: &str = "kirie_cache_keys";
const MIN_TTL: Duration = Duration::from_millis(1);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache is disabled")]
    Disabled,
    #[error("cache is full ({capacity} live entries)")]
    Full { capacity: usize },
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Artifact,
    category: String,
    created_at: Instant,
    expires_at: Instant,
    last_hit_at: Option<Instant>,
    hits: u64,
    /// Insertion order, the final tie-breaker for eviction.
    seq: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Counters and sizes exposed to the operational health check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub hits: u64,
    pub misses: u64,
    pub keys: usize,
    pub hit_ratio: f64,
    pub bytes: u64,
    pub max_entries: usize,
    pub categories: BTreeMap<String, usize>,
}

/// Result of one memory-pressure check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureOutcome {
    /// Another eviction pass was already running.
    Skipped,
    /// The probe had no reading.
    Unmeasured,
    WithinLimit,
    /// The coldest keys were dropped and usage fell back under the threshold.
    Trimmed { removed: usize },
    /// Trimming was not enough, so the whole store was cleared.
    Flushed { trimmed: usize, flushed: usize },
}

/// Shared artifact cache. All access goes through `&self`; the entry map is
/// guarded by a single lock, so a store racing an eviction pass either lands
/// whole or not at all.
pub struct CacheStore {
    config: CacheConfig,
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    next_seq: AtomicU64,
    eviction_running: AtomicBool,
    probe: Arc<dyn MemoryProbe>,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_memory_probe(config, Arc::new(NoPressure))
    }

    pub fn with_memory_probe(config: CacheConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
            eviction_running: AtomicBool::new(false),
            probe,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ========================================================================
    // Parameter-based operations
    // ========================================================================

    pub fn get(&self, category: &str, params: &KeyParams) -> Option<Artifact> {
        self.lookup(&ContentKey::compute(category, params))
    }

    pub fn set(
        &self,
        category: &str,
        params: &KeyParams,
        value: Artifact,
    ) -> Result<(), CacheError> {
        self.store(&ContentKey::compute(category, params), value)
    }

    pub fn delete(&self, category: &str, params: &KeyParams) -> bool {
        self.remove(&ContentKey::compute(category, params))
    }

    // ========================================================================
    // Key-based operations
    // ========================================================================

    /// Return the live entry for `key`, recording the hit. Expired entries
    /// are dropped on the way and reported as a miss.
    pub fn lookup(&self, key: &ContentKey) -> Option<Artifact> {
        let category = key.category().to_string();
        if !self.config.enabled {
            self.record_miss(category);
            return None;
        }

        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "lookup");
        let found = match entries.get_mut(key.as_str()) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_hit_at = Some(now);
                entry.hits += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key.as_str());
                counter!(METRIC_CACHE_EVICT, "reason" => "expired").increment(1);
                None
            }
            None => None,
        };
        let len = entries.len();
        drop(entries);
        gauge!(METRIC_CACHE_KEYS).set(len as f64);

        match found {
            Some(artifact) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!(METRIC_CACHE_HIT, "category" => category).increment(1);
                debug!(op = "cache::lookup", result = "hit", key = %key, "Cache hit");
                Some(artifact)
            }
            None => {
                debug!(op = "cache::lookup", result = "miss", key = %key, "Cache miss");
                self.record_miss(category);
                None
            }
        }
    }

    /// Store `value` under `key` with the TTL of the key's category.
    ///
    /// A new key is refused when the store holds `max_entries` live entries
    /// even after dropping expired ones. Replacing an existing key always
    /// succeeds.
    pub fn store(&self, key: &ContentKey, value: Artifact) -> Result<(), CacheError> {
        if !self.config.enabled {
            return Err(CacheError::Disabled);
        }

        let ttl = self.config.ttl_for(key.category()).max(MIN_TTL);
        let now = Instant::now();
        let capacity = self.config.max_entries;
        let mut entries = rw_write(&self.entries, SOURCE, "store");

        if !entries.contains_key(key.as_str()) && entries.len() >= capacity {
            let reclaimed = purge_expired(&mut entries, now);
            if reclaimed > 0 {
                counter!(METRIC_CACHE_EVICT, "reason" => "expired").increment(reclaimed as u64);
            }
            if entries.len() >= capacity {
                drop(entries);
                counter!(METRIC_CACHE_REJECTED, "category" => key.category().to_string())
                    .increment(1);
                warn!(
                    op = "cache::store",
                    result = "rejected",
                    key = %key,
                    capacity,
                    "Cache full; artifact not stored"
                );
                return Err(CacheError::Full { capacity });
            }
        }

        let entry = CacheEntry {
            value,
            category: key.category().to_string(),
            created_at: now,
            expires_at: now + ttl,
            last_hit_at: None,
            hits: 0,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        entries.insert(key.as_str().to_string(), entry);
        let len = entries.len();
        drop(entries);

        gauge!(METRIC_CACHE_KEYS).set(len as f64);
        debug!(
            op = "cache::store",
            result = "stored",
            key = %key,
            ttl_secs = ttl.as_secs_f64(),
            "Cache entry stored"
        );
        Ok(())
    }

    pub fn remove(&self, key: &ContentKey) -> bool {
        let mut entries = rw_write(&self.entries, SOURCE, "remove");
        let removed = entries.remove(key.as_str()).is_some();
        let len = entries.len();
        drop(entries);

        if removed {
            gauge!(METRIC_CACHE_KEYS).set(len as f64);
            debug!(op = "cache::remove", key = %key, "Cache entry deleted");
        }
        removed
    }

    /// Remove every entry, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let removed = self.drain_all("clear");
        info!(op = "cache::clear", removed, "Cache cleared");
        removed
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn health_report(&self) -> HealthReport {
        let (keys, bytes, categories) = {
            let entries = rw_read(&self.entries, SOURCE, "health_report");
            let mut categories = BTreeMap::new();
            let mut bytes = 0_u64;
            for entry in entries.values() {
                *categories.entry(entry.category.clone()).or_insert(0) += 1;
                bytes += entry.value.len() as u64;
            }
            (entries.len(), bytes, categories)
        };

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_ratio = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        HealthReport {
            status: if self.config.enabled {
                "healthy"
            } else {
                "disabled"
            },
            hits,
            misses,
            keys,
            hit_ratio,
            bytes,
            max_entries: self.config.max_entries,
            categories,
        }
    }

    // ========================================================================
    // Eviction
    // ========================================================================

    /// Drop every expired entry. Returns `None` when another eviction pass
    /// holds the sweep slot.
    pub fn sweep_expired(&self) -> Option<usize> {
        let Some(_guard) = EvictionGuard::try_acquire(&self.eviction_running) else {
            debug!(op = "cache::sweep_expired", result = "skipped", "Eviction already running");
            return None;
        };

        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "sweep_expired");
        let removed = purge_expired(&mut entries, now);
        let len = entries.len();
        drop(entries);

        gauge!(METRIC_CACHE_KEYS).set(len as f64);
        if removed > 0 {
            counter!(METRIC_CACHE_EVICT, "reason" => "expired").increment(removed as u64);
            debug!(op = "cache::sweep_expired", removed, remaining = len, "Expired entries swept");
        }
        Some(removed)
    }

    /// Apply the memory-pressure policy once: when the process uses more
    /// than the configured share of system memory, drop the least recently
    /// hit keys; if that does not bring usage back under the threshold,
    /// clear the store.
    pub fn relieve_memory_pressure(&self) -> PressureOutcome {
        let Some(_guard) = EvictionGuard::try_acquire(&self.eviction_running) else {
            return PressureOutcome::Skipped;
        };

        let threshold = self.config.memory_pressure_threshold;
        let Some(sample) = self.probe.sample() else {
            return PressureOutcome::Unmeasured;
        };
        if !sample.exceeds(threshold) {
            return PressureOutcome::WithinLimit;
        }

        warn!(
            op = "cache::relieve_memory_pressure",
            usage_fraction = sample.usage_fraction(),
            threshold,
            process_bytes = sample.process_bytes,
            "Memory pressure detected; evicting least recently hit entries"
        );
        let trimmed = self.evict_coldest();

        match self.probe.sample() {
            Some(after) if after.exceeds(threshold) => {
                let flushed = self.drain_all("pressure_flush");
                warn!(
                    op = "cache::relieve_memory_pressure",
                    trimmed,
                    flushed,
                    usage_fraction = after.usage_fraction(),
                    "Memory still above threshold after trimming; cache flushed"
                );
                PressureOutcome::Flushed { trimmed, flushed }
            }
            _ => {
                info!(
                    op = "cache::relieve_memory_pressure",
                    trimmed, "Cache trimmed under memory pressure"
                );
                PressureOutcome::Trimmed { removed: trimmed }
            }
        }
    }

    /// Remove the coldest share of keys: never-hit entries first, then by
    /// oldest last hit, ties broken by oldest creation.
    fn evict_coldest(&self) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "evict_coldest");
        let batch = self.config.pressure_batch(entries.len());

        let mut ranked: Vec<(Option<Instant>, Instant, u64, String)> = entries
            .iter()
            .map(|(key, entry)| (entry.last_hit_at, entry.created_at, entry.seq, key.clone()))
            .collect();
        ranked.sort_unstable();

        for (_, _, _, key) in ranked.into_iter().take(batch) {
            entries.remove(&key);
        }
        let len = entries.len();
        drop(entries);

        gauge!(METRIC_CACHE_KEYS).set(len as f64);
        counter!(METRIC_CACHE_EVICT, "reason" => "pressure").increment(batch as u64);
        batch
    }

    fn drain_all(&self, reason: &'static str) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, reason);
        let removed = entries.len();
        entries.clear();
        drop(entries);

        gauge!(METRIC_CACHE_KEYS).set(0.0);
        counter!(METRIC_CACHE_EVICT, "reason" => reason).increment(removed as u64);
        removed
    }

    fn record_miss(&self, category: String) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_MISS, "category" => category).increment(1);
    }
}

fn purge_expired(entries: &mut HashMap<String, CacheEntry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before - entries.len()
}

/// Holds the single eviction slot for the lifetime of one pass.
struct EvictionGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> EvictionGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for EvictionGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
