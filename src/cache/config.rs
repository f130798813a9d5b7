//! Cache configuration.
//!
//! Controls entry TTLs, capacity and eviction cadence via the `[cache]`
//! section of `kirie.toml`.

use std::collections::BTreeMap;
use std::time::Duration;

// Default values for cache configuration
const DEFAULT_TTL: Duration = Duration::from_secs(300);
const DEFAULT_IMAGE_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_BANNER_TTL: Duration = Duration::from_secs(1800);
const DEFAULT_GENERATED_IMAGE_TTL: Duration = Duration::from_secs(7200);
const DEFAULT_MAX_ENTRIES: usize = 1000;
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_MEMORY_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_MEMORY_PRESSURE_THRESHOLD: f64 = 0.3;
const DEFAULT_PRESSURE_EVICT_FRACTION: f64 = 0.2;

/// Cache categories used by the media components.
pub mod category {
    pub const IMAGE: &str = "image";
    pub const BANNER: &str = "banner";
    pub const GENERATED_IMAGE: &str = "generated_image";
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// When false every lookup misses and every store is refused.
    pub enabled: bool,
    /// TTL for categories missing from `category_ttls`.
    pub default_ttl: Duration,
    pub category_ttls: BTreeMap<String, Duration>,
    pub max_entries: usize,
    pub sweep_interval: Duration,
    pub memory_check_interval: Duration,
    /// Fraction of total system memory the process may use before the
    /// pressure policy starts evicting.
    pub memory_pressure_threshold: f64,
    /// Share of keys dropped by one pressure eviction pass.
    pub pressure_evict_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let category_ttls = BTreeMap::from([
            (category::IMAGE.to_string(), DEFAULT_IMAGE_TTL),
            (category::BANNER.to_string(), DEFAULT_BANNER_TTL),
            (
                category::GENERATED_IMAGE.to_string(),
                DEFAULT_GENERATED_IMAGE_TTL,
            ),
        ]);

        Self {
            enabled: true,
            default_ttl: DEFAULT_TTL,
            category_ttls,
            max_entries: DEFAULT_MAX_ENTRIES,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            memory_check_interval: DEFAULT_MEMORY_CHECK_INTERVAL,
            memory_pressure_threshold: DEFAULT_MEMORY_PRESSURE_THRESHOLD,
            pressure_evict_fraction: DEFAULT_PRESSURE_EVICT_FRACTION,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            default_ttl: settings.default_ttl,
            category_ttls: settings.category_ttls.clone(),
            max_entries: settings.max_entries.get(),
            sweep_interval: settings.sweep_interval,
            memory_check_interval: settings.memory_check_interval,
            memory_pressure_threshold: settings.memory_pressure_threshold,
            pressure_evict_fraction: settings.pressure_evict_fraction,
        }
    }
}

impl CacheConfig {
    /// TTL for a category, falling back to the default TTL.
    pub fn ttl_for(&self, category: &str) -> Duration {
        self.category_ttls
            .get(category)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    /// Number of keys one pressure pass removes out of `len`; at least one
    /// when the store is not empty.
    pub fn pressure_batch(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let batch = (len as f64 * self.pressure_evict_fraction).ceil() as usize;
        batch.clamp(1, len)
    }
}
