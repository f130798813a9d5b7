//! Kirie Cache System
//!
//! Holds produced artifacts keyed by a fingerprint of the parameters that
//! produced them:
//!
//! - **Keys**: canonical, order-independent parameter digests ([`ContentKey`])
//! - **Store**: TTL-bounded entries with a capacity ceiling ([`CacheStore`])
//! - **Sweeper**: periodic expiry and memory-pressure eviction
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `kirie.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! max_entries = 1000
//! memory_pressure_threshold = 0.3
//!
//! [cache.ttl_seconds]
//! image = 3600
//! banner = 1800
//! # ... see config.rs for all options
//! ```

mod config;
mod keys;
mod lock;
mod memory;
mod store;
mod sweeper;

pub use config::{CacheConfig, category};
pub use keys::{ContentKey, KeyError, KeyParams, content_digest};
pub(crate) use lock::mutex_lock;
pub use memory::{MemoryProbe, MemorySample, NoPressure};
pub use store::{CacheError, CacheStore, HealthReport, PressureOutcome};
pub use sweeper::{CacheSweeper, SweeperHandle};
