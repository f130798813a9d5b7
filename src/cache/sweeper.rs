//! Background eviction timers for a [`CacheStore`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::store::{CacheStore, PressureOutcome};

/// Owns the expiry sweep and memory check loops. Both stop on
/// [`SweeperHandle::shutdown`] or when the handle is dropped.
pub struct CacheSweeper;

impl CacheSweeper {
    /// Start both loops on the current runtime.
    pub fn spawn(store: Arc<CacheStore>) -> SweeperHandle {
        let sweep_interval = store.config().sweep_interval;
        let memory_interval = store.config().memory_check_interval;

        let sweep = {
            let store = Arc::clone(&store);
            spawn_every(sweep_interval, move || {
                if let Some(removed) = store.sweep_expired() {
                    debug!(target = "kirie::cache::sweeper", removed, "Expiry sweep finished");
                }
            })
        };

        let pressure = spawn_every(memory_interval, move || {
            let outcome = store.relieve_memory_pressure();
            if !matches!(outcome, PressureOutcome::WithinLimit | PressureOutcome::Unmeasured) {
                debug!(target = "kirie::cache::sweeper", ?outcome, "Memory check finished");
            }
        });

        SweeperHandle {
            tasks: vec![sweep, pressure],
        }
    }
}

fn spawn_every<F>(period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            tick();
        }
    })
}

pub struct SweeperHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SweeperHandle {
    pub async fn shutdown(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::config::{CacheConfig, category};
    use super::super::keys::KeyParams;
    use super::*;
    use crate::domain::{Artifact, ImageFormat};

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_swept_in_the_background() {
        let mut config = CacheConfig {
            sweep_interval: Duration::from_secs(5),
            ..CacheConfig::default()
        };
        config
            .category_ttls
            .insert(category::IMAGE.to_string(), Duration::from_secs(3));
        let store = Arc::new(CacheStore::new(config));
        store
            .set(
                category::IMAGE,
                &KeyParams::new().with("width", 1),
                Artifact::new(vec![1_u8; 4], ImageFormat::Png, 1, 1),
            )
            .unwrap();

        let handle = CacheSweeper::spawn(Arc::clone(&store));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(store.is_empty());

        handle.shutdown().await;
    }
}
