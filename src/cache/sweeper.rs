//! Periodic purge of expired cache entries and stale confirmations.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::ResultCache;
use crate::confirmation::ConfirmationRegister;

/// Run `sweep` on the cache and the confirmation register every `interval`
/// until `cancel` fires. Both sweeps are idempotent, so a late or doubled
/// tick is harmless.
pub fn spawn_sweeper(
    cache: Arc<ResultCache>,
    confirmations: Arc<ConfirmationRegister>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so startup stays quiet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Cache sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match cache.sweep().await {
                        Ok(removed) => tracing::debug!(removed, "Result cache swept"),
                        Err(e) => tracing::warn!("Result cache sweep failed: {}", e),
                    }
                    match confirmations.sweep().await {
                        Ok(removed) => tracing::debug!(removed, "Confirmation register swept"),
                        Err(e) => tracing::warn!("Confirmation sweep failed: {}", e),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Fingerprint;
    use crate::clock::{ClockRef, ManualClock};
    use crate::config::CacheConfig;
    use crate::store::{MemoryStore, StoreRef};
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_and_stops() {
        let clock = ManualClock::starting_now();
        let clock_ref: ClockRef = Arc::new(clock.clone());
        let store: StoreRef = Arc::new(MemoryStore::new(Arc::clone(&clock_ref)));
        let cache = Arc::new(ResultCache::new(
            Arc::clone(&store),
            Arc::clone(&clock_ref),
            &CacheConfig::default(),
        ));
        let confirmations = Arc::new(ConfirmationRegister::new(
            store,
            clock_ref,
            Duration::from_secs(300),
        ));

        cache
            .put(&Fingerprint::personal("alice"), json!(1))
            .await
            .unwrap();
        clock.advance(cache.ttl() + Duration::from_secs(1));

        let cancel = CancellationToken::new();
        let handle = spawn_sweeper(
            Arc::clone(&cache),
            confirmations,
            Duration::from_secs(60),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(cache.stats().await.expirations, 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
