//! Background refresh of cache entries nearing expiry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::{CacheMetadata, KeyValueCache, SetOptions};
use crate::errors::ApplicationError;

/// Produces a fresh value for a cache key. Returning `Ok(None)` leaves the
/// entry untouched.
#[async_trait]
pub trait CacheRefresher: Send + Sync {
    async fn refresh(
        &self,
        key: &str,
        metadata: &CacheMetadata,
    ) -> Result<Option<serde_json::Value>, ApplicationError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub unchanged: usize,
    pub failed: usize,
}

pub struct RefreshScheduler {
    cache: Arc<KeyValueCache>,
    refresher: Arc<dyn CacheRefresher>,
}

impl RefreshScheduler {
    pub fn new(cache: Arc<KeyValueCache>, refresher: Arc<dyn CacheRefresher>) -> Self {
        Self { cache, refresher }
    }

    /// Drains the refresh queue once, running at most `max_concurrent`
    /// refreshes at a time.
    pub async fn run_once(&self) -> RefreshReport {
        let mut report = RefreshReport::default();
        let batch = self.cache.take_refresh_batch();
        if batch.is_empty() {
            return report;
        }

        let limit = self.cache.policy().max_concurrent.max(1);
        for chunk in batch.chunks(limit) {
            let mut tasks = JoinSet::new();
            let mut in_flight = HashMap::new();
            for key in chunk {
                let Some(metadata) = self.cache.metadata(key) else {
                    self.cache.finish_refresh(key);
                    continue;
                };
                let key = key.clone();
                let refresher = Arc::clone(&self.refresher);
                let task_key = key.clone();
                let handle = tasks.spawn(async move {
                    let outcome = refresher.refresh(&task_key, &metadata).await;
                    (task_key, metadata, outcome)
                });
                in_flight.insert(handle.id(), key);
            }

            while let Some(joined) = tasks.join_next().await {
                let (key, metadata, outcome) = match joined {
                    Ok(result) => result,
                    Err(error) => {
                        let key = in_flight.remove(&error.id());
                        warn!(
                            event_name = "cache.refresh.task_failed",
                            key = key.as_deref().unwrap_or("unknown"),
                            error = %error,
                            "refresh task panicked"
                        );
                        report.failed += 1;
                        if let Some(key) = key {
                            self.cache.finish_refresh(&key);
                        }
                        continue;
                    }
                };

                match outcome {
                    Ok(Some(value)) => {
                        let options = SetOptions {
                            tags: metadata.tags.clone(),
                            source: Some(metadata.source.clone()),
                            version: Some(metadata.version.clone()),
                        };
                        let ttl = Duration::milliseconds(metadata.ttl_ms);
                        match self.cache.set_value(&key, value, ttl, options) {
                            Ok(()) => report.refreshed += 1,
                            Err(error) => {
                                warn!(
                                    event_name = "cache.refresh.store_failed",
                                    key = %key,
                                    error = %error,
                                    "refreshed value not stored"
                                );
                                report.failed += 1;
                            }
                        }
                    }
                    Ok(None) => report.unchanged += 1,
                    Err(error) => {
                        warn!(event_name = "cache.refresh.failed", key = %key, error = %error, "refresh failed");
                        report.failed += 1;
                    }
                }
                self.cache.finish_refresh(&key);
            }
        }

        debug!(
            event_name = "cache.refresh.cycle",
            refreshed = report.refreshed,
            unchanged = report.unchanged,
            failed = report.failed,
            "refresh cycle complete"
        );
        report
    }

    /// Spawns the periodic refresh loop on the current tokio runtime.
    pub fn start(self) -> RefreshHandle {
        let interval = self.cache.policy().interval;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        info!(
            event_name = "cache.refresh.started",
            interval_ms = interval.as_millis() as u64,
            "cache refresh scheduler started"
        );
        RefreshHandle { shutdown: shutdown_tx, task: Some(task) }
    }
}

/// Owner of a running refresh loop. Dropping the handle aborts the loop.
pub struct RefreshHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl RefreshHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                if !error.is_cancelled() {
                    warn!(event_name = "cache.refresh.stop_failed", error = %error, "refresh loop ended abnormally");
                }
            }
        }
        info!(event_name = "cache.refresh.stopped", "cache refresh scheduler stopped");
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use super::{CacheRefresher, RefreshScheduler};
    use crate::cache::{CacheMetadata, KeyValueCache, RefreshPolicy, SetOptions};
    use crate::clock::{Clock, ManualClock};
    use crate::errors::ApplicationError;
    use crate::storage::LocalStorage;

    /// Sleeps inside every refresh and records the highest number of
    /// refreshes running at once.
    #[derive(Default)]
    struct SlowRefresher {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl CacheRefresher for SlowRefresher {
        async fn refresh(
            &self,
            key: &str,
            _metadata: &CacheMetadata,
        ) -> Result<Option<serde_json::Value>, ApplicationError> {
            let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now_running, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(Some(json!({ "refreshed": key })))
        }
    }

    struct PanickingRefresher;

    #[async_trait]
    impl CacheRefresher for PanickingRefresher {
        async fn refresh(
            &self,
            key: &str,
            _metadata: &CacheMetadata,
        ) -> Result<Option<serde_json::Value>, ApplicationError> {
            panic!("refresher bug for {key}");
        }
    }

    struct CountingRefresher {
        calls: AtomicUsize,
        fail_for: Option<&'static str>,
    }

    #[async_trait]
    impl CacheRefresher for CountingRefresher {
        async fn refresh(
            &self,
            key: &str,
            _metadata: &CacheMetadata,
        ) -> Result<Option<serde_json::Value>, ApplicationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_for == Some(key) {
                return Err(ApplicationError::Integration("remote down".to_string()));
            }
            Ok(Some(json!({ "refreshed": key })))
        }
    }

    fn cache_with(policy: RefreshPolicy) -> (Arc<ManualClock>, Arc<KeyValueCache>) {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid date");
        let clock = Arc::new(ManualClock::new(start));
        let cache = Arc::new(KeyValueCache::with_policy(LocalStorage::in_memory(), clock.clone(), policy));
        (clock, cache)
    }

    #[tokio::test]
    async fn run_once_refreshes_queued_entries_and_resets_ttl() {
        let (clock, cache) = cache_with(RefreshPolicy::default());
        for key in ["a", "b", "c", "d"] {
            cache
                .set(key, &json!({ "v": 1 }), Duration::seconds(100), SetOptions::new().with_tag("fee"))
                .expect("set");
        }
        clock.advance(Duration::seconds(90));
        for key in ["a", "b", "c", "d"] {
            assert!(cache.get::<serde_json::Value>(key).is_some());
        }

        let refresher = Arc::new(CountingRefresher { calls: AtomicUsize::new(0), fail_for: Some("d") });
        let scheduler = RefreshScheduler::new(cache.clone(), refresher.clone());
        let report = scheduler.run_once().await;

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 4);
        assert_eq!(report.refreshed, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(cache.get::<serde_json::Value>("a"), Some(json!({ "refreshed": "a" })));
        let metadata = cache.metadata("a").expect("metadata");
        assert_eq!(metadata.tags, vec!["fee".to_string()]);
        assert!(metadata.remaining_fraction(clock.now()) > 0.9);
        assert!(cache.queued_refreshes().is_empty());
    }

    #[tokio::test]
    async fn refreshes_never_exceed_max_concurrent() {
        let policy = RefreshPolicy { max_concurrent: 3, ..RefreshPolicy::default() };
        let (clock, cache) = cache_with(policy);
        let keys = ["k1", "k2", "k3", "k4", "k5", "k6", "k7"];
        for key in keys {
            cache.set(key, &json!(0), Duration::seconds(100), SetOptions::new()).expect("set");
        }
        clock.advance(Duration::seconds(90));
        for key in keys {
            assert!(cache.get::<serde_json::Value>(key).is_some());
        }

        let refresher = Arc::new(SlowRefresher::default());
        let report = RefreshScheduler::new(cache, refresher.clone()).run_once().await;

        assert_eq!(report.refreshed, keys.len());
        let peak = refresher.peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 3, "peak concurrency was {peak}");
    }

    #[tokio::test]
    async fn panicking_refresh_releases_the_key() {
        let (clock, cache) = cache_with(RefreshPolicy::default());
        cache.set("fragile", &json!(1), Duration::seconds(100), SetOptions::new()).expect("set");
        clock.advance(Duration::seconds(90));
        assert!(cache.get::<serde_json::Value>("fragile").is_some());

        let report = RefreshScheduler::new(cache.clone(), Arc::new(PanickingRefresher)).run_once().await;
        assert_eq!(report.failed, 1);
        assert!(cache.queued_refreshes().is_empty());

        assert!(cache.get::<serde_json::Value>("fragile").is_some());
        assert_eq!(cache.queued_refreshes(), vec!["fragile".to_string()]);
    }

    #[tokio::test]
    async fn empty_queue_is_a_no_op() {
        let (_, cache) = cache_with(RefreshPolicy::default());
        let refresher = Arc::new(CountingRefresher { calls: AtomicUsize::new(0), fail_for: None });
        let report = RefreshScheduler::new(cache, refresher.clone()).run_once().await;

        assert_eq!(report.refreshed + report.failed + report.unchanged, 0);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn started_loop_runs_on_interval_and_stops_cleanly() {
        let policy = RefreshPolicy {
            threshold: 0.8,
            max_concurrent: 2,
            interval: std::time::Duration::from_millis(50),
        };
        let (clock, cache) = cache_with(policy);
        cache.set("k", &json!(1), Duration::seconds(10), SetOptions::new()).expect("set");
        clock.advance(Duration::seconds(9));
        assert!(cache.get::<serde_json::Value>("k").is_some());

        let refresher = Arc::new(CountingRefresher { calls: AtomicUsize::new(0), fail_for: None });
        let handle = RefreshScheduler::new(cache.clone(), refresher.clone()).start();
        assert!(handle.is_running());

        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        handle.stop().await;
    }
}
