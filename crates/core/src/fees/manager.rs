use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connectivity::ConnectivityMonitor;
use super::schedule::{CourtType, FeeCalculation, FeeSchedule};
use super::source::ScheduleSource;
use super::statutory::{
    statutory_effective_date, statutory_exemptions, statutory_schedule, ExemptionCategory,
    FEE_DATA_VERSION,
};
use crate::cache::{CacheMetadata, CacheRefresher, KeyValueCache, SetOptions};
use crate::clock::SharedClock;
use crate::errors::{ApplicationError, DomainError};
use crate::fallback::{
    CacheDataProvider, DataType, FallbackContext, FallbackOrchestrator, FallbackPayload,
};
use crate::storage::LocalStorage;

pub const VERSION_KEY: &str = "fee_data_version";
pub const LAST_UPDATE_KEY: &str = "fee_data_last_update";

const SCHEDULE_TAG: &str = "fee_schedule";
const EXEMPTIONS_TAG: &str = "exemptions";
const REMOTE_SOURCE: &str = "remote";
const STATIC_SOURCE: &str = "static";

#[derive(Clone, Debug, PartialEq)]
pub struct FeeDataSettings {
    pub freshness_threshold_days: i64,
    pub schedule_ttl: Duration,
    pub exemptions_ttl: Duration,
}

impl Default for FeeDataSettings {
    fn default() -> Self {
        Self {
            freshness_threshold_days: 30,
            schedule_ttl: Duration::hours(24),
            exemptions_ttl: Duration::days(7),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DataFreshness {
    pub is_up_to_date: bool,
    pub last_update_date: DateTime<Utc>,
    pub days_since_update: i64,
    pub warning_message: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FeeCacheStatus {
    pub general_cached: bool,
    pub arbitration_cached: bool,
    pub exemptions_cached: bool,
    pub is_offline_ready: bool,
}

/// Serves fee schedules and exemption lists for the court-fee calculator.
///
/// Online, schedules come from the remote source and are cached and stored
/// as fallback data. Offline, or when the remote fails, the cache is tried
/// first, then the fallback chain, then the statutory tables. Schedule reads
/// never fail.
pub struct FeeDataManager {
    cache: Arc<KeyValueCache>,
    fallback: Arc<FallbackOrchestrator>,
    source: Arc<dyn ScheduleSource>,
    connectivity: ConnectivityMonitor,
    storage: LocalStorage,
    clock: SharedClock,
    settings: FeeDataSettings,
}

impl std::fmt::Debug for FeeDataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeeDataManager")
            .field("online", &self.connectivity.is_online())
            .field("settings", &self.settings)
            .finish()
    }
}

impl FeeDataManager {
    /// `storage` holds the version markers; the cache is also registered as a
    /// fallback provider.
    pub fn new(
        cache: Arc<KeyValueCache>,
        fallback: Arc<FallbackOrchestrator>,
        source: Arc<dyn ScheduleSource>,
        connectivity: ConnectivityMonitor,
        storage: LocalStorage,
        settings: FeeDataSettings,
    ) -> Self {
        fallback.register_provider(Arc::new(CacheDataProvider::new(cache.clone())));
        let clock = cache.clock().clone();
        Self { cache, fallback, source, connectivity, storage, clock, settings }
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub async fn get_current_schedule(&self, court: CourtType) -> FeeSchedule {
        if !self.is_online() {
            debug!(event_name = "fees.schedule.offline", court = %court, "offline, using local data");
            return self.local_schedule(court).await;
        }

        match self.fetch_remote(court).await {
            Some(schedule) => {
                self.store_schedule(&schedule, REMOTE_SOURCE);
                schedule
            }
            None => self.local_schedule(court).await,
        }
    }

    /// Whether newer reference data than what this instance uses exists.
    pub async fn check_for_updates(&self) -> bool {
        if !self.is_online() {
            return false;
        }

        match self.source.latest_version().await {
            Ok(remote) => {
                let current = self.stored_version().unwrap_or_else(|| FEE_DATA_VERSION.to_string());
                remote != current
            }
            Err(error) => {
                warn!(
                    event_name = "fees.updates.remote_failed",
                    error = %error,
                    "remote version check failed, comparing local version marker"
                );
                self.stored_version().is_some_and(|stored| stored != FEE_DATA_VERSION)
            }
        }
    }

    /// Fetches a fresh schedule and records the version markers. Degrades to
    /// the local schedule when offline or when the fetch fails.
    pub async fn update_schedule(&self, court: CourtType) -> FeeSchedule {
        if !self.is_online() {
            return self.get_current_schedule(court).await;
        }

        let Some(schedule) = self.fetch_remote(court).await else {
            return self.local_schedule(court).await;
        };

        self.store_schedule(&schedule, REMOTE_SOURCE);
        let marked = self
            .storage
            .set_item(VERSION_KEY, &schedule.version)
            .and_then(|()| self.storage.set_item(LAST_UPDATE_KEY, &self.clock.now().to_rfc3339()));
        if let Err(error) = marked {
            warn!(event_name = "fees.update.marker_failed", error = %error, "version markers not persisted");
        }
        info!(
            event_name = "fees.update.completed",
            court = %court,
            version = %schedule.version,
            "fee schedule updated"
        );
        schedule
    }

    pub fn check_data_freshness(&self) -> DataFreshness {
        let last_update_date = self.last_update().unwrap_or_else(statutory_effective_date);
        let days_since_update = (self.clock.now() - last_update_date).num_days().max(0);
        let threshold = self.settings.freshness_threshold_days;

        let warning_message = if days_since_update > 180 {
            Some(format!(
                "Fee data was last updated {days_since_update} days ago and is likely outdated. Verify amounts against the current Tax Code."
            ))
        } else if days_since_update > 60 {
            Some(format!(
                "Fee data was last updated {days_since_update} days ago. Rates may have changed."
            ))
        } else if days_since_update > threshold {
            Some(format!(
                "Fee data was last updated {days_since_update} days ago. An update is recommended."
            ))
        } else {
            None
        };

        DataFreshness {
            is_up_to_date: days_since_update <= threshold,
            last_update_date,
            days_since_update,
            warning_message,
        }
    }

    /// Checks the schedules the calculator would use offline. Problems are
    /// logged and reported as `false`.
    pub async fn validate_data_integrity(&self) -> bool {
        let mut valid = true;
        for court in CourtType::ALL {
            let schedule = match self.cache.get::<FeeSchedule>(&DataType::FeeSchedule(court).key()) {
                Some(cached) => cached,
                None => self.local_schedule(court).await,
            };
            if schedule.court_type != court {
                warn!(
                    event_name = "fees.integrity.wrong_court",
                    court = %court,
                    found = %schedule.court_type,
                    "schedule stored for the wrong court"
                );
                valid = false;
                continue;
            }
            if let Err(error) = schedule.validate() {
                warn!(event_name = "fees.integrity.invalid", court = %court, error = %error, "fee schedule invalid");
                valid = false;
            }
        }
        valid
    }

    pub fn cache_status(&self) -> FeeCacheStatus {
        let general_cached = self.cache.has(&DataType::FeeSchedule(CourtType::General).key());
        let arbitration_cached = self.cache.has(&DataType::FeeSchedule(CourtType::Arbitration).key());
        let exemptions_cached = CourtType::ALL
            .into_iter()
            .any(|court| self.cache.has(&DataType::Exemptions(court).key()));

        FeeCacheStatus {
            general_cached,
            arbitration_cached,
            exemptions_cached,
            is_offline_ready: general_cached && arbitration_cached && exemptions_cached,
        }
    }

    pub fn is_offline_ready(&self) -> bool {
        self.cache_status().is_offline_ready
    }

    /// Caches the statutory tables for anything not cached yet. Returns the
    /// number of entries written.
    pub fn preload_offline_data(&self) -> usize {
        let mut written = 0;
        for court in CourtType::ALL {
            if !self.cache.has(&DataType::FeeSchedule(court).key())
                && self.cache_schedule(&statutory_schedule(court), STATIC_SOURCE)
            {
                written += 1;
            }

            let key = DataType::Exemptions(court).key();
            if !self.cache.has(&key) {
                let options = SetOptions::new().with_tag(EXEMPTIONS_TAG).with_source(STATIC_SOURCE);
                match self.cache.set(&key, &statutory_exemptions(court), self.settings.exemptions_ttl, options) {
                    Ok(()) => written += 1,
                    Err(error) => warn!(
                        event_name = "fees.preload.failed",
                        key = %key,
                        error = %error,
                        "could not cache exemptions"
                    ),
                }
            }
        }
        info!(event_name = "fees.preload.completed", written, "offline data preloaded");
        written
    }

    pub async fn get_exemptions(&self, court: CourtType) -> Vec<ExemptionCategory> {
        let data_type = DataType::Exemptions(court);
        if let Some(cached) = self.cache.get::<Vec<ExemptionCategory>>(&data_type.key()) {
            if cached.iter().all(|category| category.applies_to(court)) {
                return cached;
            }
        }

        self.fallback
            .execute_fallback(&data_type, &FallbackContext::because("exemptions not cached"))
            .await
            .data
            .and_then(FallbackPayload::into_exemptions)
            .unwrap_or_else(|| statutory_exemptions(court))
    }

    pub async fn calculate_fee(&self, court: CourtType, claim_amount: u64) -> Result<FeeCalculation, DomainError> {
        let schedule = self.get_current_schedule(court).await;
        schedule.calculate(claim_amount)
    }

    /// Refreshes both schedules each time connectivity comes back. The task
    /// runs until aborted.
    pub fn watch_connectivity(self: Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.connectivity.subscribe();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let online = *changes.borrow_and_update();
                if !online {
                    continue;
                }
                info!(event_name = "fees.connectivity.restored", "refreshing fee schedules");
                for court in CourtType::ALL {
                    self.update_schedule(court).await;
                }
            }
        })
    }

    pub fn stored_version(&self) -> Option<String> {
        self.storage.get_item(VERSION_KEY).ok().flatten()
    }

    fn last_update(&self) -> Option<DateTime<Utc>> {
        let raw = self.storage.get_item(LAST_UPDATE_KEY).ok().flatten()?;
        DateTime::parse_from_rfc3339(raw.trim()).ok().map(|at| at.with_timezone(&Utc))
    }

    async fn fetch_remote(&self, court: CourtType) -> Option<FeeSchedule> {
        let schedule = match self.source.fetch_schedule(court).await {
            Ok(schedule) => schedule,
            Err(error) => {
                warn!(
                    event_name = "fees.remote.failed",
                    court = %court,
                    error = %error,
                    "remote fee schedule unavailable"
                );
                return None;
            }
        };

        if schedule.court_type != court {
            warn!(event_name = "fees.remote.wrong_court", court = %court, "remote returned another court's schedule");
            return None;
        }
        if let Err(error) = schedule.validate() {
            warn!(event_name = "fees.remote.invalid", court = %court, error = %error, "remote fee schedule rejected");
            return None;
        }
        Some(schedule)
    }

    /// Cache, then fallback chain, then statutory tables.
    async fn local_schedule(&self, court: CourtType) -> FeeSchedule {
        let data_type = DataType::FeeSchedule(court);
        if let Some(cached) = self.cache.get::<FeeSchedule>(&data_type.key()) {
            if cached.court_type == court && cached.is_valid() {
                return cached;
            }
            warn!(event_name = "fees.cache.invalid", court = %court, "ignoring invalid cached schedule");
        }

        let result = self
            .fallback
            .execute_fallback(&data_type, &FallbackContext::because("fee schedule not cached"))
            .await;
        match result.data.and_then(FallbackPayload::into_schedule) {
            Some(schedule) => schedule,
            None => {
                warn!(
                    event_name = "fees.fallback.exhausted",
                    court = %court,
                    error = result.error.as_deref().unwrap_or("no data"),
                    "using statutory schedule"
                );
                statutory_schedule(court)
            }
        }
    }

    fn store_schedule(&self, schedule: &FeeSchedule, source: &str) {
        self.cache_schedule(schedule, source);
        self.fallback.store_fallback_data(
            &DataType::FeeSchedule(schedule.court_type),
            &FallbackPayload::FeeSchedule(schedule.clone()),
            source,
        );
    }

    fn cache_schedule(&self, schedule: &FeeSchedule, source: &str) -> bool {
        let key = DataType::FeeSchedule(schedule.court_type).key();
        let options = SetOptions::new()
            .with_tag(SCHEDULE_TAG)
            .with_source(source)
            .with_version(schedule.version.clone());
        match self.cache.set(&key, schedule, self.settings.schedule_ttl, options) {
            Ok(()) => true,
            Err(error) => {
                warn!(event_name = "fees.cache.write_failed", key = %key, error = %error, "schedule not cached");
                false
            }
        }
    }
}

#[async_trait]
impl CacheRefresher for FeeDataManager {
    async fn refresh(
        &self,
        key: &str,
        _metadata: &CacheMetadata,
    ) -> Result<Option<serde_json::Value>, ApplicationError> {
        let data_type: DataType = key.parse().unwrap_or_else(|never| match never {});
        let value = match data_type {
            DataType::FeeSchedule(court) => {
                if !self.is_online() {
                    return Ok(None);
                }
                let schedule = self
                    .source
                    .fetch_schedule(court)
                    .await
                    .map_err(|error| ApplicationError::Integration(error.to_string()))?;
                schedule.validate()?;
                serde_json::to_value(schedule)
            }
            DataType::Exemptions(court) => serde_json::to_value(statutory_exemptions(court)),
            DataType::Custom(_) => return Ok(None),
        };
        value.map(Some).map_err(|error| ApplicationError::Integration(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{FeeDataManager, FeeDataSettings, LAST_UPDATE_KEY, VERSION_KEY};
    use crate::cache::{CacheRefresher, KeyValueCache, SetOptions};
    use crate::clock::{Clock, ManualClock};
    use crate::fallback::{FallbackConfig, FallbackOrchestrator};
    use crate::fees::{
        statutory_schedule, ConnectivityMonitor, CourtType, FeeSchedule, ScheduleSource,
        ScheduleSourceError, FEE_DATA_VERSION,
    };
    use crate::storage::LocalStorage;

    #[derive(Default)]
    struct StubSource {
        schedule_version: Mutex<Option<String>>,
        latest: Mutex<Option<String>>,
        fetches: AtomicUsize,
    }

    impl StubSource {
        fn serving(version: &str) -> Self {
            let source = Self::default();
            *source.schedule_version.lock().expect("lock") = Some(version.to_string());
            *source.latest.lock().expect("lock") = Some(version.to_string());
            source
        }
    }

    #[async_trait]
    impl ScheduleSource for StubSource {
        async fn fetch_schedule(&self, court: CourtType) -> Result<FeeSchedule, ScheduleSourceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let version = self.schedule_version.lock().expect("lock").clone();
            let version = version.ok_or_else(|| ScheduleSourceError::Transport("connection refused".to_string()))?;
            let mut schedule = statutory_schedule(court);
            schedule.version = version;
            Ok(schedule)
        }

        async fn latest_version(&self) -> Result<String, ScheduleSourceError> {
            self.latest
                .lock()
                .expect("lock")
                .clone()
                .ok_or_else(|| ScheduleSourceError::Transport("connection refused".to_string()))
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        storage: LocalStorage,
        cache: Arc<KeyValueCache>,
        source: Arc<StubSource>,
        manager: Arc<FeeDataManager>,
    }

    fn fixture(online: bool, source: StubSource) -> Fixture {
        let start = Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).single().expect("valid date");
        let clock = Arc::new(ManualClock::new(start));
        let storage = LocalStorage::in_memory();
        let cache = Arc::new(KeyValueCache::new(storage.clone(), clock.clone()));
        let fallback = Arc::new(FallbackOrchestrator::new(
            FallbackConfig::default(),
            storage.clone(),
            LocalStorage::in_memory(),
            clock.clone(),
        ));
        let source = Arc::new(source);
        let manager = Arc::new(FeeDataManager::new(
            cache.clone(),
            fallback,
            source.clone(),
            ConnectivityMonitor::new(online),
            storage.clone(),
            FeeDataSettings::default(),
        ));
        Fixture { clock, storage, cache, source, manager }
    }

    #[tokio::test]
    async fn offline_with_empty_cache_returns_statutory_schedule() {
        let fx = fixture(false, StubSource::serving("remote-1"));

        let schedule = fx.manager.get_current_schedule(CourtType::General).await;

        assert_eq!(schedule, statutory_schedule(CourtType::General));
        assert!(schedule.is_valid());
        for pair in schedule.rules.windows(2) {
            assert_eq!(pair[0].max_amount.map(|max| max + 1), Some(pair[1].min_amount));
        }
        assert_eq!(fx.source.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn online_fetch_is_cached_and_served_offline_later() {
        let fx = fixture(true, StubSource::serving("remote-7"));

        let online = fx.manager.get_current_schedule(CourtType::Arbitration).await;
        assert_eq!(online.version, "remote-7");
        assert_eq!(fx.cache.find_by_source("remote"), vec!["fee_schedule_arbitration"]);
        assert!(fx.storage.get_item("fallback_fee_schedule_arbitration").expect("read").is_some());

        fx.manager.connectivity().set_online(false);
        let offline = fx.manager.get_current_schedule(CourtType::Arbitration).await;
        assert_eq!(offline.version, "remote-7");
        assert_eq!(fx.source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remote_failure_falls_back_to_previously_stored_data() {
        let fx = fixture(true, StubSource::serving("remote-2"));
        fx.manager.get_current_schedule(CourtType::General).await;

        *fx.source.schedule_version.lock().expect("lock") = None;
        fx.clock.advance(Duration::days(2));
        let schedule = fx.manager.get_current_schedule(CourtType::General).await;

        assert_eq!(schedule.version, "remote-2", "stored fallback data outlives the cache entry");
    }

    #[tokio::test]
    async fn remote_failure_without_local_data_uses_statutory_rules() {
        let fx = fixture(true, StubSource::default());
        let schedule = fx.manager.get_current_schedule(CourtType::General).await;
        assert_eq!(schedule.version, FEE_DATA_VERSION);
    }

    #[tokio::test]
    async fn update_checks_depend_on_mode_and_markers() {
        let offline = fixture(false, StubSource::serving("2025.01.01"));
        assert!(!offline.manager.check_for_updates().await);

        let online = fixture(true, StubSource::serving("2025.01.01"));
        assert!(online.manager.check_for_updates().await);
        online.manager.update_schedule(CourtType::General).await;
        assert!(!online.manager.check_for_updates().await);

        let failing = fixture(true, StubSource::default());
        assert!(!failing.manager.check_for_updates().await, "no marker, nothing to compare");
        failing.storage.set_item(VERSION_KEY, "2023.01.01").expect("seed marker");
        assert!(failing.manager.check_for_updates().await);
    }

    #[tokio::test]
    async fn update_persists_version_markers() {
        let fx = fixture(true, StubSource::serving("2025.03.01"));

        let schedule = fx.manager.update_schedule(CourtType::General).await;

        assert_eq!(schedule.version, "2025.03.01");
        assert_eq!(fx.manager.stored_version().as_deref(), Some("2025.03.01"));
        let stamp = fx.storage.get_item(LAST_UPDATE_KEY).expect("read").expect("stamp");
        assert_eq!(stamp, fx.clock.now().to_rfc3339());
        assert!(fx.manager.check_data_freshness().is_up_to_date);
    }

    #[tokio::test]
    async fn freshness_tiers_and_clock_skew() {
        let fx = fixture(false, StubSource::default());
        let now = fx.clock.now();

        let at = |days: i64| (now - Duration::days(days)).to_rfc3339();
        fx.storage.set_item(LAST_UPDATE_KEY, &at(10)).expect("seed");
        let fresh = fx.manager.check_data_freshness();
        assert!(fresh.is_up_to_date);
        assert_eq!(fresh.warning_message, None);

        fx.storage.set_item(LAST_UPDATE_KEY, &at(45)).expect("seed");
        let stale = fx.manager.check_data_freshness();
        assert!(!stale.is_up_to_date);
        assert!(stale.warning_message.as_deref().is_some_and(|message| message.contains("recommended")));

        fx.storage.set_item(LAST_UPDATE_KEY, &at(90)).expect("seed");
        let older = fx.manager.check_data_freshness();
        assert!(older.warning_message.as_deref().is_some_and(|message| message.contains("may have changed")));

        fx.storage.set_item(LAST_UPDATE_KEY, &at(200)).expect("seed");
        let ancient = fx.manager.check_data_freshness();
        assert!(ancient.warning_message.as_deref().is_some_and(|message| message.contains("outdated")));

        fx.storage.set_item(LAST_UPDATE_KEY, &at(-5)).expect("seed");
        let future = fx.manager.check_data_freshness();
        assert_eq!(future.days_since_update, 0);
        assert!(future.is_up_to_date);
    }

    #[tokio::test]
    async fn integrity_check_flags_gapped_cached_schedule() {
        let fx = fixture(false, StubSource::default());
        assert!(fx.manager.validate_data_integrity().await);

        let mut gapped = statutory_schedule(CourtType::General);
        gapped.rules[1].min_amount += 10;
        fx.cache
            .set("fee_schedule_general", &gapped, Duration::hours(1), SetOptions::new())
            .expect("seed");

        assert!(!fx.manager.validate_data_integrity().await);
    }

    #[tokio::test]
    async fn preload_makes_calculator_offline_ready() {
        let fx = fixture(false, StubSource::default());
        assert!(!fx.manager.is_offline_ready());

        assert_eq!(fx.manager.preload_offline_data(), 4);
        let status = fx.manager.cache_status();
        assert!(status.general_cached && status.arbitration_cached && status.exemptions_cached);
        assert!(status.is_offline_ready);

        assert_eq!(fx.manager.preload_offline_data(), 0);
    }

    #[tokio::test]
    async fn exemptions_come_from_statutory_tables_when_not_cached() {
        let fx = fixture(false, StubSource::default());
        let exemptions = fx.manager.get_exemptions(CourtType::Arbitration).await;

        assert!(!exemptions.is_empty());
        assert!(exemptions.iter().all(|category| category.applies_to(CourtType::Arbitration)));
    }

    #[tokio::test]
    async fn fee_calculation_applies_progressive_rules() {
        let fx = fixture(false, StubSource::default());

        let small = fx.manager.calculate_fee(CourtType::General, 50_000).await.expect("fee");
        assert_eq!(small.fee, Decimal::from(4_000));

        let tiered = fx.manager.calculate_fee(CourtType::General, 200_000).await.expect("fee");
        assert_eq!(tiered.fee, Decimal::from(7_000));
        assert_eq!(tiered.rule_index, 1);

        let arbitration = fx.manager.calculate_fee(CourtType::Arbitration, 500_000).await.expect("fee");
        assert_eq!(arbitration.fee, Decimal::from(30_000));
    }

    #[tokio::test]
    async fn restored_connectivity_refreshes_schedules() {
        let fx = fixture(false, StubSource::serving("2025.05.05"));
        let watcher = fx.manager.clone().watch_connectivity();

        fx.manager.connectivity().set_online(true);
        for _ in 0..50 {
            if fx.cache.has("fee_schedule_arbitration") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        watcher.abort();

        assert_eq!(fx.manager.stored_version().as_deref(), Some("2025.05.05"));
        assert_eq!(fx.source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresher_only_fetches_while_online() {
        let fx = fixture(true, StubSource::serving("2025.06.01"));
        fx.manager.get_current_schedule(CourtType::General).await;
        let metadata = fx.cache.metadata("fee_schedule_general").expect("cached");

        let refreshed = fx.manager.refresh("fee_schedule_general", &metadata).await.expect("refresh");
        assert!(refreshed.is_some());

        fx.manager.connectivity().set_online(false);
        let skipped = fx.manager.refresh("fee_schedule_general", &metadata).await.expect("refresh");
        assert!(skipped.is_none());
    }
}
