//! Builds runtime services from the loaded configuration.

use std::sync::Arc;

use fincalc_core::cache::KeyValueCache;
use fincalc_core::clock::{system_clock, SharedClock};
use fincalc_core::config::AppConfig;
use fincalc_core::fallback::FallbackOrchestrator;
use fincalc_core::fees::{
    ConnectivityMonitor, FeeDataManager, HttpScheduleSource, ScheduleSource, UnconfiguredSource,
};
use fincalc_core::profile::{LocalProfileStore, UserProfileStore};
use fincalc_core::recommendations::RecommendationEngine;
use fincalc_core::storage::{FileMedium, LocalStorage, MemoryMedium, StorageError};
use fincalc_db::repositories::{
    SqlBankProductRepository, SqlProfileRepository, SqlRecommendationRepository,
};
use fincalc_db::DbPool;
use tracing::debug;

use crate::commands::Failure;

pub(crate) struct FeeServices {
    pub cache: Arc<KeyValueCache>,
    pub manager: Arc<FeeDataManager>,
}

/// File-backed when `cache.medium_path` is set, process memory otherwise.
pub(crate) fn durable_storage(config: &AppConfig) -> Result<LocalStorage, StorageError> {
    let quota = config.cache.quota_bytes;
    let storage = match &config.cache.medium_path {
        Some(path) => {
            let medium = FileMedium::open(path.clone())?;
            match quota {
                Some(quota) => LocalStorage::new(medium.with_quota(quota)),
                None => LocalStorage::new(medium),
            }
        }
        None => match quota {
            Some(quota) => LocalStorage::new(MemoryMedium::with_quota(quota)),
            None => LocalStorage::in_memory(),
        },
    };
    Ok(storage)
}

fn schedule_source(config: &AppConfig) -> Result<Arc<dyn ScheduleSource>, Failure> {
    match &config.remote.base_url {
        Some(base_url) => {
            let source =
                HttpScheduleSource::new(base_url, config.remote.api_key.clone(), config.remote_timeout())
                    .map_err(|error| ("remote_init", error.to_string(), 3u8))?;
            Ok(Arc::new(source))
        }
        None => Ok(Arc::new(UnconfiguredSource)),
    }
}

/// Online only when a remote endpoint is configured and neither the caller
/// nor the configuration asked for offline mode.
pub(crate) fn fee_services(config: &AppConfig, force_offline: bool) -> Result<FeeServices, Failure> {
    fee_services_with_clock(config, force_offline, system_clock())
}

pub(crate) fn fee_services_with_clock(
    config: &AppConfig,
    force_offline: bool,
    clock: SharedClock,
) -> Result<FeeServices, Failure> {
    let durable = durable_storage(config).map_err(|error| ("storage", error.to_string(), 3u8))?;
    let cache = Arc::new(KeyValueCache::with_policy(
        durable.clone(),
        clock.clone(),
        config.refresh_policy(),
    ));
    let fallback = Arc::new(FallbackOrchestrator::new(
        config.fallback_config(),
        durable.clone(),
        LocalStorage::in_memory(),
        clock,
    ));

    let online = !force_offline && !config.fees.start_offline && config.remote.base_url.is_some();
    debug!(event_name = "cli.fees.wired", online, "fee services ready");

    let manager = Arc::new(FeeDataManager::new(
        cache.clone(),
        fallback,
        schedule_source(config)?,
        ConnectivityMonitor::new(online),
        durable,
        config.fee_settings(),
    ));
    Ok(FeeServices { cache, manager })
}

pub(crate) fn recommendation_engine(
    config: &AppConfig,
    pool: &DbPool,
) -> Result<RecommendationEngine, Failure> {
    let clock = system_clock();
    let durable = durable_storage(config).map_err(|error| ("storage", error.to_string(), 3u8))?;
    let profiles = Arc::new(UserProfileStore::new(
        Arc::new(SqlProfileRepository::new(pool.clone())),
        LocalProfileStore::new(durable),
        clock.clone(),
    ));

    Ok(RecommendationEngine::new(
        profiles,
        Arc::new(SqlBankProductRepository::new(pool.clone())),
        Arc::new(SqlRecommendationRepository::new(pool.clone())),
        clock,
    )
    .with_partner_banks(config.recommendations.partner_banks.clone()))
}

#[cfg(test)]
mod tests {
    use fincalc_core::config::AppConfig;

    use super::{durable_storage, fee_services};

    #[test]
    fn storage_follows_medium_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::default();
        config.cache.medium_path = Some(dir.path().join("cache.json"));

        let storage = durable_storage(&config).expect("file storage");
        storage.set_item("marker", "1").expect("write");

        let reopened = durable_storage(&config).expect("reopen");
        assert_eq!(reopened.get_item("marker").expect("read").as_deref(), Some("1"));
    }

    #[test]
    fn fee_services_stay_offline_without_remote() {
        let config = AppConfig::default();
        let services = fee_services(&config, false).expect("services");
        assert!(!services.manager.is_online());
    }

    #[test]
    fn configured_remote_can_be_forced_offline() {
        let mut config = AppConfig::default();
        config.remote.base_url = Some("https://fees.example.test".to_string());

        assert!(fee_services(&config, false).expect("online").manager.is_online());
        assert!(!fee_services(&config, true).expect("offline").manager.is_online());
    }
}
