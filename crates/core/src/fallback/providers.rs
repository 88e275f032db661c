use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::types::{DataType, FallbackPayload};
use crate::cache::KeyValueCache;
use crate::clock::SharedClock;
use crate::storage::LocalStorage;

pub const FALLBACK_KEY_PREFIX: &str = "fallback_";

pub fn payload_key(data_type: &DataType) -> String {
    format!("{FALLBACK_KEY_PREFIX}{}", data_type.key())
}

pub fn timestamp_key(data_type: &DataType) -> String {
    format!("{FALLBACK_KEY_PREFIX}{}_timestamp", data_type.key())
}

/// A place previously-seen data can be recovered from.
pub trait DataProvider: Send + Sync {
    fn name(&self) -> &str;
    fn is_available(&self, data_type: &DataType) -> bool;
    fn data_age(&self, data_type: &DataType) -> Option<Duration>;
    fn load(&self, data_type: &DataType) -> Option<FallbackPayload>;
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Arc<RwLock<Vec<Arc<dyn DataProvider>>>>,
}

impl ProviderRegistry {
    pub fn register(&self, provider: Arc<dyn DataProvider>) {
        let mut providers = self.providers.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        providers.retain(|existing| existing.name() != provider.name());
        providers.push(provider);
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn DataProvider>> {
        self.providers.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|provider| provider.name().to_string()).collect()
    }
}

/// Reads data written by `FallbackOrchestrator::store_fallback_data`.
///
/// Availability and age come from the timestamp sidecar so the payload is
/// only parsed when it is actually used.
pub struct StoredFallbackProvider {
    name: String,
    storage: LocalStorage,
    clock: SharedClock,
}

impl StoredFallbackProvider {
    pub fn new(name: impl Into<String>, storage: LocalStorage, clock: SharedClock) -> Self {
        Self { name: name.into(), storage, clock }
    }

    fn stored_at(&self, data_type: &DataType) -> Option<DateTime<Utc>> {
        let raw = self.storage.get_item(&timestamp_key(data_type)).ok().flatten()?;
        DateTime::parse_from_rfc3339(raw.trim()).ok().map(|at| at.with_timezone(&Utc))
    }
}

impl DataProvider for StoredFallbackProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self, data_type: &DataType) -> bool {
        self.stored_at(data_type).is_some()
            && matches!(self.storage.get_item(&payload_key(data_type)), Ok(Some(_)))
    }

    fn data_age(&self, data_type: &DataType) -> Option<Duration> {
        self.stored_at(data_type).map(|at| (self.clock.now() - at).max(Duration::zero()))
    }

    fn load(&self, data_type: &DataType) -> Option<FallbackPayload> {
        let raw = self.storage.get_item(&payload_key(data_type)).ok().flatten()?;
        match FallbackPayload::decode(data_type, &raw) {
            Ok(payload) => Some(payload),
            Err(error) => {
                debug!(
                    event_name = "fallback.provider.decode_failed",
                    provider = %self.name,
                    data_type = %data_type,
                    error = %error,
                    "stored fallback data ignored"
                );
                None
            }
        }
    }
}

/// Exposes entries of the TTL cache, keyed by `DataType::key`, to the
/// fallback chain. Expired entries are still served here: stale data beats
/// no data once the primary path has failed.
pub struct CacheDataProvider {
    cache: Arc<KeyValueCache>,
}

impl CacheDataProvider {
    pub const NAME: &'static str = "enhanced_cache";

    pub fn new(cache: Arc<KeyValueCache>) -> Self {
        Self { cache }
    }
}

impl DataProvider for CacheDataProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_available(&self, data_type: &DataType) -> bool {
        self.cache.metadata(&data_type.key()).is_some()
    }

    fn data_age(&self, data_type: &DataType) -> Option<Duration> {
        let metadata = self.cache.metadata(&data_type.key())?;
        Some((self.cache.clock().now() - metadata.timestamp).max(Duration::zero()))
    }

    fn load(&self, data_type: &DataType) -> Option<FallbackPayload> {
        let key = data_type.key();
        let raw = self.cache.raw_data(&key)?;
        let payload = match data_type {
            DataType::FeeSchedule(_) => serde_json::from_value(raw).ok().map(FallbackPayload::FeeSchedule),
            DataType::Exemptions(_) => serde_json::from_value(raw).ok().map(FallbackPayload::Exemptions),
            DataType::Custom(_) => None,
        }?;
        payload.ensure_matches(data_type).ok()?;
        Some(payload)
    }
}
