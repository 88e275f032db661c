//! Prioritized fallback chain for reference data.
//!
//! Each data type has its own ordered list of strategies. Execution stops at
//! the first strategy that produces data; every attempt is recorded in a
//! bounded per-data-type history.

mod providers;
mod strategies;
mod types;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Duration;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::storage::LocalStorage;

pub use providers::{
    payload_key, timestamp_key, CacheDataProvider, DataProvider, ProviderRegistry,
    StoredFallbackProvider, FALLBACK_KEY_PREFIX,
};
pub use strategies::{
    CachedDataStrategy, DefaultDataStrategy, FallbackStrategy, GracefulDegradationStrategy,
};
pub use types::{
    DataType, FallbackAttempt, FallbackAvailability, FallbackContext, FallbackPayload,
    FallbackResult, FallbackStatistics, StrategyError, StrategyOutcome, StrategyStatistics,
    FALLBACK_SOURCE,
};

pub const DEFAULT_HISTORY_LIMIT: usize = 100;
pub const DURABLE_PROVIDER: &str = "local_storage";
pub const SESSION_PROVIDER: &str = "session_storage";

#[derive(Clone, Debug, PartialEq)]
pub struct FallbackConfig {
    pub max_data_age: Duration,
    pub enable_degradation: bool,
    pub history_limit: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self { max_data_age: Duration::days(7), enable_degradation: true, history_limit: DEFAULT_HISTORY_LIMIT }
    }
}

type StrategyList = Vec<Arc<dyn FallbackStrategy>>;

pub struct FallbackOrchestrator {
    config: FallbackConfig,
    durable: LocalStorage,
    session: LocalStorage,
    clock: SharedClock,
    providers: ProviderRegistry,
    strategies: RwLock<HashMap<DataType, StrategyList>>,
    history: Mutex<HashMap<DataType, VecDeque<FallbackAttempt>>>,
}

impl std::fmt::Debug for FallbackOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackOrchestrator")
            .field("config", &self.config)
            .field("providers", &self.providers.names())
            .finish()
    }
}

impl FallbackOrchestrator {
    /// Builds an orchestrator with the built-in providers (durable and
    /// session storage) and the built-in strategies for every known data type.
    pub fn new(
        config: FallbackConfig,
        durable: LocalStorage,
        session: LocalStorage,
        clock: SharedClock,
    ) -> Self {
        let orchestrator = Self::empty(config, durable, session, clock);

        orchestrator.register_provider(Arc::new(StoredFallbackProvider::new(
            DURABLE_PROVIDER,
            orchestrator.durable.clone(),
            orchestrator.clock.clone(),
        )));
        orchestrator.register_provider(Arc::new(StoredFallbackProvider::new(
            SESSION_PROVIDER,
            orchestrator.session.clone(),
            orchestrator.clock.clone(),
        )));

        for data_type in DataType::known() {
            orchestrator.register_builtin_strategies(&data_type);
        }
        orchestrator
    }

    /// Orchestrator without providers or strategies.
    pub fn empty(
        config: FallbackConfig,
        durable: LocalStorage,
        session: LocalStorage,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            durable,
            session,
            clock,
            providers: ProviderRegistry::default(),
            strategies: RwLock::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    pub fn register_builtin_strategies(&self, data_type: &DataType) {
        self.register_strategy(
            data_type.clone(),
            Arc::new(CachedDataStrategy::new(self.providers.clone(), self.config.max_data_age)),
        );
        self.register_strategy(data_type.clone(), Arc::new(DefaultDataStrategy));
        if self.config.enable_degradation {
            self.register_strategy(data_type.clone(), Arc::new(GracefulDegradationStrategy));
        }
    }

    /// Adds a strategy; strategies with equal priority keep registration order.
    pub fn register_strategy(&self, data_type: DataType, strategy: Arc<dyn FallbackStrategy>) {
        let mut strategies = self.strategies.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let list = strategies.entry(data_type).or_default();
        list.push(strategy);
        list.sort_by_key(|strategy| strategy.priority());
    }

    pub fn register_provider(&self, provider: Arc<dyn DataProvider>) {
        self.providers.register(provider);
    }

    pub fn strategy_names(&self, data_type: &DataType) -> Vec<String> {
        self.strategies_for(data_type).iter().map(|strategy| strategy.name().to_string()).collect()
    }

    fn strategies_for(&self, data_type: &DataType) -> StrategyList {
        self.strategies
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(data_type)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn execute_fallback(
        &self,
        data_type: &DataType,
        context: &FallbackContext,
    ) -> FallbackResult {
        let strategies = self.strategies_for(data_type);
        if strategies.is_empty() {
            warn!(event_name = "fallback.unknown_data_type", data_type = %data_type, "no strategies registered");
            return self.failure(format!("unknown data type `{data_type}`: no fallback strategies registered"));
        }

        info!(
            event_name = "fallback.execute",
            data_type = %data_type,
            reason = context.reason.as_deref().unwrap_or("unspecified"),
            "executing fallback chain"
        );

        let mut last_error = None;
        for strategy in strategies {
            let outcome = strategy.execute(data_type, context).await;
            let timestamp = self.clock.now();
            match outcome {
                Ok(outcome) => {
                    self.record(
                        data_type,
                        FallbackAttempt {
                            strategy: strategy.name().to_string(),
                            success: true,
                            error: None,
                            timestamp,
                        },
                    );
                    info!(
                        event_name = "fallback.succeeded",
                        data_type = %data_type,
                        strategy = strategy.name(),
                        cached = outcome.cached,
                        "fallback produced data"
                    );
                    return FallbackResult {
                        success: true,
                        data: Some(outcome.payload),
                        error: None,
                        source: FALLBACK_SOURCE,
                        strategy: Some(strategy.name().to_string()),
                        timestamp,
                        cached: outcome.cached,
                    };
                }
                Err(error) => {
                    debug!(
                        event_name = "fallback.strategy_failed",
                        data_type = %data_type,
                        strategy = strategy.name(),
                        error = %error,
                        "fallback strategy failed"
                    );
                    self.record(
                        data_type,
                        FallbackAttempt {
                            strategy: strategy.name().to_string(),
                            success: false,
                            error: Some(error.to_string()),
                            timestamp,
                        },
                    );
                    last_error = Some(error.to_string());
                }
            }
        }

        warn!(event_name = "fallback.exhausted", data_type = %data_type, "all fallback strategies failed");
        self.failure(last_error.unwrap_or_else(|| "all fallback strategies failed".to_string()))
    }

    fn failure(&self, error: String) -> FallbackResult {
        FallbackResult {
            success: false,
            data: None,
            error: Some(error),
            source: FALLBACK_SOURCE,
            strategy: None,
            timestamp: self.clock.now(),
            cached: false,
        }
    }

    fn record(&self, data_type: &DataType, attempt: FallbackAttempt) {
        let mut history = self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let attempts = history.entry(data_type.clone()).or_default();
        attempts.push_back(attempt);
        while attempts.len() > self.config.history_limit.max(1) {
            attempts.pop_front();
        }
    }

    /// Writes `payload` to the durable and session media with a timestamp
    /// sidecar. Failures are logged and otherwise ignored.
    pub fn store_fallback_data(&self, data_type: &DataType, payload: &FallbackPayload, source: &str) {
        if let Err(error) = payload.ensure_matches(data_type) {
            warn!(
                event_name = "fallback.store.rejected",
                data_type = %data_type,
                error = %error,
                "refusing to store mismatched fallback data"
            );
            return;
        }

        let stored_at = self.clock.now().to_rfc3339();
        for (name, storage) in [(DURABLE_PROVIDER, &self.durable), (SESSION_PROVIDER, &self.session)] {
            let written = storage
                .write_json(&payload_key(data_type), payload)
                .and_then(|()| storage.set_item(&timestamp_key(data_type), &stored_at));
            match written {
                Ok(()) => debug!(
                    event_name = "fallback.store.written",
                    data_type = %data_type,
                    medium = name,
                    source,
                    "fallback data stored"
                ),
                Err(error) => warn!(
                    event_name = "fallback.store.failed",
                    data_type = %data_type,
                    medium = name,
                    error = %error,
                    "could not store fallback data"
                ),
            }
        }
    }

    pub fn check_fallback_availability(&self, data_type: &DataType) -> FallbackAvailability {
        let mut sources = Vec::new();
        let mut ages = Vec::new();
        for provider in self.providers.snapshot() {
            if provider.is_available(data_type) {
                sources.push(provider.name().to_string());
                if let Some(age) = provider.data_age(data_type) {
                    ages.push(age.num_milliseconds());
                }
            }
        }

        FallbackAvailability {
            available: !sources.is_empty(),
            sources,
            oldest_data_age_ms: ages.iter().copied().max(),
            newest_data_age_ms: ages.iter().copied().min(),
        }
    }

    pub fn history(&self, data_type: &DataType) -> Vec<FallbackAttempt> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(data_type)
            .map(|attempts| attempts.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_history(&self, data_type: Option<&DataType>) {
        let mut history = self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match data_type {
            Some(data_type) => {
                history.remove(data_type);
            }
            None => history.clear(),
        }
    }

    /// Aggregates recorded attempts for one data type, or all of them.
    pub fn statistics(&self, data_type: Option<&DataType>) -> FallbackStatistics {
        let history = self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let attempts: Vec<&FallbackAttempt> = match data_type {
            Some(data_type) => history.get(data_type).map(|list| list.iter().collect()).unwrap_or_default(),
            None => history.values().flat_map(|list| list.iter()).collect(),
        };

        let mut stats = FallbackStatistics::default();
        let mut by_strategy: BTreeMap<String, StrategyStatistics> = BTreeMap::new();
        for attempt in attempts {
            stats.total_attempts += 1;
            let entry = by_strategy.entry(attempt.strategy.clone()).or_default();
            entry.attempts += 1;
            if attempt.success {
                stats.successful_attempts += 1;
                entry.successes += 1;
                stats.last_success = Some(
                    stats.last_success.map_or(attempt.timestamp, |last| last.max(attempt.timestamp)),
                );
            } else {
                stats.failed_attempts += 1;
            }
        }
        if stats.total_attempts > 0 {
            stats.success_rate = stats.successful_attempts as f64 / stats.total_attempts as f64;
        }
        stats.by_strategy = by_strategy;
        stats
    }
}
