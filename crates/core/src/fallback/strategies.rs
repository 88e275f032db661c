use async_trait::async_trait;
use chrono::Duration;
use tracing::debug;

use super::providers::ProviderRegistry;
use super::types::{DataType, FallbackContext, FallbackPayload, StrategyError, StrategyOutcome};
use crate::fees::{degraded_schedule, statutory_exemptions, statutory_schedule};

#[async_trait]
pub trait FallbackStrategy: Send + Sync {
    fn name(&self) -> &str;
    /// Lower runs first.
    fn priority(&self) -> u32;
    async fn execute(
        &self,
        data_type: &DataType,
        context: &FallbackContext,
    ) -> Result<StrategyOutcome, StrategyError>;
}

/// Freshest data from the registered providers, within the maximum age.
pub struct CachedDataStrategy {
    providers: ProviderRegistry,
    max_data_age: Duration,
}

impl CachedDataStrategy {
    pub const NAME: &'static str = "cached_data";

    pub fn new(providers: ProviderRegistry, max_data_age: Duration) -> Self {
        Self { providers, max_data_age }
    }
}

#[async_trait]
impl FallbackStrategy for CachedDataStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> u32 {
        1
    }

    async fn execute(
        &self,
        data_type: &DataType,
        context: &FallbackContext,
    ) -> Result<StrategyOutcome, StrategyError> {
        let max_age = context.max_data_age.unwrap_or(self.max_data_age);

        let mut candidates: Vec<_> = self
            .providers
            .snapshot()
            .into_iter()
            .filter(|provider| provider.is_available(data_type))
            .filter_map(|provider| provider.data_age(data_type).map(|age| (age, provider)))
            .collect();
        candidates.sort_by_key(|(age, _)| *age);

        let Some((freshest_age, _)) = candidates.first() else {
            return Err(StrategyError::NoData(data_type.clone()));
        };
        if *freshest_age > max_age {
            return Err(StrategyError::Stale {
                data_type: data_type.clone(),
                age_hours: freshest_age.num_hours(),
            });
        }

        for (age, provider) in candidates.iter().take_while(|(age, _)| *age <= max_age) {
            if let Some(payload) = provider.load(data_type) {
                debug!(
                    event_name = "fallback.cached_data.hit",
                    provider = provider.name(),
                    data_type = %data_type,
                    age_secs = age.num_seconds(),
                    "serving cached fallback data"
                );
                return Ok(StrategyOutcome { payload, cached: true });
            }
        }

        Err(StrategyError::NoData(data_type.clone()))
    }
}

/// Statutory rule tables compiled into the build.
#[derive(Debug, Default)]
pub struct DefaultDataStrategy;

impl DefaultDataStrategy {
    pub const NAME: &'static str = "default_data";
}

#[async_trait]
impl FallbackStrategy for DefaultDataStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> u32 {
        2
    }

    async fn execute(
        &self,
        data_type: &DataType,
        _context: &FallbackContext,
    ) -> Result<StrategyOutcome, StrategyError> {
        let payload = match data_type {
            DataType::FeeSchedule(court) => FallbackPayload::FeeSchedule(statutory_schedule(*court)),
            DataType::Exemptions(court) => FallbackPayload::Exemptions(statutory_exemptions(*court)),
            DataType::Custom(_) => return Err(StrategyError::Unsupported(data_type.clone())),
        };
        Ok(StrategyOutcome { payload, cached: false })
    }
}

/// Minimal stand-in data so a calculator never fully breaks. Registered only
/// when degradation is enabled.
#[derive(Debug, Default)]
pub struct GracefulDegradationStrategy;

impl GracefulDegradationStrategy {
    pub const NAME: &'static str = "graceful_degradation";
}

#[async_trait]
impl FallbackStrategy for GracefulDegradationStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> u32 {
        3
    }

    async fn execute(
        &self,
        data_type: &DataType,
        _context: &FallbackContext,
    ) -> Result<StrategyOutcome, StrategyError> {
        let payload = match data_type {
            DataType::FeeSchedule(court) => FallbackPayload::FeeSchedule(degraded_schedule(*court)),
            DataType::Exemptions(_) => FallbackPayload::Exemptions(Vec::new()),
            DataType::Custom(_) => return Err(StrategyError::Unsupported(data_type.clone())),
        };
        Ok(StrategyOutcome { payload, cached: false })
    }
}
