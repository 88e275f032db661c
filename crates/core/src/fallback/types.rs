use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fees::{CourtType, ExemptionCategory, FeeSchedule};

/// Reference data the fallback chain knows how to substitute.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    FeeSchedule(CourtType),
    Exemptions(CourtType),
    /// Anything else; no built-in strategy produces data for it.
    Custom(String),
}

impl DataType {
    pub fn key(&self) -> String {
        match self {
            Self::FeeSchedule(court) => format!("fee_schedule_{court}"),
            Self::Exemptions(court) => format!("exemptions_{court}"),
            Self::Custom(name) => name.clone(),
        }
    }

    pub fn known() -> Vec<DataType> {
        CourtType::ALL
            .into_iter()
            .flat_map(|court| [Self::FeeSchedule(court), Self::Exemptions(court)])
            .collect()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl FromStr for DataType {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parsed = if let Some(court) = value.strip_prefix("fee_schedule_") {
            court.parse().ok().map(Self::FeeSchedule)
        } else if let Some(court) = value.strip_prefix("exemptions_") {
            court.parse().ok().map(Self::Exemptions)
        } else {
            None
        };
        Ok(parsed.unwrap_or_else(|| Self::Custom(value.to_string())))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum FallbackPayload {
    FeeSchedule(FeeSchedule),
    Exemptions(Vec<ExemptionCategory>),
}

impl FallbackPayload {
    /// Parses stored JSON and checks it is the right shape for `data_type`.
    pub fn decode(data_type: &DataType, raw: &str) -> Result<Self, String> {
        let payload: FallbackPayload = serde_json::from_str(raw).map_err(|error| error.to_string())?;
        payload.ensure_matches(data_type)?;
        Ok(payload)
    }

    pub fn ensure_matches(&self, data_type: &DataType) -> Result<(), String> {
        match (self, data_type) {
            (Self::FeeSchedule(schedule), DataType::FeeSchedule(court)) => {
                if schedule.court_type != *court {
                    return Err(format!(
                        "schedule is for {} courts, expected {court}",
                        schedule.court_type
                    ));
                }
                schedule.validate().map_err(|error| error.to_string())
            }
            (Self::Exemptions(categories), DataType::Exemptions(court)) => {
                if categories.iter().all(|category| category.applies_to(*court)) {
                    Ok(())
                } else {
                    Err(format!("exemption list contains categories not applicable to {court}"))
                }
            }
            _ => Err(format!("payload does not match data type {data_type}")),
        }
    }

    pub fn into_schedule(self) -> Option<FeeSchedule> {
        match self {
            Self::FeeSchedule(schedule) => Some(schedule),
            Self::Exemptions(_) => None,
        }
    }

    pub fn into_exemptions(self) -> Option<Vec<ExemptionCategory>> {
        match self {
            Self::Exemptions(categories) => Some(categories),
            Self::FeeSchedule(_) => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FallbackContext {
    pub reason: Option<String>,
    /// Overrides the orchestrator-wide maximum age for cached data.
    pub max_data_age: Option<chrono::Duration>,
}

impl FallbackContext {
    pub fn because(reason: impl Into<String>) -> Self {
        Self { reason: Some(reason.into()), max_data_age: None }
    }
}

pub const FALLBACK_SOURCE: &str = "fallback";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FallbackResult {
    pub success: bool,
    pub data: Option<FallbackPayload>,
    pub error: Option<String>,
    pub source: &'static str,
    pub strategy: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub cached: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FallbackAttempt {
    pub strategy: String,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StrategyOutcome {
    pub payload: FallbackPayload,
    pub cached: bool,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StrategyError {
    #[error("no fallback data available for {0}")]
    NoData(DataType),
    #[error("freshest data for {data_type} is {age_hours}h old, older than allowed")]
    Stale { data_type: DataType, age_hours: i64 },
    #[error("strategy does not support data type {0}")]
    Unsupported(DataType),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FallbackAvailability {
    pub available: bool,
    pub sources: Vec<String>,
    pub oldest_data_age_ms: Option<i64>,
    pub newest_data_age_ms: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StrategyStatistics {
    pub attempts: usize,
    pub successes: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FallbackStatistics {
    pub total_attempts: usize,
    pub successful_attempts: usize,
    pub failed_attempts: usize,
    pub success_rate: f64,
    pub by_strategy: std::collections::BTreeMap<String, StrategyStatistics>,
    pub last_success: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::{DataType, FallbackPayload};
    use crate::fees::{statutory_exemptions, statutory_schedule, CourtType};

    #[test]
    fn data_type_keys_round_trip_through_parsing() {
        for data_type in DataType::known() {
            let parsed: DataType = data_type.key().parse().expect("infallible");
            assert_eq!(parsed, data_type);
        }
        let custom: DataType = "documents".parse().expect("infallible");
        assert_eq!(custom, DataType::Custom("documents".to_string()));
    }

    #[test]
    fn payload_for_wrong_court_is_rejected() {
        let payload = FallbackPayload::FeeSchedule(statutory_schedule(CourtType::Arbitration));
        let raw = serde_json::to_string(&payload).expect("encode");

        assert!(FallbackPayload::decode(&DataType::FeeSchedule(CourtType::General), &raw).is_err());
        assert!(FallbackPayload::decode(&DataType::FeeSchedule(CourtType::Arbitration), &raw).is_ok());
    }

    #[test]
    fn payload_kind_must_match_data_type() {
        let payload = FallbackPayload::Exemptions(statutory_exemptions(CourtType::General));
        assert!(payload.ensure_matches(&DataType::FeeSchedule(CourtType::General)).is_err());
        assert!(payload.ensure_matches(&DataType::Exemptions(CourtType::General)).is_ok());
    }
}
