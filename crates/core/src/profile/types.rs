use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

pub const HISTORY_LIMIT: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Mortgage,
    Credit,
    Deposit,
    Insurance,
    Card,
    Refinancing,
}

impl ProductType {
    pub const ALL: [ProductType; 6] = [
        ProductType::Mortgage,
        ProductType::Credit,
        ProductType::Deposit,
        ProductType::Insurance,
        ProductType::Card,
        ProductType::Refinancing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mortgage => "mortgage",
            Self::Credit => "credit",
            Self::Deposit => "deposit",
            Self::Insurance => "insurance",
            Self::Card => "card",
            Self::Refinancing => "refinancing",
        }
    }

    /// Product interest implied by using a calculator, if any.
    pub fn from_calculator(calculator_type: &str) -> Option<Self> {
        match calculator_type.trim().to_ascii_lowercase().as_str() {
            "mortgage" => Some(Self::Mortgage),
            "credit" | "loan" | "consumer_credit" => Some(Self::Credit),
            "deposit" | "savings" => Some(Self::Deposit),
            "insurance" | "osago" | "kasko" => Some(Self::Insurance),
            "card" | "credit_card" => Some(Self::Card),
            "refinancing" => Some(Self::Refinancing),
            _ => None,
        }
    }

    /// Loans are ranked by lower rate, everything else by higher rate.
    pub fn is_loan(&self) -> bool {
        matches!(self, Self::Mortgage | Self::Credit | Self::Card | Self::Refinancing)
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == value.trim())
            .ok_or_else(|| DomainError::UnknownCalculator(value.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Low,
    Medium,
    High,
}

impl RiskTolerance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for RiskTolerance {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(DomainError::InvariantViolation(format!("unknown risk tolerance `{other}`"))),
        }
    }
}

/// Whether the local copy of a profile matches the remote store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Synced,
    /// Written locally while the remote store was unreachable.
    LocalOnly,
    /// The remote copy changed after the local degraded write.
    Conflict,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::LocalOnly => "local_only",
            Self::Conflict => "conflict",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "synced" => Ok(Self::Synced),
            "local_only" => Ok(Self::LocalOnly),
            "conflict" => Ok(Self::Conflict),
            other => Err(DomainError::InvariantViolation(format!("unknown sync status `{other}`"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalculationHistoryItem {
    pub calculator_type: String,
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub result: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl CalculationHistoryItem {
    pub fn new(
        calculator_type: impl Into<String>,
        parameters: serde_json::Map<String, serde_json::Value>,
        result: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self { calculator_type: calculator_type.into(), parameters, result, timestamp, session_id: None }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// First numeric parameter found under any of `aliases`.
    pub fn numeric_parameter(&self, aliases: &[&str]) -> Option<f64> {
        aliases.iter().find_map(|alias| match self.parameters.get(*alias)? {
            serde_json::Value::Number(number) => number.as_f64(),
            serde_json::Value::String(raw) => raw.trim().replace(' ', "").parse().ok(),
            _ => None,
        })
    }

    pub fn string_parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name)?.as_str().filter(|value| !value.trim().is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub user_id: String,
    pub monthly_income: Option<Decimal>,
    pub credit_score: Option<u32>,
    pub employment_type: Option<String>,
    pub region: Option<String>,
    pub risk_tolerance: Option<RiskTolerance>,
    #[serde(default)]
    pub preferred_banks: Vec<String>,
    #[serde(default)]
    pub blacklisted_banks: Vec<String>,
    /// Newest first, at most [`HISTORY_LIMIT`] items.
    #[serde(default)]
    pub calculation_history: Vec<CalculationHistoryItem>,
    #[serde(default)]
    pub product_interests: Vec<ProductType>,
    pub session_count: u32,
    pub conversion_count: u32,
    pub last_active: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

impl UserProfile {
    pub fn new(draft: ProfileDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: draft.user_id,
            monthly_income: draft.monthly_income,
            credit_score: draft.credit_score,
            employment_type: draft.employment_type,
            region: draft.region,
            risk_tolerance: draft.risk_tolerance,
            preferred_banks: draft.preferred_banks,
            blacklisted_banks: draft.blacklisted_banks,
            calculation_history: Vec::new(),
            product_interests: Vec::new(),
            session_count: 1,
            conversion_count: 0,
            last_active: now,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Synced,
        }
    }

    pub fn is_preferred(&self, bank: &str) -> bool {
        self.preferred_banks.iter().any(|candidate| candidate.eq_ignore_ascii_case(bank))
    }

    pub fn is_blacklisted(&self, bank: &str) -> bool {
        self.blacklisted_banks.iter().any(|candidate| candidate.eq_ignore_ascii_case(bank))
    }

    /// Applies `patch` in place. New history items go to the front when
    /// `merge_history` is set and replace the history otherwise.
    pub fn apply(&mut self, patch: ProfilePatch, merge_history: bool) {
        if let Some(value) = patch.monthly_income {
            self.monthly_income = Some(value);
        }
        if let Some(value) = patch.credit_score {
            self.credit_score = Some(value);
        }
        if let Some(value) = patch.employment_type {
            self.employment_type = Some(value);
        }
        if let Some(value) = patch.region {
            self.region = Some(value);
        }
        if let Some(value) = patch.risk_tolerance {
            self.risk_tolerance = Some(value);
        }
        if let Some(value) = patch.preferred_banks {
            self.preferred_banks = value;
        }
        if let Some(value) = patch.blacklisted_banks {
            self.blacklisted_banks = value;
        }
        if let Some(value) = patch.product_interests {
            self.product_interests = value;
        }
        if let Some(value) = patch.conversion_count {
            self.conversion_count = value;
        }

        if let Some(mut items) = patch.calculation_history {
            items.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
            if merge_history {
                items.append(&mut self.calculation_history);
            }
            items.truncate(HISTORY_LIMIT);
            self.calculation_history = items;
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileDraft {
    pub user_id: String,
    pub monthly_income: Option<Decimal>,
    pub credit_score: Option<u32>,
    pub employment_type: Option<String>,
    pub region: Option<String>,
    pub risk_tolerance: Option<RiskTolerance>,
    #[serde(default)]
    pub preferred_banks: Vec<String>,
    #[serde(default)]
    pub blacklisted_banks: Vec<String>,
}

impl ProfileDraft {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), ..Self::default() }
    }
}

/// Partial update; `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProfilePatch {
    pub monthly_income: Option<Decimal>,
    pub credit_score: Option<u32>,
    pub employment_type: Option<String>,
    pub region: Option<String>,
    pub risk_tolerance: Option<RiskTolerance>,
    pub preferred_banks: Option<Vec<String>>,
    pub blacklisted_banks: Option<Vec<String>>,
    pub calculation_history: Option<Vec<CalculationHistoryItem>>,
    pub product_interests: Option<Vec<ProductType>>,
    pub conversion_count: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpdateOptions {
    pub merge_history: bool,
    pub increment_session: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self { merge_history: true, increment_session: false }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use super::{
        CalculationHistoryItem, ProductType, ProfileDraft, ProfilePatch, UserProfile, HISTORY_LIMIT,
    };

    fn item(calculator: &str, minutes: i64) -> CalculationHistoryItem {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("valid date");
        CalculationHistoryItem::new(calculator, serde_json::Map::new(), json!({}), base + Duration::minutes(minutes))
    }

    #[test]
    fn calculator_types_map_to_interests() {
        assert_eq!(ProductType::from_calculator("loan"), Some(ProductType::Credit));
        assert_eq!(ProductType::from_calculator("OSAGO"), Some(ProductType::Insurance));
        assert_eq!(ProductType::from_calculator("savings"), Some(ProductType::Deposit));
        assert_eq!(ProductType::from_calculator("court_fee"), None);
    }

    #[test]
    fn merged_history_is_newest_first_and_bounded() {
        let mut profile = UserProfile::new(ProfileDraft::for_user("u1"), Utc::now());
        for minute in 0..(HISTORY_LIMIT as i64 + 20) {
            profile.apply(
                ProfilePatch { calculation_history: Some(vec![item("mortgage", minute)]), ..ProfilePatch::default() },
                true,
            );
        }

        assert_eq!(profile.calculation_history.len(), HISTORY_LIMIT);
        let newest = profile.calculation_history[0].timestamp;
        let oldest = profile.calculation_history[HISTORY_LIMIT - 1].timestamp;
        assert_eq!(newest - oldest, Duration::minutes(HISTORY_LIMIT as i64 - 1));
        assert_eq!(oldest, item("x", 20).timestamp);
    }

    #[test]
    fn replacing_history_discards_previous_items() {
        let mut profile = UserProfile::new(ProfileDraft::for_user("u1"), Utc::now());
        profile.apply(ProfilePatch { calculation_history: Some(vec![item("credit", 1)]), ..ProfilePatch::default() }, true);
        profile.apply(ProfilePatch { calculation_history: Some(vec![item("deposit", 2)]), ..ProfilePatch::default() }, false);

        assert_eq!(profile.calculation_history.len(), 1);
        assert_eq!(profile.calculation_history[0].calculator_type, "deposit");
    }

    #[test]
    fn numeric_parameters_accept_aliases_and_strings() {
        let mut parameters = serde_json::Map::new();
        parameters.insert("loan_amount".to_string(), json!("1 500 000"));
        parameters.insert("months".to_string(), json!(36));
        let item = CalculationHistoryItem::new("credit", parameters, json!(null), Utc::now());

        assert_eq!(item.numeric_parameter(&["amount", "loan_amount"]), Some(1_500_000.0));
        assert_eq!(item.numeric_parameter(&["term", "months"]), Some(36.0));
        assert_eq!(item.numeric_parameter(&["sum"]), None);
    }
}
