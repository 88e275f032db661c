use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourtType {
    /// Courts of general jurisdiction and magistrates.
    General,
    Arbitration,
}

impl CourtType {
    pub const ALL: [CourtType; 2] = [CourtType::General, CourtType::Arbitration];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Arbitration => "arbitration",
        }
    }
}

impl fmt::Display for CourtType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CourtType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(Self::General),
            "arbitration" => Ok(Self::Arbitration),
            other => Err(DomainError::InvariantViolation(format!(
                "unsupported court type `{other}` (expected general|arbitration)"
            ))),
        }
    }
}

/// How the fee is derived from the claim amount inside a rule's range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeeFormula {
    Fixed { amount: Decimal },
    /// `base + rate_percent% * (claim - over)`.
    Percentage { base: Decimal, rate_percent: Decimal, over: u64 },
}

impl FeeFormula {
    pub fn apply(&self, claim_amount: u64) -> Decimal {
        match self {
            Self::Fixed { amount } => *amount,
            Self::Percentage { base, rate_percent, over } => {
                let excess = Decimal::from(claim_amount.saturating_sub(*over));
                *base + excess * *rate_percent / Decimal::ONE_HUNDRED
            }
        }
    }
}

/// Amounts are whole roubles; `max_amount` is inclusive and `None` on the
/// open-ended last rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRule {
    pub min_amount: u64,
    pub max_amount: Option<u64>,
    pub formula: FeeFormula,
    pub min_fee: Option<Decimal>,
    pub max_fee: Option<Decimal>,
    pub legal_basis: String,
}

impl FeeRule {
    pub fn covers(&self, amount: u64) -> bool {
        amount >= self.min_amount && self.max_amount.map_or(true, |max| amount <= max)
    }

    pub fn fee_for(&self, amount: u64) -> Decimal {
        let mut fee = self.formula.apply(amount);
        if let Some(min_fee) = self.min_fee {
            fee = fee.max(min_fee);
        }
        if let Some(max_fee) = self.max_fee {
            fee = fee.min(max_fee);
        }
        fee.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub court_type: CourtType,
    pub version: String,
    pub last_updated: DateTime<Utc>,
    pub rules: Vec<FeeRule>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeCalculation {
    pub court_type: CourtType,
    pub claim_amount: u64,
    pub fee: Decimal,
    pub rule_index: usize,
    pub legal_basis: String,
    pub schedule_version: String,
}

impl FeeSchedule {
    /// Checks that rules start at zero, are ordered, contiguous in whole
    /// roubles and that only the last rule is open-ended.
    pub fn validate(&self) -> Result<(), DomainError> {
        let invalid = |reason: String| DomainError::InvalidFeeSchedule { court: self.court_type, reason };

        let Some(first) = self.rules.first() else {
            return Err(invalid("schedule has no rules".to_string()));
        };
        if first.min_amount != 0 {
            return Err(invalid(format!("first rule starts at {} instead of 0", first.min_amount)));
        }

        for (index, rule) in self.rules.iter().enumerate() {
            if let Some(max) = rule.max_amount {
                if max < rule.min_amount {
                    return Err(invalid(format!(
                        "rule {index} has max {max} below min {}",
                        rule.min_amount
                    )));
                }
            }
            if let (Some(min_fee), Some(max_fee)) = (rule.min_fee, rule.max_fee) {
                if min_fee > max_fee {
                    return Err(invalid(format!("rule {index} has min fee above max fee")));
                }
            }
        }

        for (index, pair) in self.rules.windows(2).enumerate() {
            let (previous, next) = (&pair[0], &pair[1]);
            let Some(previous_max) = previous.max_amount else {
                return Err(invalid(format!("rule {index} is open-ended but is not the last rule")));
            };
            if previous_max.checked_add(1) != Some(next.min_amount) {
                return Err(invalid(format!(
                    "gap or overlap between rule {index} (max {previous_max}) and rule {} (min {})",
                    index + 1,
                    next.min_amount
                )));
            }
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn rule_for(&self, amount: u64) -> Option<(usize, &FeeRule)> {
        self.rules.iter().enumerate().find(|(_, rule)| rule.covers(amount))
    }

    pub fn calculate(&self, claim_amount: u64) -> Result<FeeCalculation, DomainError> {
        let (rule_index, rule) = self
            .rule_for(claim_amount)
            .ok_or(DomainError::UncoveredAmount { court: self.court_type, amount: claim_amount })?;

        Ok(FeeCalculation {
            court_type: self.court_type,
            claim_amount,
            fee: rule.fee_for(claim_amount),
            rule_index,
            legal_basis: rule.legal_basis.clone(),
            schedule_version: self.version.clone(),
        })
    }
}
