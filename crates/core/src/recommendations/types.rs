//! Types for the recommendation engine

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::profile::ProductType;

/// Eligibility requirements published by the bank
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductRequirements {
    /// Minimum monthly income in roubles
    pub min_income: Option<Decimal>,
    pub min_credit_score: Option<u32>,
    /// Accepted employment types; empty accepts any
    #[serde(default)]
    pub employment_types: Vec<String>,
}

impl ProductRequirements {
    pub fn accepts_employment(&self, employment_type: &str) -> bool {
        self.employment_types.is_empty()
            || self.employment_types.iter().any(|accepted| accepted.eq_ignore_ascii_case(employment_type.trim()))
    }
}

/// A partner bank product, read-only for the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankProduct {
    pub id: String,
    pub bank_name: String,
    pub product_type: ProductType,
    pub name: String,
    /// Annual rate in percent
    pub base_rate: f64,
    pub promo_rate: Option<f64>,
    /// Named one-off and yearly fees in roubles
    #[serde(default)]
    pub fees: BTreeMap<String, f64>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    /// Months
    pub min_term: Option<u32>,
    pub max_term: Option<u32>,
    #[serde(default)]
    pub requirements: ProductRequirements,
    /// Regions the product is sold in; empty means everywhere
    #[serde(default)]
    pub regions: Vec<String>,
    pub priority: i32,
    pub featured: bool,
    /// 0-5
    pub bank_rating: Option<f64>,
    pub is_partner: bool,
    pub active: bool,
}

impl BankProduct {
    /// Promotional rate when one is running, base rate otherwise
    pub fn effective_rate(&self) -> f64 {
        self.promo_rate.unwrap_or(self.base_rate)
    }

    pub fn total_fees(&self) -> f64 {
        self.fees.values().filter(|fee| fee.is_finite()).sum()
    }

    pub fn has_promo(&self) -> bool {
        self.promo_rate.is_some_and(|promo| promo != self.base_rate)
    }

    pub fn available_in(&self, region: &str) -> bool {
        self.regions.is_empty() || self.regions.iter().any(|candidate| candidate.eq_ignore_ascii_case(region))
    }
}

/// The calculation a recommendation request is made for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationContext {
    pub calculator_type: String,
    /// Requested amount in roubles
    pub amount: Option<f64>,
    /// Requested term in months
    pub term_months: Option<u32>,
}

impl CalculationContext {
    pub fn new(calculator_type: impl Into<String>) -> Self {
        Self { calculator_type: calculator_type.into(), amount: None, term_months: None }
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_term(mut self, term_months: u32) -> Self {
        self.term_months = Some(term_months);
        self
    }

    pub fn product_type(&self) -> Option<ProductType> {
        ProductType::from_calculator(&self.calculator_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationTag {
    BestRate,
    LowestFees,
    MostPopular,
    Recommended,
    Sponsored,
}

impl RecommendationTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BestRate => "best_rate",
            Self::LowestFees => "lowest_fees",
            Self::MostPopular => "most_popular",
            Self::Recommended => "recommended",
            Self::Sponsored => "sponsored",
        }
    }
}

/// Individual factor scores, each 0-100
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub rate: f64,
    pub financial_fit: f64,
    pub profile_match: f64,
    pub location: f64,
    pub popularity: f64,
    pub fees: f64,
    pub bank_rating: f64,
    pub preference: f64,
}

/// A scored product with explanation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResult {
    pub product: BankProduct,
    /// 0-100
    pub score: f64,
    /// At most three reasons, strongest first
    pub reasoning: Vec<String>,
    pub tags: Vec<RecommendationTag>,
    /// Share of applicable hard constraints satisfied, 0-100
    pub match_percentage: f64,
    /// Roubles saved over the term against the market average rate
    pub estimated_savings: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    /// Products worth taking together
    Package,
    /// A cheaper way to hold the same debt
    Optimization,
    /// A different use of the same money
    Alternative,
}

/// Suggestion spanning the results of more than one calculator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossCalculatorSuggestion {
    pub kind: SuggestionKind,
    pub title: String,
    pub description: String,
    pub product_ids: Vec<String>,
    /// Rate advantage in percentage points, where it applies
    pub rate_spread: Option<f64>,
}
