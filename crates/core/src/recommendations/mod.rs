//! Partner bank product recommendations
//!
//! Scores candidate products against a user profile and the calculation the
//! user just made, explains the ranking, and derives suggestions spanning
//! several calculators.

mod cross;
mod engine;
mod scoring;
mod types;

pub use cross::{cross_calculator_suggestions, EARLY_REPAYMENT_SPREAD, REFINANCING_SPREAD};
pub use engine::{BankProductSource, RecommendationEngine, RecommendationSink};
pub use scoring::{market_range, ScoreCalculator, ScoringInput, ScoringWeights};
pub use types::*;

/// Default scoring weights
pub const DEFAULT_WEIGHTS: ScoringWeights = ScoringWeights {
    rate: 0.25,
    financial_fit: 0.20,
    profile_match: 0.15,
    location: 0.10,
    popularity: 0.10,
    fees: 0.10,
    bank_rating: 0.05,
    preference: 0.05,
};

/// Maximum reasons attached to a result
pub const MAX_REASONS: usize = 3;

/// Results returned when the caller does not ask for a specific number
pub const DEFAULT_LIMIT: usize = 5;
