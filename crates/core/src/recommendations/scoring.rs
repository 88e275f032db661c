//! Scoring algorithms for bank product recommendations

use rust_decimal::prelude::ToPrimitive;

use super::types::*;
use crate::profile::{ProductType, RiskTolerance, UserBehaviorAnalysis, UserProfile};

/// Weights for scoring components
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    /// Rate competitiveness (default: 0.25)
    pub rate: f64,
    /// Amount, term, income and credit score fit (default: 0.20)
    pub financial_fit: f64,
    /// Declared interests, risk tolerance and engagement (default: 0.15)
    pub profile_match: f64,
    /// Regional availability (default: 0.10)
    pub location: f64,
    /// Featured and priority flags (default: 0.10)
    pub popularity: f64,
    /// Fee level (default: 0.10)
    pub fees: f64,
    /// Bank rating (default: 0.05)
    pub bank_rating: f64,
    /// Preferred or blacklisted bank (default: 0.05)
    pub preference: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        super::DEFAULT_WEIGHTS
    }
}

/// Assumed market rate range in percent, `None` where rates are not comparable
pub fn market_range(product_type: ProductType) -> Option<(f64, f64)> {
    match product_type {
        ProductType::Credit => Some((5.0, 30.0)),
        ProductType::Mortgage => Some((3.0, 20.0)),
        ProductType::Card => Some((10.0, 40.0)),
        ProductType::Refinancing => Some((5.0, 25.0)),
        ProductType::Deposit => Some((2.0, 20.0)),
        ProductType::Insurance => None,
    }
}

/// Everything the factors are computed from
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    pub product: &'a BankProduct,
    pub profile: &'a UserProfile,
    pub behavior: &'a UserBehaviorAnalysis,
    pub context: &'a CalculationContext,
}

impl ScoringInput<'_> {
    fn user_region(&self) -> Option<&str> {
        self.profile.region.as_deref().or(self.behavior.preferred_region.as_deref())
    }
}

/// Score calculator for bank products
#[derive(Debug, Clone)]
pub struct ScoreCalculator {
    weights: ScoringWeights,
}

impl ScoreCalculator {
    pub fn new() -> Self {
        Self { weights: ScoringWeights::default() }
    }

    pub fn with_weights(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn component_scores(&self, input: &ScoringInput<'_>) -> ComponentScores {
        ComponentScores {
            rate: self.rate_score(input.product),
            financial_fit: self.financial_fit_score(input),
            profile_match: self.profile_match_score(input),
            location: self.location_score(input),
            popularity: self.popularity_score(input.product),
            fees: self.fees_score(input.product),
            bank_rating: self.bank_rating_score(input.product),
            preference: self.preference_score(input.product, input.profile),
        }
    }

    /// Weighted sum of the components, clamped to 0-100
    pub fn calculate_total_score(&self, scores: &ComponentScores) -> f64 {
        let total = scores.rate * self.weights.rate
            + scores.financial_fit * self.weights.financial_fit
            + scores.profile_match * self.weights.profile_match
            + scores.location * self.weights.location
            + scores.popularity * self.weights.popularity
            + scores.fees * self.weights.fees
            + scores.bank_rating * self.weights.bank_rating
            + scores.preference * self.weights.preference;

        if total.is_nan() {
            return 0.0;
        }
        total.clamp(0.0, 100.0)
    }

    pub fn calculate_recommendation_score(&self, input: &ScoringInput<'_>) -> f64 {
        self.calculate_total_score(&self.component_scores(input))
    }

    /// Position of the effective rate within the market range. Lower is
    /// better for loans, higher for deposits.
    pub fn rate_score(&self, product: &BankProduct) -> f64 {
        let Some((low, high)) = market_range(product.product_type) else {
            return 50.0;
        };
        let rate = product.effective_rate();
        let position = if product.product_type.is_loan() {
            (high - rate) / (high - low)
        } else {
            (rate - low) / (high - low)
        };
        bounded(position * 100.0)
    }

    /// Mean of the per-dimension match ratios. Outside a range the ratio
    /// shrinks with the distance; with nothing to compare the fit is neutral.
    pub fn financial_fit_score(&self, input: &ScoringInput<'_>) -> f64 {
        let product = input.product;
        let mut ratios = Vec::new();

        if let Some(amount) = input.context.amount {
            if product.min_amount.is_some() || product.max_amount.is_some() {
                ratios.push(range_ratio(amount, product.min_amount, product.max_amount));
            }
        }
        if let Some(term) = input.context.term_months {
            if product.min_term.is_some() || product.max_term.is_some() {
                ratios.push(range_ratio(
                    f64::from(term),
                    product.min_term.map(f64::from),
                    product.max_term.map(f64::from),
                ));
            }
        }
        if let (Some(required), Some(income)) =
            (product.requirements.min_income, input.profile.monthly_income)
        {
            ratios.push(at_least_ratio(decimal(income), decimal(required)));
        }
        if let (Some(required), Some(score)) =
            (product.requirements.min_credit_score, input.profile.credit_score)
        {
            ratios.push(at_least_ratio(f64::from(score), f64::from(required)));
        }
        if let Some(employment) = input.profile.employment_type.as_deref() {
            if !product.requirements.employment_types.is_empty() {
                let accepted = product.requirements.accepts_employment(employment);
                ratios.push(if accepted { 1.0 } else { 0.0 });
            }
        }

        if ratios.is_empty() {
            return 50.0;
        }
        bounded(ratios.iter().sum::<f64>() / ratios.len() as f64 * 100.0)
    }

    pub fn profile_match_score(&self, input: &ScoringInput<'_>) -> f64 {
        let product = input.product;
        let mut parts = Vec::with_capacity(3);

        parts.push(if input.profile.product_interests.contains(&product.product_type) { 100.0 } else { 0.0 });

        if let Some(tolerance) = input.profile.risk_tolerance {
            let rate = product.effective_rate();
            let loan = product.product_type.is_loan();
            parts.push(match tolerance {
                RiskTolerance::Low if !loan => 100.0,
                RiskTolerance::Low if rate <= 10.0 => 80.0,
                RiskTolerance::Low => 40.0,
                RiskTolerance::Medium if !loan || rate <= 20.0 => 80.0,
                RiskTolerance::Medium => 50.0,
                RiskTolerance::High if loan => 100.0,
                RiskTolerance::High => 70.0,
            });
        }

        let mut engagement = input.behavior.engagement_score;
        if input.behavior.calculation_frequency > 1.0 {
            engagement += 10.0;
        }
        parts.push(bounded(engagement));

        bounded(parts.iter().sum::<f64>() / parts.len() as f64)
    }

    pub fn location_score(&self, input: &ScoringInput<'_>) -> f64 {
        let Some(region) = input.user_region() else {
            return 50.0;
        };
        if input.product.available_in(region) {
            return 100.0;
        }
        let served_before = input
            .profile
            .calculation_history
            .iter()
            .filter_map(|item| item.string_parameter("region"))
            .any(|visited| input.product.available_in(visited));
        if served_before {
            70.0
        } else {
            20.0
        }
    }

    pub fn popularity_score(&self, product: &BankProduct) -> f64 {
        let mut score: f64 = 50.0;
        if product.featured {
            score += 30.0;
        }
        if product.priority > 50 {
            score += 20.0;
        }
        score.min(100.0)
    }

    pub fn fees_score(&self, product: &BankProduct) -> f64 {
        let fees = product.total_fees();
        if fees <= 0.0 {
            100.0
        } else if fees < 1_000.0 {
            90.0
        } else if fees < 5_000.0 {
            70.0
        } else if fees < 10_000.0 {
            50.0
        } else {
            30.0
        }
    }

    pub fn bank_rating_score(&self, product: &BankProduct) -> f64 {
        match product.bank_rating {
            Some(rating) if rating.is_finite() => rating.clamp(0.0, 5.0) / 5.0 * 100.0,
            _ => 50.0,
        }
    }

    pub fn preference_score(&self, product: &BankProduct, profile: &UserProfile) -> f64 {
        if profile.is_blacklisted(&product.bank_name) {
            0.0
        } else if profile.is_preferred(&product.bank_name) {
            100.0
        } else {
            50.0
        }
    }

    /// Up to three reasons in a fixed order of strength
    pub fn generate_reasoning(&self, input: &ScoringInput<'_>, scores: &ComponentScores) -> Vec<String> {
        let product = input.product;
        let mut reasons = Vec::new();

        if scores.rate >= 70.0 {
            reasons.push(format!("Rate {:.1}% is better than the market average", product.effective_rate()));
        }
        if input.profile.product_interests.contains(&product.product_type) {
            reasons.push(format!("Matches your interest in {} products", product.product_type));
        }
        if input.user_region().is_some() && scores.location >= 100.0 {
            reasons.push("Available in your region".to_string());
        }
        if let Some(rating) = product.bank_rating.filter(|rating| *rating >= 4.0) {
            reasons.push(format!("Highly rated bank ({rating:.1}/5)"));
        }
        let fees = product.total_fees();
        if fees <= 0.0 {
            reasons.push("No fees".to_string());
        } else if fees < 1_000.0 {
            reasons.push("Low fees".to_string());
        }
        if product.featured {
            reasons.push("Featured offer".to_string());
        }
        if let Some(promo) = product.promo_rate.filter(|_| product.has_promo()) {
            reasons.push(format!("Promotional rate {promo:.1}% instead of {:.1}%", product.base_rate));
        }

        if reasons.is_empty() {
            reasons.push("Matches your calculation parameters".to_string());
        }
        reasons.truncate(super::MAX_REASONS);
        reasons
    }

    pub fn generate_tags(&self, product: &BankProduct, score: f64) -> Vec<RecommendationTag> {
        let mut tags = Vec::new();
        if product.effective_rate() < 8.0 {
            tags.push(RecommendationTag::BestRate);
        }
        if product.total_fees() < 1_000.0 {
            tags.push(RecommendationTag::LowestFees);
        }
        if product.featured {
            tags.push(RecommendationTag::MostPopular);
        }
        if score >= 80.0 {
            tags.push(RecommendationTag::Recommended);
        }
        if product.is_partner {
            tags.push(RecommendationTag::Sponsored);
        }
        tags
    }

    /// Percentage of the hard constraints (amount, term, income, employment
    /// and region) that apply and are met; 100 when none apply.
    pub fn match_percentage(&self, input: &ScoringInput<'_>) -> f64 {
        let product = input.product;
        let mut checks = Vec::new();

        if let Some(amount) = input.context.amount {
            if product.min_amount.is_some() || product.max_amount.is_some() {
                checks.push(within(amount, product.min_amount, product.max_amount));
            }
        }
        if let Some(term) = input.context.term_months {
            if product.min_term.is_some() || product.max_term.is_some() {
                checks.push(within(
                    f64::from(term),
                    product.min_term.map(f64::from),
                    product.max_term.map(f64::from),
                ));
            }
        }
        if let (Some(required), Some(income)) =
            (product.requirements.min_income, input.profile.monthly_income)
        {
            checks.push(income >= required);
        }
        if let Some(employment) = input.profile.employment_type.as_deref() {
            if !product.requirements.employment_types.is_empty() {
                checks.push(product.requirements.accepts_employment(employment));
            }
        }
        if let Some(region) = input.user_region() {
            checks.push(product.available_in(region));
        }

        if checks.is_empty() {
            return 100.0;
        }
        let met = checks.iter().filter(|met| **met).count();
        met as f64 / checks.len() as f64 * 100.0
    }

    /// Interest saved against the market average rate over the requested
    /// term, for loans with a known amount and term.
    pub fn estimated_savings(&self, product: &BankProduct, context: &CalculationContext) -> Option<f64> {
        if !product.product_type.is_loan() {
            return None;
        }
        let (low, high) = market_range(product.product_type)?;
        let amount = context.amount?;
        let term = context.term_months?;

        let average = (low + high) / 2.0;
        let savings = (average - product.effective_rate()) / 100.0 * amount * f64::from(term) / 12.0;
        (savings > 0.0).then(|| savings.round())
    }

    pub fn score_product(&self, input: &ScoringInput<'_>) -> RecommendationResult {
        let scores = self.component_scores(input);
        let score = self.calculate_total_score(&scores);

        RecommendationResult {
            product: input.product.clone(),
            score,
            reasoning: self.generate_reasoning(input, &scores),
            tags: self.generate_tags(input.product, score),
            match_percentage: self.match_percentage(input),
            estimated_savings: self.estimated_savings(input.product, input.context),
        }
    }
}

impl Default for ScoreCalculator {
    fn default() -> Self {
        Self::new()
    }
}

fn bounded(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

fn decimal(value: rust_decimal::Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn within(value: f64, min: Option<f64>, max: Option<f64>) -> bool {
    min.map_or(true, |min| value >= min) && max.map_or(true, |max| value <= max)
}

/// 1.0 inside the range, proportionally less outside it.
fn range_ratio(value: f64, min: Option<f64>, max: Option<f64>) -> f64 {
    match (min, max) {
        (Some(min), _) if value < min => at_least_ratio(value, min),
        (_, Some(max)) if value > max => {
            if value <= 0.0 {
                0.0
            } else {
                (max / value).clamp(0.0, 1.0)
            }
        }
        _ => 1.0,
    }
}

fn at_least_ratio(value: f64, required: f64) -> f64 {
    if required <= 0.0 || value >= required {
        1.0
    } else {
        (value / required).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;
    use crate::profile::{analyze_user_behavior, ProfileDraft};

    fn product(id: &str, product_type: ProductType, rate: f64, fee: f64) -> BankProduct {
        let mut fees = BTreeMap::new();
        if fee > 0.0 {
            fees.insert("issuance".to_string(), fee);
        }
        BankProduct {
            id: id.to_string(),
            bank_name: format!("Bank {id}"),
            product_type,
            name: format!("Product {id}"),
            base_rate: rate,
            promo_rate: None,
            fees,
            min_amount: Some(50_000.0),
            max_amount: Some(5_000_000.0),
            min_term: Some(6),
            max_term: Some(84),
            requirements: ProductRequirements::default(),
            regions: Vec::new(),
            priority: 10,
            featured: false,
            bank_rating: None,
            is_partner: false,
            active: true,
        }
    }

    fn score(calculator: &ScoreCalculator, product: &BankProduct, profile: &UserProfile, context: &CalculationContext) -> f64 {
        let behavior = analyze_user_behavior(profile, Utc::now());
        calculator.calculate_recommendation_score(&ScoringInput { product, profile, behavior: &behavior, context })
    }

    #[test]
    fn cheaper_credit_outscores_expensive_one() {
        let calculator = ScoreCalculator::new();
        let profile = UserProfile::new(ProfileDraft::for_user("u1"), Utc::now());
        let context = CalculationContext::new("credit").with_amount(300_000.0).with_term(24);

        let a = product("a", ProductType::Credit, 6.0, 0.0);
        let b = product("b", ProductType::Credit, 15.0, 8_000.0);

        assert!(score(&calculator, &a, &profile, &context) > score(&calculator, &b, &profile, &context));
    }

    #[test]
    fn rate_direction_depends_on_product_type() {
        let calculator = ScoreCalculator::new();
        assert_eq!(calculator.rate_score(&product("l", ProductType::Credit, 5.0, 0.0)), 100.0);
        assert_eq!(calculator.rate_score(&product("l", ProductType::Credit, 35.0, 0.0)), 0.0);
        assert_eq!(calculator.rate_score(&product("d", ProductType::Deposit, 20.0, 0.0)), 100.0);
        assert_eq!(calculator.rate_score(&product("i", ProductType::Insurance, 1.0, 0.0)), 50.0);
    }

    #[test]
    fn scores_stay_within_bounds_for_extreme_inputs() {
        let calculator = ScoreCalculator::new();
        let mut profile = UserProfile::new(ProfileDraft::for_user("u1"), Utc::now());
        profile.monthly_income = Some(Decimal::ZERO);
        profile.credit_score = Some(0);
        profile.region = Some("Tomsk".to_string());
        profile.risk_tolerance = Some(RiskTolerance::Low);

        for rate in [-50.0, 0.0, 7.5, 99.0, f64::INFINITY] {
            for fee in [0.0, 999.0, 1e12] {
                for product_type in ProductType::ALL {
                    let mut candidate = product("x", product_type, rate, fee);
                    candidate.requirements.min_income = Some(Decimal::from(200_000));
                    candidate.requirements.min_credit_score = Some(700);
                    candidate.regions = vec!["Moscow".to_string()];
                    candidate.bank_rating = Some(9.0);
                    candidate.featured = true;
                    candidate.priority = 90;
                    for amount in [0.0, 1.0, 1e10] {
                        let context = CalculationContext::new("credit").with_amount(amount).with_term(600);
                        let value = score(&calculator, &candidate, &profile, &context);
                        assert!((0.0..=100.0).contains(&value), "score {value} out of bounds");
                    }
                }
            }
        }
    }

    #[test]
    fn partial_credit_for_shortfall() {
        let calculator = ScoreCalculator::new();
        let profile = UserProfile::new(ProfileDraft::for_user("u1"), Utc::now());
        let behavior = analyze_user_behavior(&profile, Utc::now());
        let candidate = product("a", ProductType::Credit, 10.0, 0.0);
        let context = CalculationContext::new("credit").with_amount(25_000.0).with_term(12);

        let fit = calculator.financial_fit_score(&ScoringInput {
            product: &candidate,
            profile: &profile,
            behavior: &behavior,
            context: &context,
        });
        // amount at half the minimum, term inside the range
        assert!((fit - 75.0).abs() < 1e-9);
    }

    #[test]
    fn reasoning_is_limited_to_three_and_tags_follow_triggers() {
        let calculator = ScoreCalculator::new();
        let mut profile = UserProfile::new(ProfileDraft::for_user("u1"), Utc::now());
        profile.product_interests = vec![ProductType::Credit];
        profile.region = Some("Moscow".to_string());
        let behavior = analyze_user_behavior(&profile, Utc::now());

        let mut candidate = product("a", ProductType::Credit, 6.5, 0.0);
        candidate.bank_rating = Some(4.6);
        candidate.featured = true;
        candidate.is_partner = true;
        let context = CalculationContext::new("credit").with_amount(300_000.0).with_term(24);
        let input = ScoringInput { product: &candidate, profile: &profile, behavior: &behavior, context: &context };

        let result = calculator.score_product(&input);
        assert_eq!(result.reasoning.len(), 3);
        assert!(result.reasoning[0].starts_with("Rate 6.5%"));
        assert!(result.tags.contains(&RecommendationTag::BestRate));
        assert!(result.tags.contains(&RecommendationTag::LowestFees));
        assert!(result.tags.contains(&RecommendationTag::MostPopular));
        assert!(result.tags.contains(&RecommendationTag::Sponsored));
        assert_eq!(result.match_percentage, 100.0);
        // (17.5 - 6.5)% of 300 000 over two years
        assert_eq!(result.estimated_savings, Some(66_000.0));
    }

    #[test]
    fn match_percentage_counts_failed_constraints() {
        let calculator = ScoreCalculator::new();
        let mut profile = UserProfile::new(ProfileDraft::for_user("u1"), Utc::now());
        profile.region = Some("Omsk".to_string());
        profile.monthly_income = Some(Decimal::from(40_000));
        let behavior = analyze_user_behavior(&profile, Utc::now());

        let mut candidate = product("a", ProductType::Mortgage, 9.0, 0.0);
        candidate.regions = vec!["Moscow".to_string()];
        candidate.requirements.min_income = Some(Decimal::from(80_000));
        let context = CalculationContext::new("mortgage").with_amount(1_000_000.0).with_term(240);
        let input = ScoringInput { product: &candidate, profile: &profile, behavior: &behavior, context: &context };

        // amount ok, term too long, income short, region not served
        assert_eq!(calculator.match_percentage(&input), 25.0);
        assert_eq!(calculator.location_score(&input), 20.0);
    }

    #[test]
    fn employment_requirement_is_a_hard_constraint() {
        let calculator = ScoreCalculator::new();
        let mut profile = UserProfile::new(ProfileDraft::for_user("u1"), Utc::now());
        profile.employment_type = Some("self_employed".to_string());
        let behavior = analyze_user_behavior(&profile, Utc::now());
        let context = CalculationContext::new("credit");

        let mut salaried_only = product("a", ProductType::Credit, 15.0, 0.0);
        salaried_only.requirements.employment_types = vec!["employed".to_string()];
        let input = ScoringInput { product: &salaried_only, profile: &profile, behavior: &behavior, context: &context };
        assert_eq!(calculator.match_percentage(&input), 0.0);
        assert_eq!(calculator.financial_fit_score(&input), 0.0);

        let mut open = product("b", ProductType::Credit, 15.0, 0.0);
        open.requirements.employment_types = vec!["employed".to_string(), "Self_Employed".to_string()];
        let input = ScoringInput { product: &open, profile: &profile, behavior: &behavior, context: &context };
        assert_eq!(calculator.match_percentage(&input), 100.0);
        assert_eq!(calculator.financial_fit_score(&input), 100.0);

        profile.employment_type = None;
        let input = ScoringInput { product: &salaried_only, profile: &profile, behavior: &behavior, context: &context };
        assert_eq!(calculator.match_percentage(&input), 100.0);
    }

    #[test]
    fn blacklisted_bank_gets_no_preference() {
        let calculator = ScoreCalculator::new();
        let mut profile = UserProfile::new(ProfileDraft::for_user("u1"), Utc::now());
        profile.blacklisted_banks = vec!["bank a".to_string()];
        profile.preferred_banks = vec!["Bank b".to_string()];

        assert_eq!(calculator.preference_score(&product("a", ProductType::Card, 20.0, 0.0), &profile), 0.0);
        assert_eq!(calculator.preference_score(&product("b", ProductType::Card, 20.0, 0.0), &profile), 100.0);
        assert_eq!(calculator.preference_score(&product("c", ProductType::Card, 20.0, 0.0), &profile), 50.0);
    }
}
