//! Suggestions derived from the top results of several calculators

use super::types::*;
use crate::profile::ProductType;

/// Minimum gap between a credit rate and the best refinancing rate, in
/// percentage points, before refinancing is suggested.
pub const REFINANCING_SPREAD: f64 = 2.0;
/// Minimum gap between a loan rate and a deposit rate before early
/// repayment is suggested over saving.
pub const EARLY_REPAYMENT_SPREAD: f64 = 3.0;

fn top_of(results: &[RecommendationResult], product_type: ProductType) -> Option<&BankProduct> {
    results
        .iter()
        .filter(|result| result.product.product_type == product_type)
        .max_by(|left, right| left.score.partial_cmp(&right.score).unwrap_or(std::cmp::Ordering::Equal))
        .map(|result| &result.product)
}

/// Pairwise rules over the best product per type found in `results`.
pub fn cross_calculator_suggestions(results: &[RecommendationResult]) -> Vec<CrossCalculatorSuggestion> {
    let mortgage = top_of(results, ProductType::Mortgage);
    let credit = top_of(results, ProductType::Credit);
    let deposit = top_of(results, ProductType::Deposit);
    let insurance = top_of(results, ProductType::Insurance);
    let refinancing = top_of(results, ProductType::Refinancing);

    let mut suggestions = Vec::new();

    if let (Some(mortgage), Some(insurance)) = (mortgage, insurance) {
        suggestions.push(CrossCalculatorSuggestion {
            kind: SuggestionKind::Package,
            title: "Mortgage with property and life insurance".to_string(),
            description: format!(
                "Taking {} together with {} usually keeps the mortgage rate from being raised for missing cover.",
                mortgage.name, insurance.name
            ),
            product_ids: vec![mortgage.id.clone(), insurance.id.clone()],
            rate_spread: None,
        });
    }

    if let (Some(credit), Some(deposit)) = (credit, deposit) {
        suggestions.push(CrossCalculatorSuggestion {
            kind: SuggestionKind::Package,
            title: "Credit and deposit in one bank".to_string(),
            description: format!(
                "{} and {} can be serviced together, which simplifies repayments from savings.",
                credit.name, deposit.name
            ),
            product_ids: vec![credit.id.clone(), deposit.id.clone()],
            rate_spread: None,
        });
    }

    if let (Some(credit), Some(refinancing)) = (credit, refinancing) {
        let spread = credit.effective_rate() - refinancing.effective_rate();
        if spread >= REFINANCING_SPREAD {
            suggestions.push(CrossCalculatorSuggestion {
                kind: SuggestionKind::Optimization,
                title: "Refinance to a lower rate".to_string(),
                description: format!(
                    "{} at {:.1}% would replace a rate of {:.1}%.",
                    refinancing.name,
                    refinancing.effective_rate(),
                    credit.effective_rate()
                ),
                product_ids: vec![credit.id.clone(), refinancing.id.clone()],
                rate_spread: Some(spread),
            });
        }
    }

    if let (Some(credit), Some(deposit)) = (credit, deposit) {
        let spread = credit.effective_rate() - deposit.effective_rate();
        if spread >= EARLY_REPAYMENT_SPREAD {
            suggestions.push(CrossCalculatorSuggestion {
                kind: SuggestionKind::Alternative,
                title: "Repay early instead of saving".to_string(),
                description: format!(
                    "The loan costs {spread:.1} points more than {} earns; spare money does more repaying debt.",
                    deposit.name
                ),
                product_ids: vec![credit.id.clone(), deposit.id.clone()],
                rate_spread: Some(spread),
            });
        }
    }

    suggestions
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::cross_calculator_suggestions;
    use crate::profile::ProductType;
    use crate::recommendations::{BankProduct, ProductRequirements, RecommendationResult, SuggestionKind};

    fn result(id: &str, product_type: ProductType, rate: f64, score: f64) -> RecommendationResult {
        RecommendationResult {
            product: BankProduct {
                id: id.to_string(),
                bank_name: "Bank".to_string(),
                product_type,
                name: id.to_string(),
                base_rate: rate,
                promo_rate: None,
                fees: BTreeMap::new(),
                min_amount: None,
                max_amount: None,
                min_term: None,
                max_term: None,
                requirements: ProductRequirements::default(),
                regions: Vec::new(),
                priority: 0,
                featured: false,
                bank_rating: None,
                is_partner: true,
                active: true,
            },
            score,
            reasoning: Vec::new(),
            tags: Vec::new(),
            match_percentage: 100.0,
            estimated_savings: None,
        }
    }

    #[test]
    fn packages_need_both_products() {
        let suggestions = cross_calculator_suggestions(&[
            result("m1", ProductType::Mortgage, 12.0, 70.0),
            result("i1", ProductType::Insurance, 0.0, 60.0),
        ]);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].kind, SuggestionKind::Package);
        assert_eq!(suggestions[0].product_ids, vec!["m1", "i1"]);

        assert!(cross_calculator_suggestions(&[result("m1", ProductType::Mortgage, 12.0, 70.0)]).is_empty());
    }

    #[test]
    fn spread_thresholds_gate_optimizations_and_alternatives() {
        let wide = cross_calculator_suggestions(&[
            result("c1", ProductType::Credit, 19.0, 80.0),
            result("c2", ProductType::Credit, 25.0, 40.0),
            result("r1", ProductType::Refinancing, 16.5, 75.0),
            result("d1", ProductType::Deposit, 15.0, 70.0),
        ]);
        let kinds: Vec<_> = wide.iter().map(|suggestion| suggestion.kind).collect();
        assert_eq!(kinds, vec![SuggestionKind::Package, SuggestionKind::Optimization, SuggestionKind::Alternative]);
        assert_eq!(wide[1].rate_spread, Some(2.5));
        assert_eq!(wide[1].product_ids, vec!["c1", "r1"]);

        let narrow = cross_calculator_suggestions(&[
            result("c1", ProductType::Credit, 17.0, 80.0),
            result("r1", ProductType::Refinancing, 15.5, 75.0),
            result("d1", ProductType::Deposit, 15.0, 70.0),
        ]);
        assert_eq!(narrow.len(), 1);
        assert_eq!(narrow[0].kind, SuggestionKind::Package);
    }
}
