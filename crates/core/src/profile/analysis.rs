use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::{ProductType, UserProfile};

pub const AMOUNT_ALIASES: [&str; 6] =
    ["amount", "loan_amount", "credit_amount", "property_price", "deposit_amount", "sum"];
pub const TERM_ALIASES: [&str; 4] = ["term", "loan_term", "months", "period"];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UserBehaviorAnalysis {
    /// Most used first.
    pub primary_interests: Vec<ProductType>,
    pub average_amount: Option<f64>,
    pub average_term: Option<f64>,
    pub preferred_region: Option<String>,
    /// Calculations per day over the span of the history.
    pub calculation_frequency: f64,
    /// 0-100.
    pub engagement_score: f64,
}

pub fn analyze_user_behavior(profile: &UserProfile, now: DateTime<Utc>) -> UserBehaviorAnalysis {
    let history = &profile.calculation_history;

    UserBehaviorAnalysis {
        primary_interests: primary_interests(profile),
        average_amount: mean(history.iter().filter_map(|item| item.numeric_parameter(&AMOUNT_ALIASES))),
        average_term: mean(history.iter().filter_map(|item| item.numeric_parameter(&TERM_ALIASES))),
        preferred_region: preferred_region(profile),
        calculation_frequency: calculation_frequency(profile),
        engagement_score: engagement_score(profile, now),
    }
}

/// Interests ranked by how often the matching calculators were used; ties
/// keep the order of most recent use.
fn primary_interests(profile: &UserProfile) -> Vec<ProductType> {
    let mut ranked: Vec<(ProductType, usize)> = Vec::new();
    for item in &profile.calculation_history {
        let Some(product) = ProductType::from_calculator(&item.calculator_type) else {
            continue;
        };
        match ranked.iter_mut().find(|(candidate, _)| *candidate == product) {
            Some((_, count)) => *count += 1,
            None => ranked.push((product, 1)),
        }
    }
    ranked.sort_by(|left, right| right.1.cmp(&left.1));
    ranked.into_iter().map(|(product, _)| product).collect()
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn preferred_region(profile: &UserProfile) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for region in profile.calculation_history.iter().filter_map(|item| item.string_parameter("region")) {
        let count = counts.entry(region).or_insert(0);
        if *count == 0 {
            order.push(region);
        }
        *count += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for region in order {
        let count = counts.get(region).copied().unwrap_or(0);
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((region, count));
        }
    }
    best.map(|(region, _)| region.to_string()).or_else(|| profile.region.clone())
}

/// Zero below two data points. The span is floored at one day, so a burst
/// of calculations within a single day reports the raw count.
fn calculation_frequency(profile: &UserProfile) -> f64 {
    let history = &profile.calculation_history;
    if history.len() < 2 {
        return 0.0;
    }
    let newest = history.iter().map(|item| item.timestamp).max();
    let oldest = history.iter().map(|item| item.timestamp).min();
    let (Some(newest), Some(oldest)) = (newest, oldest) else {
        return 0.0;
    };
    let span_days = (newest - oldest).num_milliseconds() as f64 / 86_400_000.0;
    history.len() as f64 / span_days.max(1.0)
}

fn engagement_score(profile: &UserProfile, now: DateTime<Utc>) -> f64 {
    let history = (profile.calculation_history.len() as f64 * 3.0).min(30.0);
    let sessions = (f64::from(profile.session_count) * 2.0).min(20.0);
    let distinct: BTreeSet<&str> =
        profile.calculation_history.iter().map(|item| item.calculator_type.as_str()).collect();
    let variety = (distinct.len() as f64 * 5.0).min(20.0);

    let idle_days = (now - profile.last_active).num_days();
    let recency = match idle_days {
        days if days < 1 => 15.0,
        days if days < 7 => 10.0,
        days if days < 30 => 5.0,
        _ => 0.0,
    };
    let conversions = (f64::from(profile.conversion_count) * 5.0).min(15.0);

    (history + sessions + variety + recency + conversions).clamp(0.0, 100.0)
}
