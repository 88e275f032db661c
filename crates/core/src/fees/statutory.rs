//! Built-in rule tables (Tax Code of the Russian Federation, arts. 333.19,
//! 333.21, 333.36, 333.37, as amended with effect from 8 September 2024).

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::schedule::{CourtType, FeeFormula, FeeRule, FeeSchedule};

/// Version of the rule tables compiled into this build.
pub const FEE_DATA_VERSION: &str = "2024.09.08";

pub fn statutory_effective_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 8, 0, 0, 0).single().unwrap_or_else(Utc::now)
}

fn fixed(min: u64, max: Option<u64>, amount: i64, basis: &str) -> FeeRule {
    FeeRule {
        min_amount: min,
        max_amount: max,
        formula: FeeFormula::Fixed { amount: Decimal::from(amount) },
        min_fee: None,
        max_fee: None,
        legal_basis: basis.to_string(),
    }
}

fn progressive(min: u64, max: Option<u64>, base: i64, rate: Decimal, basis: &str) -> FeeRule {
    FeeRule {
        min_amount: min,
        max_amount: max,
        formula: FeeFormula::Percentage { base: Decimal::from(base), rate_percent: rate, over: min - 1 },
        min_fee: None,
        max_fee: None,
        legal_basis: basis.to_string(),
    }
}

fn general_rules() -> Vec<FeeRule> {
    const BASIS: &str = "НК РФ ст. 333.19 п. 1 пп. 1";
    let mut rules = vec![
        fixed(0, Some(100_000), 4_000, BASIS),
        progressive(100_001, Some(300_000), 4_000, Decimal::from(3), BASIS),
        progressive(300_001, Some(500_000), 10_000, Decimal::new(25, 1), BASIS),
        progressive(500_001, Some(1_000_000), 15_000, Decimal::from(2), BASIS),
        progressive(1_000_001, Some(3_000_000), 25_000, Decimal::from(1), BASIS),
        progressive(3_000_001, Some(8_000_000), 45_000, Decimal::new(7, 1), BASIS),
        progressive(8_000_001, Some(24_000_000), 80_000, Decimal::new(35, 2), BASIS),
        progressive(24_000_001, Some(50_000_000), 136_000, Decimal::new(3, 1), BASIS),
        progressive(50_000_001, Some(100_000_000), 214_000, Decimal::new(2, 1), BASIS),
        progressive(100_000_001, None, 314_000, Decimal::new(15, 2), BASIS),
    ];
    if let Some(last) = rules.last_mut() {
        last.max_fee = Some(Decimal::from(900_000));
    }
    rules
}

fn arbitration_rules() -> Vec<FeeRule> {
    const BASIS: &str = "НК РФ ст. 333.21 п. 1 пп. 1";
    let mut rules = vec![
        fixed(0, Some(100_000), 10_000, BASIS),
        progressive(100_001, Some(1_000_000), 10_000, Decimal::from(5), BASIS),
        progressive(1_000_001, Some(10_000_000), 55_000, Decimal::from(3), BASIS),
        progressive(10_000_001, Some(50_000_000), 325_000, Decimal::from(1), BASIS),
        progressive(50_000_001, None, 725_000, Decimal::new(5, 1), BASIS),
    ];
    if let Some(last) = rules.last_mut() {
        last.max_fee = Some(Decimal::from(10_000_000));
    }
    rules
}

pub fn statutory_schedule(court: CourtType) -> FeeSchedule {
    let rules = match court {
        CourtType::General => general_rules(),
        CourtType::Arbitration => arbitration_rules(),
    };
    FeeSchedule {
        court_type: court,
        version: FEE_DATA_VERSION.to_string(),
        last_updated: statutory_effective_date(),
        rules,
    }
}

/// Lowest fee a property claim can attract in the given court.
pub fn minimum_fee(court: CourtType) -> Decimal {
    match court {
        CourtType::General => Decimal::from(4_000),
        CourtType::Arbitration => Decimal::from(10_000),
    }
}

/// Single open-ended rule charging the statutory minimum. Keeps the
/// calculator usable when no real schedule can be produced.
pub fn degraded_schedule(court: CourtType) -> FeeSchedule {
    FeeSchedule {
        court_type: court,
        version: format!("{FEE_DATA_VERSION}-degraded"),
        last_updated: statutory_effective_date(),
        rules: vec![FeeRule {
            min_amount: 0,
            max_amount: None,
            formula: FeeFormula::Fixed { amount: minimum_fee(court) },
            min_fee: None,
            max_fee: None,
            legal_basis: match court {
                CourtType::General => "НК РФ ст. 333.19".to_string(),
                CourtType::Arbitration => "НК РФ ст. 333.21".to_string(),
            },
        }],
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExemptionCategory {
    pub id: String,
    pub title: String,
    pub legal_basis: String,
    pub court_types: Vec<CourtType>,
    pub full_exemption: bool,
    /// Claims above this amount pay the fee on the excess.
    pub claim_cap: Option<u64>,
}

impl ExemptionCategory {
    pub fn applies_to(&self, court: CourtType) -> bool {
        self.court_types.contains(&court)
    }
}

fn exemption(
    id: &str,
    title: &str,
    basis: &str,
    courts: &[CourtType],
    claim_cap: Option<u64>,
) -> ExemptionCategory {
    ExemptionCategory {
        id: id.to_string(),
        title: title.to_string(),
        legal_basis: basis.to_string(),
        court_types: courts.to_vec(),
        full_exemption: claim_cap.is_none(),
        claim_cap,
    }
}

pub fn statutory_exemptions(court: CourtType) -> Vec<ExemptionCategory> {
    use CourtType::{Arbitration, General};

    let all = vec![
        exemption(
            "labor_claims",
            "Employees in claims arising from employment relations",
            "НК РФ ст. 333.36 п. 1 пп. 1",
            &[General],
            None,
        ),
        exemption("alimony", "Claimants in alimony cases", "НК РФ ст. 333.36 п. 1 пп. 2", &[General], None),
        exemption(
            "health_damage",
            "Claims for compensation of harm to health",
            "НК РФ ст. 333.36 п. 1 пп. 3",
            &[General],
            None,
        ),
        exemption(
            "state_bodies",
            "State and municipal bodies acting in the public interest",
            "НК РФ ст. 333.36 п. 1 пп. 19; ст. 333.37 п. 1 пп. 1.1",
            &[General, Arbitration],
            None,
        ),
        exemption(
            "consumer_protection",
            "Consumers in consumer-protection claims",
            "НК РФ ст. 333.36 п. 2 пп. 4, п. 3",
            &[General],
            Some(1_000_000),
        ),
        exemption(
            "disability_groups_1_2",
            "Persons with disability of groups I and II",
            "НК РФ ст. 333.36 п. 2 пп. 2, п. 3",
            &[General],
            Some(1_000_000),
        ),
        exemption(
            "veterans",
            "Combat and WWII veterans",
            "НК РФ ст. 333.36 п. 2 пп. 3, п. 3",
            &[General],
            Some(1_000_000),
        ),
        exemption(
            "pension_claims",
            "Pensioners in claims against pension and social funds",
            "НК РФ ст. 333.36 п. 2 пп. 5, п. 3",
            &[General],
            Some(1_000_000),
        ),
        exemption(
            "public_organizations_of_disabled",
            "Public organizations of persons with disabilities",
            "НК РФ ст. 333.37 п. 2 пп. 2",
            &[Arbitration],
            None,
        ),
    ];

    all.into_iter().filter(|category| category.applies_to(court)).collect()
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{degraded_schedule, statutory_exemptions, statutory_schedule};
    use crate::fees::CourtType;

    #[test]
    fn statutory_schedules_are_contiguous_from_zero() {
        for court in CourtType::ALL {
            let schedule = statutory_schedule(court);
            assert!(schedule.validate().is_ok(), "{court} schedule invalid");
            assert_eq!(schedule.rules[0].min_amount, 0);
            for pair in schedule.rules.windows(2) {
                assert_eq!(pair[0].max_amount.map(|max| max + 1), Some(pair[1].min_amount));
            }
        }
    }

    #[test]
    fn general_fee_matches_published_examples() {
        let schedule = statutory_schedule(CourtType::General);
        let fee = |amount| schedule.calculate(amount).expect("covered").fee;

        assert_eq!(fee(50_000), Decimal::from(4_000));
        assert_eq!(fee(200_000), Decimal::from(7_000));
        assert_eq!(fee(1_000_000), Decimal::from(25_000));
        assert_eq!(fee(2_000_000), Decimal::from(35_000));
        assert_eq!(fee(10_000_000_000), Decimal::from(900_000));
    }

    #[test]
    fn arbitration_fee_matches_published_examples() {
        let schedule = statutory_schedule(CourtType::Arbitration);
        let fee = |amount| schedule.calculate(amount).expect("covered").fee;

        assert_eq!(fee(100_000), Decimal::from(10_000));
        assert_eq!(fee(500_000), Decimal::from(30_000));
        assert_eq!(fee(5_000_000), Decimal::from(175_000));
    }

    #[test]
    fn degraded_schedule_charges_minimum_everywhere() {
        let schedule = degraded_schedule(CourtType::General);
        assert!(schedule.is_valid());
        assert_eq!(schedule.calculate(123_456_789).expect("covered").fee, Decimal::from(4_000));
    }

    #[test]
    fn exemptions_are_filtered_by_court() {
        let arbitration = statutory_exemptions(CourtType::Arbitration);
        assert!(arbitration.iter().all(|category| category.applies_to(CourtType::Arbitration)));
        assert!(arbitration.iter().any(|category| category.id == "state_bodies"));
        assert!(!arbitration.iter().any(|category| category.id == "alimony"));
    }
}
