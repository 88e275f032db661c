use crate::commands::{current_thread_runtime, CommandResult, Failure};
use fincalc_core::config::{AppConfig, LoadOptions};
use fincalc_db::{connect_with_settings, migrations, BankProductSeedDataset};
use serde_json::json;

pub fn run() -> CommandResult {
    CommandResult::from_outcome("seed", execute())
}

fn execute() -> Result<(String, serde_json::Value), Failure> {
    let config = AppConfig::load(LoadOptions::default())
        .map_err(|error| ("config_validation", format!("configuration issue: {error}"), 2u8))?;
    let runtime = current_thread_runtime()?;

    runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seed_result = BankProductSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = BankProductSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
        pool.close().await;

        if !verification.all_present {
            return Err(("seed_verification", verification_failure_message(&verification.checks), 6u8));
        }

        let message = format!(
            "bank product catalog loaded ({} products)",
            seed_result.products_seeded.len()
        );
        Ok((message, json!({ "products": seed_result.products_seeded })))
    })
}

fn verification_failure_message(checks: &[(&str, bool)]) -> String {
    let failed_checks = checks
        .iter()
        .filter_map(|(check, passed)| (!passed).then_some(*check))
        .collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for products: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::verification_failure_message;

    #[test]
    fn verification_error_message_targets_failed_checks() {
        let checks = [
            ("sber-mortgage-family", true),
            ("alfa-credit-cash", false),
            ("otkritie-credit-legacy", false),
        ];

        assert_eq!(
            verification_failure_message(&checks),
            "Seed verification failed for products: alfa-credit-cash, otkritie-credit-legacy"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        let checks = [("sber-deposit-best", true), ("tbank-card-platinum", true)];
        assert_eq!(verification_failure_message(&checks), "Some seed data failed to load");
    }
}
