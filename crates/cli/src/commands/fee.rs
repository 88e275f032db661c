use fincalc_core::cache::RefreshScheduler;
use fincalc_core::config::{AppConfig, LoadOptions};
use fincalc_core::errors::DomainError;
use fincalc_core::fees::CourtType;
use serde_json::json;

use crate::commands::{
    application_failure, current_thread_runtime, to_data, CommandResult, Failure,
};
use crate::wiring::fee_services;

pub fn run(court: &str, amount: u64, offline: bool) -> CommandResult {
    CommandResult::from_outcome("fee", execute(court, amount, offline))
}

fn execute(court: &str, amount: u64, offline: bool) -> Result<(String, serde_json::Value), Failure> {
    let config = AppConfig::load(LoadOptions::default())
        .map_err(|error| ("config_validation", format!("configuration issue: {error}"), 2u8))?;
    let court: CourtType = court
        .parse()
        .map_err(|error: DomainError| ("invalid_input", error.to_string(), 2u8))?;

    let services = fee_services(&config, offline)?;
    let runtime = current_thread_runtime()?;

    runtime.block_on(async {
        let calculation = services
            .manager
            .calculate_fee(court, amount)
            .await
            .map_err(|error| application_failure("fee", error.into()))?;

        let refreshed = if services.manager.is_online() {
            let scheduler = RefreshScheduler::new(services.cache.clone(), services.manager.clone());
            scheduler.run_once().await.refreshed
        } else {
            0
        };

        let freshness = services.manager.check_data_freshness();
        let message = format!("{} court fee for {} RUB: {} RUB", court, amount, calculation.fee);
        let data = json!({
            "calculation": to_data(&calculation)?,
            "freshness": to_data(&freshness)?,
            "online": services.manager.is_online(),
            "refreshed_entries": refreshed,
        });
        Ok((message, data))
    })
}

#[cfg(test)]
mod tests {
    use super::execute;

    #[test]
    fn unknown_court_is_rejected_before_calculation() {
        let Err((class, message, exit_code)) = execute("supreme", 10_000, true) else {
            panic!("unknown court should fail");
        };
        assert_eq!(exit_code, 2);
        assert!(class == "invalid_input" || class == "config_validation", "{class}: {message}");
    }
}
