use fincalc_core::config::{AppConfig, LoadOptions};
use serde_json::json;

use crate::commands::{current_thread_runtime, to_data, CommandResult, Failure};
use crate::wiring::fee_services;

pub fn run() -> CommandResult {
    CommandResult::from_outcome("freshness", execute())
}

fn execute() -> Result<(String, serde_json::Value), Failure> {
    let config = AppConfig::load(LoadOptions::default())
        .map_err(|error| ("config_validation", format!("configuration issue: {error}"), 2u8))?;
    let services = fee_services(&config, false)?;
    let runtime = current_thread_runtime()?;

    let integrity_ok = runtime.block_on(services.manager.validate_data_integrity());
    let freshness = services.manager.check_data_freshness();
    let cache_status = services.manager.cache_status();

    let message = match &freshness.warning_message {
        Some(warning) => warning.clone(),
        None => format!("fee data is current ({} days old)", freshness.days_since_update),
    };
    let data = json!({
        "freshness": to_data(&freshness)?,
        "cache_status": to_data(&cache_status)?,
        "offline_ready": cache_status.is_offline_ready,
        "integrity_ok": integrity_ok,
        "stored_version": services.manager.stored_version(),
    });
    Ok((message, data))
}
