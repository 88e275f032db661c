use fincalc_core::config::{AppConfig, LoadOptions};
use serde_json::json;

use crate::commands::{to_data, CommandResult, Failure};
use crate::wiring::fee_services;

/// Writes the statutory tables into the configured cache medium so later
/// runs can calculate fees offline.
pub fn run() -> CommandResult {
    CommandResult::from_outcome("preload", execute())
}

fn execute() -> Result<(String, serde_json::Value), Failure> {
    let config = AppConfig::load(LoadOptions::default())
        .map_err(|error| ("config_validation", format!("configuration issue: {error}"), 2u8))?;
    let services = fee_services(&config, true)?;

    let written = services.manager.preload_offline_data();
    let cache_status = services.manager.cache_status();
    let message = if cache_status.is_offline_ready {
        format!("offline fee data ready ({written} entries written)")
    } else {
        format!("offline fee data incomplete ({written} entries written)")
    };

    let data = json!({
        "entries_written": written,
        "cache_status": to_data(&cache_status)?,
        "persistent": config.cache.medium_path.is_some(),
    });
    Ok((message, data))
}
