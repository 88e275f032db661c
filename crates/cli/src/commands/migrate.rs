use crate::commands::{current_thread_runtime, CommandResult, Failure};
use fincalc_core::config::{AppConfig, LoadOptions};
use fincalc_db::{connect_with_settings, migrations};

pub fn run() -> CommandResult {
    match execute() {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}

fn execute() -> Result<(), Failure> {
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
        pool.close().await;
        Ok(())
    })
}
