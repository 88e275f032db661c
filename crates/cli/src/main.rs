use std::process::ExitCode;

use anyhow::{anyhow, Result};
use fincalc_core::config::{AppConfig, LoadOptions};

/// Logs go to stderr so stdout carries only the command's JSON envelope.
fn init_logging(config: &AppConfig) -> Result<()> {
    use fincalc_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    }
    .map_err(|error| anyhow!("failed to install log subscriber: {error}"))
}

fn main() -> ExitCode {
    // Commands report configuration problems themselves; logging falls back
    // to defaults so that report still gets printed.
    let config = AppConfig::load(LoadOptions::default()).unwrap_or_default();
    if let Err(error) = init_logging(&config) {
        eprintln!("{error}");
    }

    fincalc_cli::run()
}
