pub mod commands;
mod wiring;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::recommend::RecommendArgs;

#[derive(Debug, Parser)]
#[command(
    name = "fincalc",
    about = "Financial calculator backend CLI",
    long_about = "Operate the calculator backend: migrations, the bank product catalog, court fee data and personalized recommendations.",
    after_help = "Examples:\n  fincalc doctor --json\n  fincalc fee --court general --amount 50000\n  fincalc recommend --user demo --calculator mortgage --amount 5000000 --term 240"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the bank product catalog and verify every seeded product")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, database connectivity, remote endpoint and cache medium")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Calculate a court filing fee for a claim amount")]
    Fee {
        #[arg(long, help = "Court type: general or arbitration")]
        court: String,
        #[arg(long, help = "Claim amount in whole roubles")]
        amount: u64,
        #[arg(long, help = "Skip the remote schedule source")]
        offline: bool,
    },
    #[command(about = "Report fee data freshness, cache coverage and integrity")]
    Freshness,
    #[command(about = "Cache the statutory fee tables for offline use")]
    Preload,
    #[command(about = "Rank bank products for a user and calculator")]
    Recommend {
        #[arg(long = "user")]
        user_id: String,
        #[arg(long, help = "Calculator type, e.g. mortgage, credit, deposit")]
        calculator: String,
        #[arg(long)]
        amount: Option<f64>,
        #[arg(long = "term", help = "Term in months")]
        term_months: Option<u32>,
        #[arg(long, help = "Maximum number of products (defaults to recommendations.default_limit)")]
        limit: Option<usize>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Fee { court, amount, offline } => commands::fee::run(&court, amount, offline),
        Command::Freshness => commands::freshness::run(),
        Command::Preload => commands::preload::run(),
        Command::Recommend { user_id, calculator, amount, term_months, limit } => {
            commands::recommend::run(RecommendArgs { user_id, calculator, amount, term_months, limit })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
