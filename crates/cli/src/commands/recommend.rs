use fincalc_core::config::{AppConfig, LoadOptions};
use fincalc_core::recommendations::CalculationContext;
use fincalc_db::{connect_with_settings, migrations};
use serde_json::json;

use crate::commands::{
    application_failure, current_thread_runtime, to_data, CommandResult, Failure,
};
use crate::wiring::recommendation_engine;

#[derive(Clone, Debug, Default)]
pub struct RecommendArgs {
    pub user_id: String,
    pub calculator: String,
    pub amount: Option<f64>,
    pub term_months: Option<u32>,
    pub limit: Option<usize>,
}

pub fn run(args: RecommendArgs) -> CommandResult {
    CommandResult::from_outcome("recommend", execute(args))
}

fn execute(args: RecommendArgs) -> Result<(String, serde_json::Value), Failure> {
    let config = AppConfig::load(LoadOptions::default())
        .map_err(|error| ("config_validation", format!("configuration issue: {error}"), 2u8))?;
    let limit = args.limit.unwrap_or(config.recommendations.default_limit);
    if limit == 0 {
        return Err(("invalid_input", "--limit must be at least 1".to_string(), 2));
    }

    let mut context = CalculationContext::new(args.calculator.trim());
    if let Some(amount) = args.amount {
        context = context.with_amount(amount);
    }
    if let Some(term_months) = args.term_months {
        context = context.with_term(term_months);
    }
    if context.product_type().is_none() {
        return Err((
            "invalid_input",
            format!("calculator `{}` has no matching product type", context.calculator_type),
            2,
        ));
    }

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

        let engine = recommendation_engine(&config, &pool)?;
        let outcome = engine.get_personalized_recommendations(&args.user_id, &context, limit).await;
        let cross = match &outcome {
            Ok(_) => engine.get_cross_calculator_recommendations(&args.user_id, &context).await,
            Err(_) => Ok(Vec::new()),
        };
        engine.flush().await;
        pool.close().await;

        let results = outcome.map_err(|error| application_failure("recommend", error))?;
        let suggestions = cross.map_err(|error| application_failure("recommend", error))?;
        let message = match results.first() {
            Some(top) => format!(
                "{} recommendations for {}; top pick {} ({:.1})",
                results.len(),
                args.user_id,
                top.product.id,
                top.score
            ),
            None => format!("no matching products for {}", args.user_id),
        };
        let data = json!({
            "context": to_data(&context)?,
            "recommendations": to_data(&results)?,
            "cross_calculator_suggestions": to_data(&suggestions)?,
        });
        Ok((message, data))
    })
}
