use std::collections::HashSet;
use std::sync::Arc;

use fincalc_core::clock::system_clock;
use fincalc_core::profile::{LocalProfileStore, ProductType, ProfileDraft, UserProfileStore};
use fincalc_core::recommendations::{BankProductSource, CalculationContext, RecommendationEngine};
use fincalc_core::storage::LocalStorage;
use fincalc_db::repositories::{
    InMemoryBankProductRepository, InMemoryProfileRepository, InMemoryRecommendationRepository,
    SqlBankProductRepository, SqlProfileRepository, SqlRecommendationRepository,
};
use fincalc_db::{connect_with_settings, migrations, BankProductSeedDataset, DbPool};

type SeedContractTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
    ($left:expr, $right:expr, $($arg:tt)*) => {
        if $left != $right {
            return Err(format!($($arg)*));
        }
    };
}

async fn seeded_pool() -> SeedContractTestResult<DbPool> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| format!("connect: {error}"))?;
    migrations::run_pending(&pool).await.map_err(|error| format!("migrations: {error}"))?;
    BankProductSeedDataset::load(&pool).await.map_err(|error| format!("seed: {error}"))?;
    Ok(pool)
}

#[test]
fn seed_sql_covers_every_product_type() -> SeedContractTestResult {
    let fixture_sql = BankProductSeedDataset::SQL;
    let mut seen = HashSet::new();

    for product_type in ProductType::ALL {
        let quoted = format!("'{}'", product_type.as_str());
        require!(
            fixture_sql.contains(&quoted),
            "seed SQL fixture should include a {} product",
            product_type
        );
        seen.insert(product_type);
    }

    require_eq!(seen.len(), ProductType::ALL.len());
    require!(fixture_sql.contains("INSERT OR REPLACE"), "seed SQL should be repeatable");
    Ok(())
}

#[tokio::test]
async fn seeded_catalog_drives_personalized_recommendations() -> SeedContractTestResult {
    let pool = seeded_pool().await?;
    let clock = system_clock();
    let profiles = Arc::new(UserProfileStore::new(
        Arc::new(SqlProfileRepository::new(pool.clone())),
        LocalProfileStore::new(LocalStorage::in_memory()),
        clock.clone(),
    ));

    let mut draft = ProfileDraft::for_user("user-seed");
    draft.region = Some("Москва".to_string());
    draft.blacklisted_banks = vec!["Т-Банк".to_string()];
    profiles.create_user_profile(draft).await.map_err(|error| format!("create profile: {error}"))?;

    let recommendations = Arc::new(SqlRecommendationRepository::new(pool.clone()));
    let engine = RecommendationEngine::new(
        profiles,
        Arc::new(SqlBankProductRepository::new(pool.clone())),
        recommendations.clone(),
        clock,
    );

    let context = CalculationContext::new("credit").with_amount(500_000.0).with_term(36);
    let results = engine
        .get_personalized_recommendations("user-seed", &context, 5)
        .await
        .map_err(|error| format!("recommend: {error}"))?;

    let ids: Vec<_> = results.iter().map(|result| result.product.id.as_str()).collect();
    require_eq!(ids, vec!["alfa-credit-cash"], "retired and blacklisted products must be filtered");
    require!(results.iter().all(|result| (0.0..=100.0).contains(&result.score)));

    engine.flush().await;
    let stored = recommendations
        .list_for_user("user-seed", 10)
        .await
        .map_err(|error| format!("list stored: {error}"))?;
    require_eq!(stored.len(), 1, "ranking should be persisted in the background");
    require_eq!(stored[0].product_id, "alfa-credit-cash");
    require_eq!(stored[0].rank, 1);
    Ok(())
}

#[tokio::test]
async fn in_memory_repositories_rank_like_sql_ones() -> SeedContractTestResult {
    let pool = seeded_pool().await?;
    let sql_products = SqlBankProductRepository::new(pool.clone());
    let catalog = Arc::new(InMemoryBankProductRepository::default());
    for product_type in ProductType::ALL {
        let products = sql_products
            .list_active(product_type)
            .await
            .map_err(|error| format!("list {product_type}: {error}"))?;
        for product in products {
            catalog.save(product).await;
        }
    }
    for product_type in ProductType::ALL {
        let from_sql = sql_products.list_active(product_type).await.map_err(|error| error.to_string())?;
        let from_memory = catalog.list_active(product_type).await.map_err(|error| error.to_string())?;
        let sql_ids: Vec<_> = from_sql.iter().map(|product| product.id.as_str()).collect();
        let memory_ids: Vec<_> = from_memory.iter().map(|product| product.id.as_str()).collect();
        require_eq!(sql_ids, memory_ids, "listing order for {} should match", product_type);
    }

    let clock = system_clock();
    let profiles = Arc::new(UserProfileStore::new(
        Arc::new(InMemoryProfileRepository::default()),
        LocalProfileStore::new(LocalStorage::in_memory()),
        clock.clone(),
    ));
    let mut draft = ProfileDraft::for_user("user-memory");
    draft.region = Some("Москва".to_string());
    draft.blacklisted_banks = vec!["Т-Банк".to_string()];
    profiles.create_user_profile(draft).await.map_err(|error| format!("create profile: {error}"))?;

    let rankings = Arc::new(InMemoryRecommendationRepository::default());
    let engine = RecommendationEngine::new(profiles, catalog, rankings.clone(), clock);
    let context = CalculationContext::new("credit").with_amount(500_000.0).with_term(36);
    let results = engine
        .get_personalized_recommendations("user-memory", &context, 5)
        .await
        .map_err(|error| format!("recommend: {error}"))?;

    let ids: Vec<_> = results.iter().map(|result| result.product.id.as_str()).collect();
    require_eq!(ids, vec!["alfa-credit-cash"]);

    engine.flush().await;
    let stored = rankings.rankings_for("user-memory").await;
    require_eq!(stored.len(), 1, "ranking should be recorded once");
    require_eq!(stored[0].0, context);
    require_eq!(stored[0].1.len(), 1);
    Ok(())
}
