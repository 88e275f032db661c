use serde::Serialize;
use sqlx::Executor;

use fincalc_core::profile::ProductType;

use crate::connection::DbPool;
use crate::repositories::{RepositoryError, SqlBankProductRepository};

/// Seed contract: product id, type and whether it is offered.
const SEED_PRODUCTS: &[SeedProductContract] = &[
    SeedProductContract { id: "sber-mortgage-family", product_type: ProductType::Mortgage, active: true },
    SeedProductContract { id: "vtb-mortgage-secondary", product_type: ProductType::Mortgage, active: true },
    SeedProductContract {
        id: "uralsib-mortgage-bashkortostan",
        product_type: ProductType::Mortgage,
        active: true,
    },
    SeedProductContract { id: "alfa-credit-cash", product_type: ProductType::Credit, active: true },
    SeedProductContract { id: "tbank-credit-online", product_type: ProductType::Credit, active: true },
    SeedProductContract { id: "otkritie-credit-legacy", product_type: ProductType::Credit, active: false },
    SeedProductContract { id: "alfa-refinancing", product_type: ProductType::Refinancing, active: true },
    SeedProductContract { id: "sber-deposit-best", product_type: ProductType::Deposit, active: true },
    SeedProductContract { id: "vtb-deposit-savings", product_type: ProductType::Deposit, active: true },
    SeedProductContract {
        id: "sber-insurance-property",
        product_type: ProductType::Insurance,
        active: true,
    },
    SeedProductContract { id: "tbank-card-platinum", product_type: ProductType::Card, active: true },
];

struct SeedProductContract {
    id: &'static str,
    product_type: ProductType,
    active: bool,
}

/// Partner bank catalog for local runs.
///
/// Covers every product type, one retired product and one product limited
/// to a single region, so recommendation filters have something to act on.
pub struct BankProductSeedDataset;

impl BankProductSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/bank_products.sql");

    /// Loads the catalog. Rows with the same ids are replaced.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult { products_seeded: SEED_PRODUCTS.iter().map(|product| product.id).collect() })
    }

    /// Checks that every seeded product decodes with its contracted type and
    /// activity flag.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let repository = SqlBankProductRepository::new(pool.clone());
        let mut checks = Vec::with_capacity(SEED_PRODUCTS.len());

        for contract in SEED_PRODUCTS {
            let matches = repository.find_by_id(contract.id).await?.is_some_and(|product| {
                product.product_type == contract.product_type && product.active == contract.active
            });
            checks.push((contract.id, matches));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SeedResult {
    pub products_seeded: Vec<&'static str>,
}

#[derive(Clone, Debug, Serialize)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
