use std::str::FromStr;

use async_trait::async_trait;

use fincalc_core::errors::ApplicationError;
use fincalc_core::profile::ProductType;
use fincalc_core::recommendations::{BankProduct, BankProductSource};

use super::{decode_column, from_json, to_json, RepositoryError};
use crate::DbPool;

const PRODUCT_COLUMNS: &str = "id, bank_name, product_type, name, base_rate, promo_rate, fees_json,
    min_amount, max_amount, min_term, max_term, requirements_json, regions_json, priority,
    featured, bank_rating, is_partner, active";

pub struct SqlBankProductRepository {
    pool: DbPool,
}

impl SqlBankProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<BankProduct>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM bank_products WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_product(r)?)),
            None => Ok(None),
        }
    }

    /// Active products of one type, highest priority first.
    pub async fn list_by_type(
        &self,
        product_type: ProductType,
    ) -> Result<Vec<BankProduct>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM bank_products
             WHERE product_type = ? AND active = 1
             ORDER BY priority DESC, id ASC"
        ))
        .bind(product_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_product).collect::<Result<Vec<_>, _>>()
    }

    pub async fn count(&self) -> Result<i64, RepositoryError> {
        Ok(sqlx::query_scalar("SELECT COUNT(1) FROM bank_products").fetch_one(&self.pool).await?)
    }

    pub async fn save(&self, product: &BankProduct) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO bank_products (id, bank_name, product_type, name, base_rate, promo_rate,
                                        fees_json, min_amount, max_amount, min_term, max_term,
                                        requirements_json, regions_json, priority, featured,
                                        bank_rating, is_partner, active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 bank_name = excluded.bank_name,
                 product_type = excluded.product_type,
                 name = excluded.name,
                 base_rate = excluded.base_rate,
                 promo_rate = excluded.promo_rate,
                 fees_json = excluded.fees_json,
                 min_amount = excluded.min_amount,
                 max_amount = excluded.max_amount,
                 min_term = excluded.min_term,
                 max_term = excluded.max_term,
                 requirements_json = excluded.requirements_json,
                 regions_json = excluded.regions_json,
                 priority = excluded.priority,
                 featured = excluded.featured,
                 bank_rating = excluded.bank_rating,
                 is_partner = excluded.is_partner,
                 active = excluded.active",
        )
        .bind(&product.id)
        .bind(&product.bank_name)
        .bind(product.product_type.as_str())
        .bind(&product.name)
        .bind(product.base_rate)
        .bind(product.promo_rate)
        .bind(to_json(&product.fees)?)
        .bind(product.min_amount)
        .bind(product.max_amount)
        .bind(product.min_term.map(i64::from))
        .bind(product.max_term.map(i64::from))
        .bind(to_json(&product.requirements)?)
        .bind(to_json(&product.regions)?)
        .bind(i64::from(product.priority))
        .bind(product.featured)
        .bind(product.bank_rating)
        .bind(product.is_partner)
        .bind(product.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> Result<BankProduct, RepositoryError> {
    let product_type: String = decode_column(row, "product_type")?;
    let fees: String = decode_column(row, "fees_json")?;
    let requirements: String = decode_column(row, "requirements_json")?;
    let regions: String = decode_column(row, "regions_json")?;
    let min_term: Option<i64> = decode_column(row, "min_term")?;
    let max_term: Option<i64> = decode_column(row, "max_term")?;
    let priority: i64 = decode_column(row, "priority")?;

    Ok(BankProduct {
        id: decode_column(row, "id")?,
        bank_name: decode_column(row, "bank_name")?,
        product_type: ProductType::from_str(&product_type)
            .map_err(|error| RepositoryError::Decode(format!("product_type: {error}")))?,
        name: decode_column(row, "name")?,
        base_rate: decode_column(row, "base_rate")?,
        promo_rate: decode_column(row, "promo_rate")?,
        fees: from_json("fees_json", &fees)?,
        min_amount: decode_column(row, "min_amount")?,
        max_amount: decode_column(row, "max_amount")?,
        min_term: min_term.and_then(|term| u32::try_from(term).ok()),
        max_term: max_term.and_then(|term| u32::try_from(term).ok()),
        requirements: from_json("requirements_json", &requirements)?,
        regions: from_json("regions_json", &regions)?,
        priority: i32::try_from(priority)
            .map_err(|error| RepositoryError::Decode(format!("priority: {error}")))?,
        featured: decode_column(row, "featured")?,
        bank_rating: decode_column(row, "bank_rating")?,
        is_partner: decode_column(row, "is_partner")?,
        active: decode_column(row, "active")?,
    })
}

#[async_trait]
impl BankProductSource for SqlBankProductRepository {
    async fn list_active(&self, product_type: ProductType) -> Result<Vec<BankProduct>, ApplicationError> {
        Ok(self.list_by_type(product_type).await?)
    }
}
