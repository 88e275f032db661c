use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use fincalc_core::errors::ApplicationError;
use fincalc_core::profile::{
    CalculationHistoryItem, ProductType, RemoteProfileStore, RiskTolerance, SyncStatus, UserProfile,
};

use super::{decode_column, from_json, parse_timestamp, to_json, RepositoryError};
use crate::DbPool;

const PROFILE_COLUMNS: &str = "id, user_id, monthly_income, credit_score, employment_type, region,
    risk_tolerance, preferred_banks_json, blacklisted_banks_json, calculation_history_json,
    product_interests_json, session_count, conversion_count, last_active, created_at, updated_at";

/// `user_profiles` table. Rows hold the synced copy, so profiles read back
/// are always [`SyncStatus::Synced`].
pub struct SqlProfileRepository {
    pool: DbPool,
}

impl SqlProfileRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, user_id: &str) -> Result<Option<UserProfile>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE user_id = ?"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_profile(r)?)),
            None => Ok(None),
        }
    }

    pub async fn create(&self, profile: &UserProfile) -> Result<UserProfile, RepositoryError> {
        let row = ProfileRow::encode(profile)?;
        sqlx::query(
            "INSERT INTO user_profiles (id, user_id, monthly_income, credit_score, employment_type,
                                        region, risk_tolerance, preferred_banks_json,
                                        blacklisted_banks_json, calculation_history_json,
                                        product_interests_json, session_count, conversion_count,
                                        last_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(profile.id.to_string())
        .bind(&profile.user_id)
        .bind(&row.monthly_income)
        .bind(profile.credit_score.map(i64::from))
        .bind(&profile.employment_type)
        .bind(&profile.region)
        .bind(profile.risk_tolerance.map(|risk| risk.as_str()))
        .bind(&row.preferred_banks)
        .bind(&row.blacklisted_banks)
        .bind(&row.calculation_history)
        .bind(&row.product_interests)
        .bind(i64::from(profile.session_count))
        .bind(i64::from(profile.conversion_count))
        .bind(profile.last_active.to_rfc3339())
        .bind(profile.created_at.to_rfc3339())
        .bind(profile.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(UserProfile { sync_status: SyncStatus::Synced, ..profile.clone() })
    }

    pub async fn save(&self, profile: &UserProfile) -> Result<UserProfile, RepositoryError> {
        let row = ProfileRow::encode(profile)?;
        let result = sqlx::query(
            "UPDATE user_profiles SET
                 monthly_income = ?,
                 credit_score = ?,
                 employment_type = ?,
                 region = ?,
                 risk_tolerance = ?,
                 preferred_banks_json = ?,
                 blacklisted_banks_json = ?,
                 calculation_history_json = ?,
                 product_interests_json = ?,
                 session_count = ?,
                 conversion_count = ?,
                 last_active = ?,
                 updated_at = ?
             WHERE user_id = ?",
        )
        .bind(&row.monthly_income)
        .bind(profile.credit_score.map(i64::from))
        .bind(&profile.employment_type)
        .bind(&profile.region)
        .bind(profile.risk_tolerance.map(|risk| risk.as_str()))
        .bind(&row.preferred_banks)
        .bind(&row.blacklisted_banks)
        .bind(&row.calculation_history)
        .bind(&row.product_interests)
        .bind(i64::from(profile.session_count))
        .bind(i64::from(profile.conversion_count))
        .bind(profile.last_active.to_rfc3339())
        .bind(profile.updated_at.to_rfc3339())
        .bind(&profile.user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("user profile `{}`", profile.user_id)));
        }
        Ok(UserProfile { sync_status: SyncStatus::Synced, ..profile.clone() })
    }
}

struct ProfileRow {
    monthly_income: Option<String>,
    preferred_banks: String,
    blacklisted_banks: String,
    calculation_history: String,
    product_interests: String,
}

impl ProfileRow {
    fn encode(profile: &UserProfile) -> Result<Self, RepositoryError> {
        Ok(Self {
            monthly_income: profile.monthly_income.map(|income| income.to_string()),
            preferred_banks: to_json(&profile.preferred_banks)?,
            blacklisted_banks: to_json(&profile.blacklisted_banks)?,
            calculation_history: to_json(&profile.calculation_history)?,
            product_interests: to_json(&profile.product_interests)?,
        })
    }
}

fn row_to_profile(row: &sqlx::sqlite::SqliteRow) -> Result<UserProfile, RepositoryError> {
    let id: String = decode_column(row, "id")?;
    let monthly_income: Option<String> = decode_column(row, "monthly_income")?;
    let credit_score: Option<i64> = decode_column(row, "credit_score")?;
    let risk_tolerance: Option<String> = decode_column(row, "risk_tolerance")?;
    let preferred_banks: String = decode_column(row, "preferred_banks_json")?;
    let blacklisted_banks: String = decode_column(row, "blacklisted_banks_json")?;
    let calculation_history: String = decode_column(row, "calculation_history_json")?;
    let product_interests: String = decode_column(row, "product_interests_json")?;
    let session_count: i64 = decode_column(row, "session_count")?;
    let conversion_count: i64 = decode_column(row, "conversion_count")?;
    let last_active: String = decode_column(row, "last_active")?;
    let created_at: String = decode_column(row, "created_at")?;
    let updated_at: String = decode_column(row, "updated_at")?;

    let monthly_income = monthly_income
        .map(|raw| {
            Decimal::from_str(&raw)
                .map_err(|error| RepositoryError::Decode(format!("monthly_income: {error}")))
        })
        .transpose()?;
    let risk_tolerance = risk_tolerance
        .map(|raw| {
            RiskTolerance::from_str(&raw)
                .map_err(|error| RepositoryError::Decode(format!("risk_tolerance: {error}")))
        })
        .transpose()?;

    Ok(UserProfile {
        id: Uuid::parse_str(&id).map_err(|error| RepositoryError::Decode(format!("id: {error}")))?,
        user_id: decode_column(row, "user_id")?,
        monthly_income,
        credit_score: credit_score.and_then(|score| u32::try_from(score).ok()),
        employment_type: decode_column(row, "employment_type")?,
        region: decode_column(row, "region")?,
        risk_tolerance,
        preferred_banks: from_json("preferred_banks_json", &preferred_banks)?,
        blacklisted_banks: from_json("blacklisted_banks_json", &blacklisted_banks)?,
        calculation_history: from_json::<Vec<CalculationHistoryItem>>(
            "calculation_history_json",
            &calculation_history,
        )?,
        product_interests: from_json::<Vec<ProductType>>("product_interests_json", &product_interests)?,
        session_count: u32::try_from(session_count).unwrap_or(0),
        conversion_count: u32::try_from(conversion_count).unwrap_or(0),
        last_active: parse_timestamp("last_active", &last_active)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
        sync_status: SyncStatus::Synced,
    })
}

#[async_trait]
impl RemoteProfileStore for SqlProfileRepository {
    async fn find_by_user_id(&self, user_id: &str) -> Result<Option<UserProfile>, ApplicationError> {
        Ok(self.find(user_id).await?)
    }

    async fn insert(&self, profile: &UserProfile) -> Result<UserProfile, ApplicationError> {
        Ok(self.create(profile).await?)
    }

    async fn update(&self, profile: &UserProfile) -> Result<UserProfile, ApplicationError> {
        Ok(self.save(profile).await?)
    }
}
