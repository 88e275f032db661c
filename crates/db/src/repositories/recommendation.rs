use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use fincalc_core::errors::ApplicationError;
use fincalc_core::recommendations::{
    CalculationContext, RecommendationResult, RecommendationSink, RecommendationTag,
};

use super::{decode_column, from_json, parse_timestamp, to_json, RepositoryError};
use crate::DbPool;

/// One ranked product as written to `user_recommendations`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoredRecommendation {
    pub id: String,
    pub user_id: String,
    pub calculator_type: String,
    pub product_id: String,
    pub rank: u32,
    pub score: f64,
    pub match_percentage: f64,
    pub estimated_savings: Option<f64>,
    pub reasoning: Vec<String>,
    pub tags: Vec<RecommendationTag>,
    pub created_at: DateTime<Utc>,
}

pub struct SqlRecommendationRepository {
    pool: DbPool,
}

impl SqlRecommendationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Writes a whole ranking in one transaction, rank 1 first.
    pub async fn save_ranking(
        &self,
        user_id: &str,
        context: &CalculationContext,
        results: &[RecommendationResult],
    ) -> Result<usize, RepositoryError> {
        let created_at = Utc::now().to_rfc3339();
        let context_json = to_json(context)?;
        let mut tx = self.pool.begin().await?;

        for (index, result) in results.iter().enumerate() {
            sqlx::query(
                "INSERT INTO user_recommendations (id, user_id, calculator_type, product_id, rank,
                                                   score, match_percentage, estimated_savings,
                                                   reasoning_json, tags_json, context_json, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(user_id)
            .bind(&context.calculator_type)
            .bind(&result.product.id)
            .bind(index as i64 + 1)
            .bind(result.score)
            .bind(result.match_percentage)
            .bind(result.estimated_savings)
            .bind(to_json(&result.reasoning)?)
            .bind(to_json(&result.tags)?)
            .bind(&context_json)
            .bind(&created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(results.len())
    }

    /// Most recent rankings for a user, newest first and in rank order
    /// within one ranking.
    pub async fn list_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredRecommendation>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, user_id, calculator_type, product_id, rank, score, match_percentage,
                    estimated_savings, reasoning_json, tags_json, created_at
             FROM user_recommendations
             WHERE user_id = ?
             ORDER BY created_at DESC, rank ASC
             LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_recommendation).collect::<Result<Vec<_>, _>>()
    }
}

fn row_to_recommendation(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<StoredRecommendation, RepositoryError> {
    let rank: i64 = decode_column(row, "rank")?;
    let reasoning: String = decode_column(row, "reasoning_json")?;
    let tags: String = decode_column(row, "tags_json")?;
    let created_at: String = decode_column(row, "created_at")?;

    Ok(StoredRecommendation {
        id: decode_column(row, "id")?,
        user_id: decode_column(row, "user_id")?,
        calculator_type: decode_column(row, "calculator_type")?,
        product_id: decode_column(row, "product_id")?,
        rank: u32::try_from(rank).map_err(|error| RepositoryError::Decode(format!("rank: {error}")))?,
        score: decode_column(row, "score")?,
        match_percentage: decode_column(row, "match_percentage")?,
        estimated_savings: decode_column(row, "estimated_savings")?,
        reasoning: from_json("reasoning_json", &reasoning)?,
        tags: from_json("tags_json", &tags)?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

#[async_trait]
impl RecommendationSink for SqlRecommendationRepository {
    async fn record(
        &self,
        user_id: &str,
        context: &CalculationContext,
        results: &[RecommendationResult],
    ) -> Result<(), ApplicationError> {
        self.save_ranking(user_id, context, results).await?;
        Ok(())
    }
}
