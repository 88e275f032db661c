//! Remote reference-data endpoint for fee schedules.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::schedule::{CourtType, FeeFormula, FeeRule, FeeSchedule};

#[derive(Debug, Error)]
pub enum ScheduleSourceError {
    #[error("remote schedule source is not configured")]
    NotConfigured,
    #[error("remote request failed: {0}")]
    Transport(String),
    #[error("remote returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("remote returned no data for `{0}`")]
    Empty(String),
    #[error("remote payload is invalid: {0}")]
    InvalidPayload(String),
}

#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn fetch_schedule(&self, court: CourtType) -> Result<FeeSchedule, ScheduleSourceError>;
    async fn latest_version(&self) -> Result<String, ScheduleSourceError>;
}

/// Source used when no endpoint is configured; every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredSource;

#[async_trait]
impl ScheduleSource for UnconfiguredSource {
    async fn fetch_schedule(&self, _court: CourtType) -> Result<FeeSchedule, ScheduleSourceError> {
        Err(ScheduleSourceError::NotConfigured)
    }

    async fn latest_version(&self) -> Result<String, ScheduleSourceError> {
        Err(ScheduleSourceError::NotConfigured)
    }
}

/// Row shape of the `fee_schedules` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeeScheduleRow {
    pub court_type: CourtType,
    pub version: String,
    pub updated_at: DateTime<Utc>,
    pub min_amount: u64,
    pub max_amount: Option<u64>,
    pub fixed_amount: Option<Decimal>,
    pub base_amount: Option<Decimal>,
    pub rate_percent: Option<Decimal>,
    pub min_fee: Option<Decimal>,
    pub max_fee: Option<Decimal>,
    pub legal_basis: String,
}

#[derive(Clone, Debug, Deserialize)]
struct VersionRow {
    version: String,
}

/// Converts table rows into a schedule. Rows may arrive in any order.
pub fn schedule_from_rows(
    court: CourtType,
    mut rows: Vec<FeeScheduleRow>,
) -> Result<FeeSchedule, ScheduleSourceError> {
    rows.retain(|row| row.court_type == court);
    if rows.is_empty() {
        return Err(ScheduleSourceError::Empty(court.to_string()));
    }
    rows.sort_by_key(|row| row.min_amount);

    let version = rows
        .iter()
        .map(|row| row.version.clone())
        .max()
        .unwrap_or_default();
    let last_updated = rows.iter().map(|row| row.updated_at).max().unwrap_or_else(Utc::now);

    let rules = rows
        .into_iter()
        .map(|row| {
            let formula = match (row.fixed_amount, row.base_amount, row.rate_percent) {
                (Some(amount), _, None) => FeeFormula::Fixed { amount },
                (_, base, Some(rate_percent)) => FeeFormula::Percentage {
                    base: base.unwrap_or(Decimal::ZERO),
                    rate_percent,
                    over: row.min_amount.saturating_sub(1),
                },
                _ => {
                    return Err(ScheduleSourceError::InvalidPayload(format!(
                        "rule starting at {} has neither fixed amount nor rate",
                        row.min_amount
                    )))
                }
            };
            Ok(FeeRule {
                min_amount: row.min_amount,
                max_amount: row.max_amount,
                formula,
                min_fee: row.min_fee,
                max_fee: row.max_fee,
                legal_basis: row.legal_basis,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FeeSchedule { court_type: court, version, last_updated, rules })
}

/// REST client for a PostgREST-style endpoint exposing `fee_schedules` and
/// `fee_schedule_versions`.
pub struct HttpScheduleSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpScheduleSource {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ScheduleSourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ScheduleSourceError::Transport(error.to_string()))?;
        Ok(Self { client, base_url: base_url.into().trim_end_matches('/').to_string(), api_key })
    }

    async fn get_rows<T: for<'de> Deserialize<'de>>(
        &self,
        path_and_query: &str,
    ) -> Result<Vec<T>, ScheduleSourceError> {
        let url = format!("{}/rest/v1/{path_and_query}", self.base_url);
        let mut request = self.client.get(&url).header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            let key = key.expose_secret();
            request = request.header("apikey", key).bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|error| ScheduleSourceError::Transport(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ScheduleSourceError::Status { status: status.as_u16(), message });
        }

        response
            .json::<Vec<T>>()
            .await
            .map_err(|error| ScheduleSourceError::InvalidPayload(error.to_string()))
    }
}

#[async_trait]
impl ScheduleSource for HttpScheduleSource {
    async fn fetch_schedule(&self, court: CourtType) -> Result<FeeSchedule, ScheduleSourceError> {
        let rows: Vec<FeeScheduleRow> = self
            .get_rows(&format!("fee_schedules?court_type=eq.{court}&order=min_amount.asc"))
            .await?;
        schedule_from_rows(court, rows)
    }

    async fn latest_version(&self) -> Result<String, ScheduleSourceError> {
        let rows: Vec<VersionRow> = self
            .get_rows("fee_schedule_versions?select=version&order=published_at.desc&limit=1")
            .await?;
        rows.into_iter()
            .next()
            .map(|row| row.version)
            .ok_or_else(|| ScheduleSourceError::Empty("fee_schedule_versions".to_string()))
    }
}
