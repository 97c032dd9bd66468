// License: GNU Affero General Public License v3 or later
// A copy of GNU AGPL v3 should have been included in this software package in LICENSE.txt.

use chrono::prelude::*;
use serde::Serialize;
use sqlx::PgPool;
use tokio::time::Instant;
use uuid::Uuid;

use super::csv_field;
use crate::Result;

/// Names of the tables as used for archive file names.
pub const FORECAST_TABLE: &str = "forecast";
pub const FORECAST_VALUE_TABLE: &str = "forecast_value";

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Forecast {
    pub forecast_uuid: Uuid,
    pub site_uuid: Uuid,
    pub timestamp_utc: NaiveDateTime,
    pub forecast_version: String,
    pub created_utc: NaiveDateTime,
}

impl Forecast {
    pub fn csv_header() -> &'static str {
        "forecast_uuid,site_uuid,timestamp_utc,forecast_version,created_utc"
    }

    pub fn to_csv(&self) -> String {
        let parts = [
            self.forecast_uuid.to_string(),
            self.site_uuid.to_string(),
            format_timestamp(&self.timestamp_utc),
            csv_field(&self.forecast_version),
            format_timestamp(&self.created_utc),
        ];
        parts.join(",")
    }

    /// Identifiers of the `limit` oldest forecasts made before `cutoff`.
    pub async fn oldest_before(
        pool: &PgPool,
        cutoff: DateTime<Utc>,
        limit: i64,
        site_uuids: Option<&[Uuid]>,
    ) -> Result<Vec<Uuid>> {
        let mut tx = pool.begin().await?;
        let ids: Vec<Uuid> = match site_uuids {
            Some(sites) => {
                sqlx::query_scalar(
                    r#"
                SELECT forecast_uuid FROM forecasts
                    WHERE timestamp_utc < $1 AND site_uuid = ANY($2)
                    ORDER BY timestamp_utc, forecast_uuid
                    LIMIT $3"#,
                )
                .bind(cutoff.naive_utc())
                .bind(sites)
                .bind(limit)
                .fetch_all(&mut *tx)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    r#"
                SELECT forecast_uuid FROM forecasts
                    WHERE timestamp_utc < $1
                    ORDER BY timestamp_utc, forecast_uuid
                    LIMIT $2"#,
                )
                .bind(cutoff.naive_utc())
                .bind(limit)
                .fetch_all(&mut *tx)
                .await?
            }
        };
        tx.commit().await?;
        Ok(ids)
    }

    /// Read both forecasts and their values for a batch in one transaction.
    pub async fn fetch_batch(
        pool: &PgPool,
        forecast_uuids: &[Uuid],
    ) -> Result<(Vec<Forecast>, Vec<ForecastValue>)> {
        let mut tx = pool.begin().await?;
        let forecasts = sqlx::query_as::<_, Forecast>(
            r#"
            SELECT forecast_uuid, site_uuid, timestamp_utc, forecast_version, created_utc
                FROM forecasts
                WHERE forecast_uuid = ANY($1)
                ORDER BY timestamp_utc, forecast_uuid"#,
        )
        .bind(forecast_uuids)
        .fetch_all(&mut *tx)
        .await?;

        let values = sqlx::query_as::<_, ForecastValue>(
            r#"
            SELECT forecast_uuid, start_utc, end_utc, horizon_minutes, forecast_power_kw, created_utc
                FROM forecast_values
                WHERE forecast_uuid = ANY($1)
                ORDER BY forecast_uuid, start_utc"#,
        )
        .bind(forecast_uuids)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok((forecasts, values))
    }

    /// Delete the forecasts and their values, values first, in one transaction.
    pub async fn delete_batch(pool: &PgPool, forecast_uuids: &[Uuid]) -> Result<DeletedCounts> {
        let mut tx = pool.begin().await?;

        tracing::debug!("Deleting forecast values for {} forecasts", forecast_uuids.len());
        let start = Instant::now();
        let values = sqlx::query("DELETE FROM forecast_values WHERE forecast_uuid = ANY($1)")
            .bind(forecast_uuids)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tracing::debug!("Done in {:?}", start.elapsed());

        tracing::debug!("Deleting {} forecasts", forecast_uuids.len());
        let start = Instant::now();
        let forecasts = sqlx::query("DELETE FROM forecasts WHERE forecast_uuid = ANY($1)")
            .bind(forecast_uuids)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tracing::debug!("Done in {:?}", start.elapsed());

        tx.commit().await?;
        Ok(DeletedCounts { forecasts, values })
    }
}

/// One archived forecast value. The synthetic `forecast_value_uuid` is never read.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ForecastValue {
    pub forecast_uuid: Uuid,
    pub start_utc: NaiveDateTime,
    pub end_utc: NaiveDateTime,
    pub horizon_minutes: i32,
    pub forecast_power_kw: f64,
    pub created_utc: NaiveDateTime,
}

impl ForecastValue {
    pub fn csv_header() -> &'static str {
        "forecast_uuid,start_utc,end_utc,horizon_minutes,forecast_power_kw,created_utc"
    }

    pub fn to_csv(&self) -> String {
        let parts = [
            self.forecast_uuid.to_string(),
            format_timestamp(&self.start_utc),
            format_timestamp(&self.end_utc),
            self.horizon_minutes.to_string(),
            self.forecast_power_kw.to_string(),
            format_timestamp(&self.created_utc),
        ];
        parts.join(",")
    }
}

impl ForecastValue {
    /// Forecast power of the given sites at one horizon, for values starting in `[start, end)`.
    pub async fn at_horizon(
        pool: &PgPool,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        site_uuids: &[Uuid],
        horizon_minutes: i32,
    ) -> Result<Vec<SitePower>> {
        let rows = sqlx::query_as::<_, SitePower>(
            r#"
            SELECT f.site_uuid, v.start_utc, v.forecast_power_kw AS power_kw
                FROM forecast_values v
                JOIN forecasts f USING (forecast_uuid)
                WHERE f.site_uuid = ANY($1)
                    AND v.horizon_minutes = $2
                    AND v.start_utc >= $3
                    AND v.start_utc < $4"#,
        )
        .bind(site_uuids)
        .bind(horizon_minutes)
        .bind(start.naive_utc())
        .bind(end.naive_utc())
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}

/// Forecast power of a site for the interval starting at `start_utc`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SitePower {
    pub site_uuid: Uuid,
    pub start_utc: NaiveDateTime,
    pub power_kw: f64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeletedCounts {
    pub forecasts: u64,
    pub values: u64,
}

/// A freshly computed forecast, ready to be inserted.
#[derive(Debug, Clone, Serialize)]
pub struct NewForecast {
    pub site_uuid: Uuid,
    pub timestamp_utc: DateTime<Utc>,
    pub forecast_version: String,
    pub values: Vec<NewForecastValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewForecastValue {
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub horizon_minutes: i32,
    pub forecast_power_kw: f64,
}

impl NewForecast {
    /// Insert the forecast and all its values in one transaction.
    pub async fn commit(&self, pool: &PgPool) -> Result<Uuid> {
        let forecast_uuid = Uuid::new_v4();
        let now = Utc::now().naive_utc();

        let mut tx = pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO forecasts (forecast_uuid, site_uuid, timestamp_utc, forecast_version, created_utc)
            VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(forecast_uuid)
        .bind(self.site_uuid)
        .bind(self.timestamp_utc.naive_utc())
        .bind(self.forecast_version.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let value_uuids: Vec<Uuid> = self.values.iter().map(|_| Uuid::new_v4()).collect();
        let starts: Vec<NaiveDateTime> =
            self.values.iter().map(|v| v.start_utc.naive_utc()).collect();
        let ends: Vec<NaiveDateTime> = self.values.iter().map(|v| v.end_utc.naive_utc()).collect();
        let horizons: Vec<i32> = self.values.iter().map(|v| v.horizon_minutes).collect();
        let powers: Vec<f64> = self.values.iter().map(|v| v.forecast_power_kw).collect();

        sqlx::query(
            r#"
            INSERT INTO forecast_values
                (forecast_value_uuid, forecast_uuid, start_utc, end_utc, horizon_minutes, forecast_power_kw, created_utc)
            SELECT v.uuid, $2, v.start_utc, v.end_utc, v.horizon, v.power, $7
                FROM UNNEST($1::uuid[], $3::timestamp[], $4::timestamp[], $5::int4[], $6::float8[])
                AS v(uuid, start_utc, end_utc, horizon, power)"#,
        )
        .bind(value_uuids)
        .bind(forecast_uuid)
        .bind(starts)
        .bind(ends)
        .bind(horizons)
        .bind(powers)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(forecast_uuid)
    }
}

fn format_timestamp(timestamp: &NaiveDateTime) -> String {
    timestamp.and_utc().to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
