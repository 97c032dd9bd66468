// License: GNU Affero General Public License v3 or later
// A copy of GNU AGPL v3 should have been included in this software package in LICENSE.txt.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{ArchiveBatch, ForecastStore, SiteFilter};
use crate::models::forecast::{DeletedCounts, Forecast, ForecastValue, NewForecast, SitePower};
use crate::models::generation::Generation;
use crate::models::site::{Site, SiteGroup};
use crate::Result;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl ForecastStore for PgStore {
    async fn oldest_forecasts(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
        sites: &SiteFilter,
    ) -> Result<Vec<Uuid>> {
        Forecast::oldest_before(&self.pool, cutoff, limit, sites.as_slice()).await
    }

    async fn archive_batch(&self, forecast_uuids: &[Uuid]) -> Result<ArchiveBatch> {
        let (forecasts, values) = Forecast::fetch_batch(&self.pool, forecast_uuids).await?;
        Ok(ArchiveBatch { forecasts, values })
    }

    async fn delete_forecasts(&self, forecast_uuids: &[Uuid]) -> Result<DeletedCounts> {
        Forecast::delete_batch(&self.pool, forecast_uuids).await
    }

    async fn site_groups(&self) -> Result<Vec<SiteGroup>> {
        SiteGroup::all(&self.pool).await
    }

    async fn site_ids_in_country(&self, country: &str) -> Result<Vec<Uuid>> {
        Site::ids_in_country(&self.pool, country).await
    }

    async fn sites(&self) -> Result<Vec<Site>> {
        Site::all(&self.pool).await
    }

    async fn insert_forecast(&self, forecast: &NewForecast) -> Result<Uuid> {
        forecast.commit(&self.pool).await
    }

    async fn generation(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        site_uuids: &[Uuid],
    ) -> Result<Vec<Generation>> {
        Generation::in_window(&self.pool, start, end, site_uuids).await
    }

    async fn forecast_power(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        site_uuids: &[Uuid],
        horizon_minutes: i32,
    ) -> Result<Vec<SitePower>> {
        ForecastValue::at_horizon(&self.pool, start, end, site_uuids, horizon_minutes).await
    }
}
