// License: GNU Affero General Public License v3 or later
// A copy of GNU AGPL v3 should have been included in this software package in LICENSE.txt.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::forecast::{DeletedCounts, Forecast, ForecastValue, NewForecast, SitePower};
use crate::models::generation::Generation;
use crate::models::site::{Site, SiteGroup};
use crate::Result;

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::PgStore;

/// Which sites a purge pass looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteFilter {
    All,
    Sites(Vec<Uuid>),
}

impl SiteFilter {
    pub fn as_slice(&self) -> Option<&[Uuid]> {
        match self {
            Self::All => None,
            Self::Sites(sites) => Some(sites),
        }
    }
}

/// Rows of one batch as they get written to the archive.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ArchiveBatch {
    pub forecasts: Vec<Forecast>,
    pub values: Vec<ForecastValue>,
}

/// Everything the cleanup, forecast and evaluate commands need from the database.
///
/// Every method runs in its own short transaction, no transaction outlives a call.
#[async_trait]
pub trait ForecastStore: Send + Sync {
    /// Up to `limit` forecast ids with a timestamp before `cutoff`, oldest first.
    async fn oldest_forecasts(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
        sites: &SiteFilter,
    ) -> Result<Vec<Uuid>>;

    async fn archive_batch(&self, forecast_uuids: &[Uuid]) -> Result<ArchiveBatch>;

    /// Delete values, then forecasts, atomically.
    async fn delete_forecasts(&self, forecast_uuids: &[Uuid]) -> Result<DeletedCounts>;

    async fn site_groups(&self) -> Result<Vec<SiteGroup>>;

    async fn site_ids_in_country(&self, country: &str) -> Result<Vec<Uuid>>;

    async fn sites(&self) -> Result<Vec<Site>>;

    async fn insert_forecast(&self, forecast: &NewForecast) -> Result<Uuid>;

    /// Generation readings starting in `[start, end)`.
    async fn generation(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        site_uuids: &[Uuid],
    ) -> Result<Vec<Generation>>;

    /// Forecast values at `horizon_minutes` starting in `[start, end)`.
    async fn forecast_power(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        site_uuids: &[Uuid],
        horizon_minutes: i32,
    ) -> Result<Vec<SitePower>>;
}
