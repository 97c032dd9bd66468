// License: GNU Affero General Public License v3 or later
// A copy of GNU AGPL v3 should have been included in this software package in LICENSE.txt.

//! In-memory store used by the tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::prelude::*;
use tokio::time::Instant;
use uuid::Uuid;

use super::{ArchiveBatch, ForecastStore, SiteFilter};
use crate::models::forecast::{DeletedCounts, Forecast, ForecastValue, NewForecast, SitePower};
use crate::models::generation::Generation;
use crate::models::site::{Site, SiteGroup};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Selected(Vec<Uuid>),
    ArchiveRead(Vec<Uuid>),
    Deleted(Vec<Uuid>),
}

#[derive(Debug, Default)]
struct Data {
    forecasts: Vec<Forecast>,
    values: Vec<ForecastValue>,
    sites: Vec<Site>,
    groups: Vec<SiteGroup>,
    generation: Vec<Generation>,
    events: Vec<Event>,
    selected_at: Vec<Instant>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Data>,
    fail_deletes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_deletes() -> Self {
        Self {
            fail_deletes: true,
            ..Self::default()
        }
    }

    pub fn add_site(&self, country: Option<&str>) -> Uuid {
        let site_uuid = Uuid::new_v4();
        self.data.lock().unwrap().sites.push(Site {
            site_uuid,
            latitude: 51.5,
            longitude: -0.1,
            capacity_kw: 4.0,
            country: country.map(str::to_string),
        });
        site_uuid
    }

    pub fn add_group(&self, name: &str, service_level: Option<i32>, site_uuids: &[Uuid]) {
        self.data.lock().unwrap().groups.push(SiteGroup {
            site_group_uuid: Uuid::new_v4(),
            site_group_name: name.to_string(),
            service_level,
            site_uuids: site_uuids.to_vec(),
        });
    }

    /// Add one forecast per timestamp, each with `num_values` one minute values.
    pub fn add_forecasts(&self, site_uuid: Uuid, timestamps: &[NaiveDateTime], num_values: i32) {
        let mut data = self.data.lock().unwrap();
        for timestamp in timestamps {
            let forecast_uuid = Uuid::new_v4();
            data.forecasts.push(Forecast {
                forecast_uuid,
                site_uuid,
                timestamp_utc: *timestamp,
                forecast_version: "0".to_string(),
                created_utc: *timestamp,
            });
            for i in 0..num_values {
                data.values.push(ForecastValue {
                    forecast_uuid,
                    start_utc: *timestamp + chrono::Duration::minutes(i as i64),
                    end_utc: *timestamp + chrono::Duration::minutes(i as i64 + 1),
                    horizon_minutes: i,
                    forecast_power_kw: i as f64,
                    created_utc: *timestamp,
                });
            }
        }
    }

    /// Add a forecast made at `timestamp` with `(start_utc, horizon_minutes, power_kw)` values.
    pub fn add_forecast(
        &self,
        site_uuid: Uuid,
        timestamp: NaiveDateTime,
        values: &[(NaiveDateTime, i32, f64)],
    ) -> Uuid {
        let forecast_uuid = Uuid::new_v4();
        let mut data = self.data.lock().unwrap();
        data.forecasts.push(Forecast {
            forecast_uuid,
            site_uuid,
            timestamp_utc: timestamp,
            forecast_version: "0".to_string(),
            created_utc: timestamp,
        });
        for (start_utc, horizon_minutes, forecast_power_kw) in values {
            data.values.push(ForecastValue {
                forecast_uuid,
                start_utc: *start_utc,
                end_utc: *start_utc + chrono::Duration::minutes(1),
                horizon_minutes: *horizon_minutes,
                forecast_power_kw: *forecast_power_kw,
                created_utc: timestamp,
            });
        }
        forecast_uuid
    }

    /// Add a one minute generation reading.
    pub fn add_generation(&self, site_uuid: Uuid, start_utc: NaiveDateTime, power_kw: f64) {
        self.data.lock().unwrap().generation.push(Generation {
            site_uuid,
            start_utc,
            end_utc: start_utc + chrono::Duration::minutes(1),
            generation_power_kw: power_kw,
        });
    }

    pub fn forecasts_for(&self, site_uuid: Uuid) -> Vec<Forecast> {
        let data = self.data.lock().unwrap();
        data.forecasts
            .iter()
            .filter(|f| f.site_uuid == site_uuid)
            .cloned()
            .collect()
    }

    pub fn count_forecasts(&self, site_uuid: Uuid) -> usize {
        self.forecasts_for(site_uuid).len()
    }

    pub fn count_values(&self, site_uuid: Uuid) -> usize {
        let data = self.data.lock().unwrap();
        data.values
            .iter()
            .filter(|v| {
                data.forecasts
                    .iter()
                    .any(|f| f.forecast_uuid == v.forecast_uuid && f.site_uuid == site_uuid)
            })
            .count()
    }

    /// Values whose forecast no longer exists.
    pub fn orphaned_values(&self) -> usize {
        let data = self.data.lock().unwrap();
        data.values
            .iter()
            .filter(|v| !data.forecasts.iter().any(|f| f.forecast_uuid == v.forecast_uuid))
            .count()
    }

    pub fn events(&self) -> Vec<Event> {
        self.data.lock().unwrap().events.clone()
    }

    /// When each batch selection happened.
    pub fn selected_at(&self) -> Vec<Instant> {
        self.data.lock().unwrap().selected_at.clone()
    }
}

#[async_trait]
impl ForecastStore for MemoryStore {
    async fn oldest_forecasts(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
        sites: &SiteFilter,
    ) -> Result<Vec<Uuid>> {
        let mut data = self.data.lock().unwrap();
        let cutoff = cutoff.naive_utc();
        let mut matching: Vec<&Forecast> = data
            .forecasts
            .iter()
            .filter(|f| f.timestamp_utc < cutoff)
            .filter(|f| match sites {
                SiteFilter::All => true,
                SiteFilter::Sites(ids) => ids.contains(&f.site_uuid),
            })
            .collect();
        matching.sort_by_key(|f| (f.timestamp_utc, f.forecast_uuid));
        let ids: Vec<Uuid> = matching
            .into_iter()
            .take(limit as usize)
            .map(|f| f.forecast_uuid)
            .collect();
        data.events.push(Event::Selected(ids.clone()));
        data.selected_at.push(Instant::now());
        Ok(ids)
    }

    async fn archive_batch(&self, forecast_uuids: &[Uuid]) -> Result<ArchiveBatch> {
        let mut data = self.data.lock().unwrap();
        let forecasts = data
            .forecasts
            .iter()
            .filter(|f| forecast_uuids.contains(&f.forecast_uuid))
            .cloned()
            .collect();
        let values = data
            .values
            .iter()
            .filter(|v| forecast_uuids.contains(&v.forecast_uuid))
            .cloned()
            .collect();
        data.events.push(Event::ArchiveRead(forecast_uuids.to_vec()));
        Ok(ArchiveBatch { forecasts, values })
    }

    async fn delete_forecasts(&self, forecast_uuids: &[Uuid]) -> Result<DeletedCounts> {
        if self.fail_deletes {
            return Err(Error::SqlError(sqlx::Error::PoolClosed));
        }
        let mut data = self.data.lock().unwrap();
        let values_before = data.values.len();
        data.values
            .retain(|v| !forecast_uuids.contains(&v.forecast_uuid));
        let forecasts_before = data.forecasts.len();
        data.forecasts
            .retain(|f| !forecast_uuids.contains(&f.forecast_uuid));
        let counts = DeletedCounts {
            forecasts: (forecasts_before - data.forecasts.len()) as u64,
            values: (values_before - data.values.len()) as u64,
        };
        data.events.push(Event::Deleted(forecast_uuids.to_vec()));
        Ok(counts)
    }

    async fn site_groups(&self) -> Result<Vec<SiteGroup>> {
        Ok(self.data.lock().unwrap().groups.clone())
    }

    async fn site_ids_in_country(&self, country: &str) -> Result<Vec<Uuid>> {
        let data = self.data.lock().unwrap();
        Ok(data
            .sites
            .iter()
            .filter(|s| s.country.as_deref() == Some(country))
            .map(|s| s.site_uuid)
            .collect())
    }

    async fn sites(&self) -> Result<Vec<Site>> {
        Ok(self.data.lock().unwrap().sites.clone())
    }

    async fn generation(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        site_uuids: &[Uuid],
    ) -> Result<Vec<Generation>> {
        let (start, end) = (start.naive_utc(), end.naive_utc());
        let data = self.data.lock().unwrap();
        Ok(data
            .generation
            .iter()
            .filter(|g| site_uuids.contains(&g.site_uuid))
            .filter(|g| g.start_utc >= start && g.start_utc < end)
            .cloned()
            .collect())
    }

    async fn forecast_power(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        site_uuids: &[Uuid],
        horizon_minutes: i32,
    ) -> Result<Vec<SitePower>> {
        let (start, end) = (start.naive_utc(), end.naive_utc());
        let data = self.data.lock().unwrap();
        let mut rows = Vec::new();
        for value in &data.values {
            if value.horizon_minutes != horizon_minutes
                || value.start_utc < start
                || value.start_utc >= end
            {
                continue;
            }
            let Some(forecast) = data
                .forecasts
                .iter()
                .find(|f| f.forecast_uuid == value.forecast_uuid)
            else {
                continue;
            };
            if site_uuids.contains(&forecast.site_uuid) {
                rows.push(SitePower {
                    site_uuid: forecast.site_uuid,
                    start_utc: value.start_utc,
                    power_kw: value.forecast_power_kw,
                });
            }
        }
        Ok(rows)
    }

    async fn insert_forecast(&self, forecast: &NewForecast) -> Result<Uuid> {
        let forecast_uuid = Uuid::new_v4();
        let now = Utc::now().naive_utc();
        let mut data = self.data.lock().unwrap();
        data.forecasts.push(Forecast {
            forecast_uuid,
            site_uuid: forecast.site_uuid,
            timestamp_utc: forecast.timestamp_utc.naive_utc(),
            forecast_version: forecast.forecast_version.clone(),
            created_utc: now,
        });
        for value in &forecast.values {
            data.values.push(ForecastValue {
                forecast_uuid,
                start_utc: value.start_utc.naive_utc(),
                end_utc: value.end_utc.naive_utc(),
                horizon_minutes: value.horizon_minutes,
                forecast_power_kw: value.forecast_power_kw,
                created_utc: now,
            });
        }
        Ok(forecast_uuid)
    }
}
