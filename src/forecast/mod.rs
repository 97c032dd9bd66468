// License: GNU Affero General Public License v3 or later
// A copy of GNU AGPL v3 should have been included in this software package in LICENSE.txt.

use chrono::prelude::*;
use chrono::Duration;
use tokio::time::Instant;

use crate::models::forecast::{NewForecast, NewForecastValue};
use crate::models::site::Site;
use crate::store::ForecastStore;
use crate::{Error, Result};

pub mod model;

pub use model::{ForecastModel, ModelKind};

pub const FORECAST_DATE_FORMAT: &str = "%Y-%m-%d-%H-%M";

#[derive(Debug, Clone)]
pub struct ForecastConfig {
    pub timestamp: DateTime<Utc>,
    pub max_sites: Option<usize>,
    pub write_to_db: bool,
    pub forecast_version: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ForecastSummary {
    pub sites: usize,
    pub forecasts_written: usize,
    pub values_written: usize,
}

pub fn parse_forecast_date(date: &str) -> Result<DateTime<Utc>> {
    Ok(NaiveDateTime::parse_from_str(date, FORECAST_DATE_FORMAT)?.and_utc())
}

/// Floor `now` to the previous multiple of `minutes` within its hour.
pub fn round_down(now: DateTime<Utc>, minutes: u32) -> Result<DateTime<Utc>> {
    if minutes == 0 || minutes > 60 {
        return Err(Error::InvalidConfig(format!(
            "Can't round to {minutes} minutes"
        )));
    }
    let minute = now.minute() / minutes * minutes;
    now.with_minute(minute)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .ok_or_else(|| Error::InvalidConfig(format!("Can't round {now}")))
}

pub fn resolve_timestamp(
    date: Option<&str>,
    round_to_minutes: Option<u32>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    match (date, round_to_minutes) {
        (Some(_), Some(_)) => Err(Error::InvalidConfig(
            "Can't use both a date and rounding".to_string(),
        )),
        (Some(d), None) => parse_forecast_date(d),
        (None, Some(minutes)) => round_down(now, minutes),
        (None, None) => Ok(now),
    }
}

/// Build the forecast rows for one site.
pub fn make_forecast(
    model: &dyn ForecastModel,
    site: &Site,
    config: &ForecastConfig,
) -> Result<NewForecast> {
    let predictions = model.predict(site, config.timestamp)?;
    let values = predictions
        .into_iter()
        .map(|p| NewForecastValue {
            start_utc: config.timestamp + Duration::minutes(p.horizon.start as i64),
            end_utc: config.timestamp + Duration::minutes(p.horizon.end as i64),
            horizon_minutes: p.horizon.start,
            forecast_power_kw: p.power_kw,
        })
        .collect();

    Ok(NewForecast {
        site_uuid: site.site_uuid,
        timestamp_utc: config.timestamp,
        forecast_version: config.forecast_version.to_owned(),
        values,
    })
}

/// Run the model for every site and store or print the results.
pub async fn run(
    store: &dyn ForecastStore,
    model: &dyn ForecastModel,
    config: &ForecastConfig,
) -> Result<ForecastSummary> {
    tracing::info!("Making predictions with now={}", config.timestamp);

    let mut sites = store.sites().await?;
    tracing::info!("Found {} sites", sites.len());
    if let Some(max) = config.max_sites {
        sites.truncate(max);
        tracing::info!("Keeping only {} sites", sites.len());
    }

    let mut summary = ForecastSummary {
        sites: sites.len(),
        ..ForecastSummary::default()
    };

    for site in &sites {
        let start = Instant::now();
        let forecast = make_forecast(model, site, config)?;
        tracing::debug!(
            "Applying model on site {} took {:?}",
            site.site_uuid,
            start.elapsed()
        );

        if config.write_to_db {
            let forecast_uuid = store.insert_forecast(&forecast).await?;
            tracing::info!(
                values = forecast.values.len(),
                "Wrote forecast {forecast_uuid} for site {}",
                site.site_uuid
            );
            summary.forecasts_written += 1;
            summary.values_written += forecast.values.len();
        } else {
            println!("{}", serde_json::to_string(&forecast)?);
        }
    }

    Ok(summary)
}
