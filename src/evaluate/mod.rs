// License: GNU Affero General Public License v3 or later
// A copy of GNU AGPL v3 should have been included in this software package in LICENSE.txt.

//! Compare live forecasts to the power the sites actually generated.
//!
//! Both series are averaged into buckets of `resample_minutes`, and the error
//! of a site is the area between the two curves divided by the area under the
//! generation curve, in percent.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::prelude::*;
use chrono::Duration;
use uuid::Uuid;

use crate::store::ForecastStore;
use crate::{Error, Result};

pub const DEFAULT_HISTORY_HOURS: i64 = 24;
pub const DEFAULT_HORIZON_MINUTES: i32 = 0;
pub const DEFAULT_RESAMPLE_MINUTES: u32 = 15;
/// Generation at or below this is taken to be night and ignored.
pub const MIN_GENERATION_KW: f64 = 0.001;
/// Number of worst sites listed in the report.
pub const WORST_SITES: usize = 10;

/// Two sided 95% quantile of the normal distribution.
const Z_95: f64 = 1.96;

#[derive(Debug, Clone)]
pub struct EvaluateConfig {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub horizon_minutes: i32,
    pub max_sites: Option<usize>,
    pub resample_minutes: u32,
}

impl EvaluateConfig {
    /// Window of `history_hours` ending at `end`.
    pub fn new(
        end: DateTime<Utc>,
        history_hours: i64,
        horizon_minutes: i32,
        max_sites: Option<usize>,
        resample_minutes: u32,
    ) -> Result<Self> {
        if history_hours <= 0 {
            return Err(Error::InvalidConfig(format!(
                "History must be positive, got {history_hours} hours"
            )));
        }
        if horizon_minutes < 0 {
            return Err(Error::InvalidConfig(format!(
                "Horizon can't be negative, got {horizon_minutes} minutes"
            )));
        }
        if resample_minutes == 0 {
            return Err(Error::InvalidConfig(
                "Can't resample to 0 minutes".to_string(),
            ));
        }
        let history = Duration::try_hours(history_hours).ok_or_else(|| {
            Error::InvalidConfig(format!("History of {history_hours} hours is too long"))
        })?;

        Ok(Self {
            start: end - history,
            end,
            horizon_minutes,
            max_sites,
            resample_minutes,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SiteError {
    pub site_uuid: Uuid,
    pub error_pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation, needs at least two sites
    pub std: Option<f64>,
    /// 95% confidence interval on the mean
    pub confidence: Option<(f64, f64)>,
}

impl ErrorStats {
    pub fn from_errors(errors: &[f64]) -> Option<Self> {
        if errors.is_empty() {
            return None;
        }
        let mut sorted = errors.to_vec();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let median = if count % 2 == 0 {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        } else {
            sorted[count / 2]
        };
        let std = (count > 1).then(|| {
            let variance =
                sorted.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
            variance.sqrt()
        });
        let confidence = std.map(|std| {
            let err = Z_95 * std / (count as f64).sqrt();
            (mean - err, mean + err)
        });

        Some(Self {
            min: sorted[0],
            max: sorted[count - 1],
            mean,
            median,
            std,
            confidence,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Evaluation {
    /// Sites looked at, after `max_sites`
    pub sites: usize,
    pub sites_with_generation: usize,
    /// Buckets with generation or forecast data
    pub buckets: usize,
    /// Generation buckets without a forecast
    pub missing_forecasts: usize,
    /// One entry per site, worst first
    pub site_errors: Vec<SiteError>,
    pub stats: Option<ErrorStats>,
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} sites were found.", self.sites)?;
        writeln!(
            f,
            "There were {} sites with non-trivial generation data.",
            self.sites_with_generation
        )?;
        let missing_pct = if self.buckets == 0 {
            0.0
        } else {
            self.missing_forecasts as f64 / self.buckets as f64 * 100.0
        };
        writeln!(
            f,
            "Num of missing forecast values: {} ({missing_pct:.1} %)",
            self.missing_forecasts
        )?;

        writeln!(f, "\nWorst performing sites:")?;
        for site in self.site_errors.iter().take(WORST_SITES) {
            writeln!(f, "{}  {:.1} %", site.site_uuid, site.error_pct)?;
        }

        let Some(stats) = &self.stats else {
            return writeln!(f, "\nNo site had both forecasts and generation data.");
        };
        writeln!(f, "\nStats on the errors per site")?;
        writeln!(f, "Min error: {:.1} %", stats.min)?;
        writeln!(f, "Max error: {:.1} %", stats.max)?;
        writeln!(f, "Mean error: {:.1} %", stats.mean)?;
        writeln!(f, "Median error: {:.1} %", stats.median)?;
        match (stats.std, stats.confidence) {
            (Some(std), Some((low, high))) => {
                writeln!(f, "Std error: {std:.1} %")?;
                writeln!(
                    f,
                    "\nConfidence interval (95%) on the mean: [{low:.1} %, {high:.1} %]"
                )
            }
            _ => writeln!(f, "\nNot enough sites for a confidence interval."),
        }
    }
}

pub type Buckets = BTreeMap<(Uuid, NaiveDateTime), f64>;

/// Start of the `minutes` wide bucket holding `timestamp`, aligned on the epoch.
pub fn bucket_start(timestamp: NaiveDateTime, minutes: u32) -> NaiveDateTime {
    let step = i64::from(minutes) * 60;
    let offset = timestamp.and_utc().timestamp().rem_euclid(step);
    let nanos = i64::from(timestamp.nanosecond());
    timestamp - Duration::seconds(offset) - Duration::nanoseconds(nanos)
}

/// Mean power per site and bucket.
pub fn resample<I>(samples: I, minutes: u32) -> Buckets
where
    I: IntoIterator<Item = (Uuid, NaiveDateTime, f64)>,
{
    let mut sums: BTreeMap<(Uuid, NaiveDateTime), (f64, usize)> = BTreeMap::new();
    for (site_uuid, start_utc, power_kw) in samples {
        let entry = sums
            .entry((site_uuid, bucket_start(start_utc, minutes)))
            .or_default();
        entry.0 += power_kw;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(key, (sum, count))| (key, sum / count as f64))
        .collect()
}

/// Per site error over the buckets that have both series, worst first.
///
/// Also returns how many generation buckets had no forecast.
pub fn site_errors(generation: &Buckets, forecasts: &Buckets) -> (Vec<SiteError>, usize) {
    let mut totals: BTreeMap<Uuid, (f64, f64)> = BTreeMap::new();
    let mut missing = 0;
    for (key, generated) in generation {
        let Some(forecast) = forecasts.get(key) else {
            missing += 1;
            continue;
        };
        let entry = totals.entry(key.0).or_default();
        entry.0 += (forecast - generated).abs();
        entry.1 += generated;
    }

    let mut errors: Vec<SiteError> = totals
        .into_iter()
        .map(|(site_uuid, (abs_diff, generated))| SiteError {
            site_uuid,
            error_pct: abs_diff / generated * 100.0,
        })
        .collect();
    errors.sort_by(|a, b| b.error_pct.total_cmp(&a.error_pct));
    (errors, missing)
}

pub async fn run(store: &dyn ForecastStore, config: &EvaluateConfig) -> Result<Evaluation> {
    tracing::info!("Evaluating forecasts from {} to {}", config.start, config.end);

    let mut site_uuids: Vec<Uuid> = store
        .sites()
        .await?
        .into_iter()
        .map(|s| s.site_uuid)
        .collect();
    tracing::info!("Found {} sites", site_uuids.len());
    if let Some(max) = config.max_sites {
        site_uuids.truncate(max);
        tracing::info!("Keeping only {} sites", site_uuids.len());
    }

    let mut evaluation = Evaluation {
        sites: site_uuids.len(),
        ..Evaluation::default()
    };
    if site_uuids.is_empty() {
        return Ok(evaluation);
    }

    let generation = store
        .generation(config.start, config.end, &site_uuids)
        .await?;
    tracing::info!(rows = generation.len(), "Fetched generation");
    let generation = resample(
        generation
            .into_iter()
            .filter(|g| g.generation_power_kw > MIN_GENERATION_KW)
            .map(|g| (g.site_uuid, g.start_utc, g.generation_power_kw)),
        config.resample_minutes,
    );

    let active: Vec<Uuid> = generation
        .keys()
        .map(|(site_uuid, _)| *site_uuid)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    evaluation.sites_with_generation = active.len();
    if active.is_empty() {
        tracing::warn!("No generation data in the window");
        return Ok(evaluation);
    }

    tracing::info!("Fetching forecasts at horizon {} minutes", config.horizon_minutes);
    let forecasts = store
        .forecast_power(config.start, config.end, &active, config.horizon_minutes)
        .await?;
    tracing::info!(rows = forecasts.len(), "Fetched forecasts");
    let forecasts = resample(
        forecasts
            .into_iter()
            .map(|f| (f.site_uuid, f.start_utc, f.power_kw)),
        config.resample_minutes,
    );

    let (errors, missing) = site_errors(&generation, &forecasts);
    evaluation.buckets = generation
        .keys()
        .chain(forecasts.keys())
        .collect::<BTreeSet<_>>()
        .len();
    evaluation.missing_forecasts = missing;
    let values: Vec<f64> = errors.iter().map(|e| e.error_pct).collect();
    evaluation.stats = ErrorStats::from_errors(&values);
    evaluation.site_errors = errors;

    Ok(evaluation)
}
