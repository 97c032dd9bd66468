// License: GNU Affero General Public License v3 or later
// A copy of GNU AGPL v3 should have been included in this software package in LICENSE.txt.

use std::f64::consts::PI;
use std::str::FromStr;

use chrono::prelude::*;
use chrono::Duration;

use crate::models::site::Site;
use crate::{Error, Result};

pub const MINUTES_PER_DAY: f64 = 24.0 * 60.0;

/// A forecast interval, in minutes after the forecast timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    pub start: i32,
    pub end: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub horizon: Horizon,
    pub power_kw: f64,
}

pub trait ForecastModel: Send + Sync {
    fn horizons(&self) -> &[Horizon];

    fn predict(&self, site: &Site, timestamp: DateTime<Utc>) -> Result<Vec<Prediction>>;
}

/// Registry of the models that can be picked by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ModelKind {
    Cos,
}

impl ModelKind {
    pub fn build(&self) -> Box<dyn ForecastModel> {
        match self {
            Self::Cos => Box::new(CosModel::new()),
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::from_str(name).or(Err(Error::UnknownModel(name.to_owned())))
    }
}

/// Baseline model that only looks at the time of day.
///
/// Night is zero, daytime follows cos² of the fraction of the day, peaking at noon.
#[derive(Debug, Clone)]
pub struct CosModel {
    horizons: Vec<Horizon>,
}

impl CosModel {
    /// 15 minute intervals for 48 hours.
    pub fn new() -> Self {
        let horizons = (0..4 * 48)
            .map(|i| Horizon {
                start: i * 15,
                end: (i + 1) * 15,
            })
            .collect();
        Self { horizons }
    }
}

impl Default for CosModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ForecastModel for CosModel {
    fn horizons(&self) -> &[Horizon] {
        &self.horizons
    }

    fn predict(&self, site: &Site, timestamp: DateTime<Utc>) -> Result<Vec<Prediction>> {
        if site.capacity_kw < 0.0 {
            return Err(Error::ModelError(format!(
                "Site {} has a negative capacity",
                site.site_uuid
            )));
        }
        let predictions = self
            .horizons
            .iter()
            .map(|horizon| {
                let ts = timestamp + Duration::minutes(horizon.start as i64);
                Prediction {
                    horizon: *horizon,
                    power_kw: intensity(&ts) * site.capacity_kw,
                }
            })
            .collect();
        Ok(predictions)
    }
}

/// Fake solar intensity between 0 and 1 for a time of day.
pub fn intensity(timestamp: &DateTime<Utc>) -> f64 {
    let fraction_of_day = (timestamp.hour() * 60 + timestamp.minute()) as f64 / MINUTES_PER_DAY;
    if fraction_of_day > 0.25 && fraction_of_day < 0.75 {
        (2.0 * PI * fraction_of_day).cos().powi(2)
    } else {
        0.0
    }
}
