// License: GNU Affero General Public License v3 or later
// A copy of GNU AGPL v3 should have been included in this software package in LICENSE.txt.

use chrono::prelude::*;
use chrono::Days;

use crate::{Error, Result};

pub const DEFAULT_DAYS_BACK: u64 = 3;
pub const DEFAULT_CUTOFF_HOUR: u32 = 0;
pub const CUTOFF_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Parse a `YYYY-MM-DD HH:MM` UTC date.
pub fn parse_cutoff(date: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(date, CUTOFF_FORMAT)?;
    Ok(naive.and_utc())
}

/// `days_back` days before `today`, at `hour`:00 UTC.
pub fn default_cutoff(today: NaiveDate, days_back: u64, hour: u32) -> Result<DateTime<Utc>> {
    let Some(day) = today.checked_sub_days(Days::new(days_back)) else {
        return Err(Error::InvalidConfig(format!(
            "Can't go back {days_back} days from {today}"
        )));
    };
    let Some(cutoff) = day.and_hms_opt(hour, 0, 0) else {
        return Err(Error::InvalidConfig(format!("Invalid cutoff hour {hour}")));
    };
    Ok(cutoff.and_utc())
}

pub fn resolve_cutoff(
    date: Option<&str>,
    today: NaiveDate,
    days_back: u64,
    hour: u32,
) -> Result<DateTime<Utc>> {
    match date {
        Some(d) => parse_cutoff(d),
        None => default_cutoff(today, days_back, hour),
    }
}

/// Name of the archive subdirectory for a run with this cutoff.
pub fn archive_dir_name(cutoff: &DateTime<Utc>) -> String {
    cutoff.format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_parse_cutoff() {
        assert_eq!(
            parse_cutoff("2019-12-31 23:59").unwrap(),
            utc(2019, 12, 31, 23, 59)
        );
        assert!(parse_cutoff("2019-12-31").is_err());
        assert!(parse_cutoff("yesterday").is_err());
    }

    #[test]
    fn test_default_cutoff() {
        let today = NaiveDate::from_ymd_opt(2020, 1, 11).unwrap();
        assert_eq!(
            default_cutoff(today, DEFAULT_DAYS_BACK, DEFAULT_CUTOFF_HOUR).unwrap(),
            utc(2020, 1, 8, 0, 0)
        );
        assert_eq!(default_cutoff(today, 10, 1).unwrap(), utc(2020, 1, 1, 1, 0));
        assert!(default_cutoff(today, 3, 24).is_err());
    }

    #[test]
    fn test_resolve_cutoff() {
        let today = NaiveDate::from_ymd_opt(2020, 1, 11).unwrap();
        assert_eq!(
            resolve_cutoff(Some("2020-01-02 00:00"), today, 3, 0).unwrap(),
            utc(2020, 1, 2, 0, 0)
        );
        assert_eq!(
            resolve_cutoff(None, today, 3, 0).unwrap(),
            utc(2020, 1, 8, 0, 0)
        );
    }

    #[test]
    fn test_archive_dir_name() {
        assert_eq!(
            archive_dir_name(&utc(2020, 1, 8, 0, 0)),
            "2020-01-08T00:00:00"
        );
    }
}
