//! Conversions between calendar timestamps and the simulator's fractional-day clock.
//!
//! The simulator counts time in fractional days since 00:00 UTC on 1 January of a reference year.
//! All timestamps in this crate are UTC. Durations are measured in real elapsed time, so leap days
//! are counted like any other day.
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Months, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use serde::de::{Deserialize, Deserializer};

/// Milliseconds in a day
const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Accepted layouts for timestamps without a UTC offset
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// The instant at which the given reference year starts
pub fn reference_start(year: i32) -> Result<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .single()
        .with_context(|| format!("Invalid reference year: {year}"))
}

/// Fractional days elapsed between the start of `year` and `time`
pub fn days_since_year(time: DateTime<Utc>, year: i32) -> Result<f64> {
    let delta = time - reference_start(year)?;
    Ok(delta.num_milliseconds() as f64 / MILLIS_PER_DAY)
}

/// The timestamp lying `days` fractional days after the start of `year`
pub fn datetime_from_days(days: f64, year: i32) -> Result<DateTime<Utc>> {
    #[allow(clippy::cast_possible_truncation)]
    let millis = (days * MILLIS_PER_DAY).round() as i64;
    let delta = TimeDelta::try_milliseconds(millis)
        .with_context(|| format!("Day offset out of range: {days}"))?;
    reference_start(year)?
        .checked_add_signed(delta)
        .with_context(|| format!("Day offset out of range: {days}"))
}

/// Round a timestamp to the nearest whole minute
pub fn round_to_minute(time: DateTime<Utc>) -> DateTime<Utc> {
    const MILLIS_PER_MINUTE: i64 = 60_000;
    let millis = time.timestamp_millis();
    let rounded = (millis + MILLIS_PER_MINUTE / 2).div_euclid(MILLIS_PER_MINUTE) * MILLIS_PER_MINUTE;
    DateTime::from_timestamp_millis(rounded).unwrap_or(time)
}

/// Add a burn-in period to `start`.
///
/// A burn-in of `None` means one calendar year.
pub fn add_burn_in(start: DateTime<Utc>, burn_in_days: Option<f64>) -> Result<DateTime<Utc>> {
    match burn_in_days {
        Some(days) => {
            #[allow(clippy::cast_possible_truncation)]
            let delta = TimeDelta::try_milliseconds((days * MILLIS_PER_DAY).round() as i64)
                .with_context(|| format!("Invalid burn-in period: {days} days"))?;
            start
                .checked_add_signed(delta)
                .with_context(|| format!("Invalid burn-in period: {days} days"))
        }
        None => start
            .checked_add_months(Months::new(12))
            .context("Burn-in period runs past the supported date range"),
    }
}

/// Parse a timestamp written either in RFC 3339 form or as a naive date/time taken to be UTC
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(s) {
        return Ok(time.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(time) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(time.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc());
    }

    bail!("Invalid timestamp: {s}")
}

/// Deserialise a timestamp with [`parse_timestamp`]
pub fn deserialise_timestamp<'de, D>(deserialiser: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserialiser)?;
    parse_timestamp(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn test_days_since_year() {
        assert_approx_eq!(
            f64,
            days_since_year(utc(2020, 1, 2, 12, 0, 0), 2020).unwrap(),
            1.5
        );

        // 2020 is a leap year
        assert_approx_eq!(
            f64,
            days_since_year(utc(2021, 1, 1, 0, 0, 0), 2020).unwrap(),
            366.0
        );

        // Times before the reference year are negative
        assert_approx_eq!(
            f64,
            days_since_year(utc(2019, 12, 31, 0, 0, 0), 2020).unwrap(),
            -1.0
        );
    }

    #[test]
    fn test_datetime_from_days() {
        assert_eq!(
            datetime_from_days(366.25, 2020).unwrap(),
            utc(2021, 1, 1, 6, 0, 0)
        );
    }

    #[test]
    fn test_round_to_minute() {
        assert_eq!(
            round_to_minute(utc(2020, 5, 1, 10, 0, 29)),
            utc(2020, 5, 1, 10, 0, 0)
        );
        assert_eq!(
            round_to_minute(utc(2020, 5, 1, 10, 0, 30)),
            utc(2020, 5, 1, 10, 1, 0)
        );
    }

    #[test]
    fn test_add_burn_in() {
        let start = utc(2020, 3, 1, 0, 0, 0);
        assert_eq!(add_burn_in(start, None).unwrap(), utc(2021, 3, 1, 0, 0, 0));
        assert_eq!(
            add_burn_in(start, Some(10.5)).unwrap(),
            utc(2020, 3, 11, 12, 0, 0)
        );
    }

    #[rstest]
    #[case("2020-06-01T12:00:00+00:00", utc(2020, 6, 1, 12, 0, 0))]
    #[case("2020-06-01T14:00:00+02:00", utc(2020, 6, 1, 12, 0, 0))]
    #[case("2020-06-01T12:00:00Z", utc(2020, 6, 1, 12, 0, 0))]
    #[case("2020-06-01 12:00:00", utc(2020, 6, 1, 12, 0, 0))]
    #[case("2020-06-01T12:00", utc(2020, 6, 1, 12, 0, 0))]
    #[case(" 2020-06-01 ", utc(2020, 6, 1, 0, 0, 0))]
    fn test_parse_timestamp(#[case] input: &str, #[case] expected: DateTime<Utc>) {
        assert_eq!(parse_timestamp(input).unwrap(), expected);
    }

    #[test]
    fn test_parse_timestamp_invalid() {
        assert!(parse_timestamp("yesterday").is_err());
    }
}
