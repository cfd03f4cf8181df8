// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OLE automation dates.
//!
//! A date is an `f64` counting days since 1899-12-30 00:00. The integer part
//! is the signed day offset and the fractional part is the time of day, so
//! `-1.25` is 1899-12-29 06:00 (not 1899-12-28 18:00).

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::error::ConversionError;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Earliest representable date (0100-01-01).
const MIN_OLE_DATE: f64 = -657_434.0;

/// Latest representable date (9999-12-31 23:59:59.999).
const MAX_OLE_DATE: f64 = 2_958_466.0;

fn epoch() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or_default()
}

/// Converts an OLE automation date to UTC.
pub fn from_ole_date(value: f64) -> Result<DateTime<Utc>, ConversionError> {
    if !value.is_finite() || !(MIN_OLE_DATE..MAX_OLE_DATE).contains(&value) {
        return Err(ConversionError::DateOutOfRange { value });
    }

    let days = value.trunc();
    let time_of_day = (value - days).abs();
    let millis = (time_of_day * MILLIS_PER_DAY as f64).round() as i64;

    Ok(epoch() + Duration::days(days as i64) + Duration::milliseconds(millis))
}

/// Converts UTC to an OLE automation date.
pub fn to_ole_date(value: &DateTime<Utc>) -> f64 {
    let offset = (*value - epoch()).num_milliseconds();
    let days = offset.div_euclid(MILLIS_PER_DAY);
    let time_of_day = offset.rem_euclid(MILLIS_PER_DAY) as f64 / MILLIS_PER_DAY as f64;

    if days >= 0 {
        days as f64 + time_of_day
    } else {
        days as f64 - time_of_day
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_epoch_is_zero() {
        let date = from_ole_date(0.0).unwrap();
        assert_eq!(date, Utc.with_ymd_and_hms(1899, 12, 30, 0, 0, 0).unwrap());
        assert_eq!(to_ole_date(&date), 0.0);
    }

    #[test]
    fn test_known_dates() {
        let date = from_ole_date(2.5).unwrap();
        assert_eq!(date, Utc.with_ymd_and_hms(1900, 1, 1, 12, 0, 0).unwrap());

        let date = from_ole_date(-1.25).unwrap();
        assert_eq!(date, Utc.with_ymd_and_hms(1899, 12, 29, 6, 0, 0).unwrap());
        assert_eq!(to_ole_date(&date), -1.25);
    }

    #[test]
    fn test_round_trip_millis() {
        let date = Utc.with_ymd_and_hms(2024, 3, 15, 8, 30, 45).unwrap()
            + Duration::milliseconds(123);
        assert_eq!(from_ole_date(to_ole_date(&date)).unwrap(), date);
    }

    #[test]
    fn test_out_of_range() {
        assert!(from_ole_date(f64::NAN).is_err());
        assert!(from_ole_date(3_000_000.0).is_err());
        assert!(from_ole_date(-700_000.0).is_err());
    }
}
