//! Calendar helpers. History, daily stats and server stats are dated by the
//! world's local calendar, not UTC.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::error::PayloadError;

pub fn parse_timezone(name: &str) -> Result<Tz, PayloadError> {
    name.parse::<Tz>()
        .map_err(|_| PayloadError::UnknownTimezone(name.to_string()))
}

/// The local calendar date of `now` in `tz`.
pub fn local_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}
