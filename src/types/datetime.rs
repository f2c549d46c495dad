// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};

/// Calendar date, stored as days from the Common Era (1-01-01 is day 1).
#[derive(PartialOrd, Ord, PartialEq, Eq, Debug, Copy, Clone, Default, Hash)]
pub struct Date(i32);

impl Date {
    pub const fn new(days_from_ce: i32) -> Self {
        Self(days_from_ce)
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(|d| Self(d.num_days_from_ce()))
    }

    /// The 64-bit code stored in integer packs.
    pub fn code(&self) -> i64 {
        self.0 as i64
    }

    pub fn from_code(code: i64) -> Self {
        Self(code as i32)
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match NaiveDate::from_num_days_from_ce_opt(self.0) {
            Some(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            None => write!(f, "invalid date"),
        }
    }
}

/// Point in time, stored as microseconds from the Unix epoch, UTC.
///
/// The stored code is always UTC; rendering to the session time zone is the
/// caller's concern (see [`Timestamp::to_zoned_string`]).
#[derive(PartialOrd, Ord, PartialEq, Eq, Debug, Copy, Clone, Default, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn new(micros: i64) -> Self {
        Self(micros)
    }

    pub fn from_ymd_hms(year: i32, month: u32, day: u32, h: u32, m: u32, s: u32) -> Option<Self> {
        let dt = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(h, m, s)?;
        Some(Self(dt.and_utc().timestamp_micros()))
    }

    pub fn code(&self) -> i64 {
        self.0
    }

    pub fn from_code(code: i64) -> Self {
        Self(code)
    }

    pub fn to_utc_string(&self) -> String {
        match DateTime::<Utc>::from_timestamp_micros(self.0) {
            Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => "invalid timestamp".into(),
        }
    }

    /// Render the stored UTC instant in the given session time zone.
    pub fn to_zoned_string(&self, zone: &FixedOffset) -> String {
        match DateTime::<Utc>::from_timestamp_micros(self.0) {
            Some(dt) => dt.with_timezone(zone).format("%Y-%m-%d %H:%M:%S").to_string(),
            None => "invalid timestamp".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_roundtrip() {
        let d = Date::from_ymd(2024, 2, 29).unwrap();
        assert_eq!(Date::from_code(d.code()), d);
        assert_eq!(d.to_string(), "2024-02-29");
    }

    #[test]
    fn test_timestamp_zone() {
        let ts = Timestamp::from_ymd_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(ts.to_utc_string(), "2024-01-01 12:00:00");
        let shanghai = FixedOffset::east_opt(8 * 3600).unwrap();
        assert_eq!(ts.to_zoned_string(&shanghai), "2024-01-01 20:00:00");
    }
}
