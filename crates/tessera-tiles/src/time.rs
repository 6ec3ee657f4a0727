//! UTC instants for the content freshness contract.
//!
//! Tile headers carry ISO-8601 expiration dates and refreshed requests carry
//! the previous expiration instant as a query parameter, so [`Timestamp`]
//! parses and formats the subset of ISO-8601 used by tilesets.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::TileError;

const SECONDS_PER_DAY: f64 = 86_400.0;
const MILLIS_PER_DAY: i64 = 86_400_000;

/// An instant in UTC, stored as seconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
pub struct Timestamp(f64);

impl Timestamp {
    /// 1970-01-01T00:00:00Z.
    pub const UNIX_EPOCH: Self = Self(0.0);

    /// Create a timestamp from seconds since the Unix epoch.
    pub fn from_unix_seconds(seconds: f64) -> Self {
        Self(seconds)
    }

    /// Seconds since the Unix epoch.
    pub fn as_unix_seconds(self) -> f64 {
        self.0
    }

    /// The current wall-clock time. A clock set before 1970 reads as the epoch.
    pub fn now() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self(seconds)
    }

    /// Returns this instant shifted by `seconds` (may be negative).
    #[must_use]
    pub fn add_seconds(self, seconds: f64) -> Self {
        Self(self.0 + seconds)
    }

    /// Seconds elapsed from `earlier` to `self`.
    pub fn seconds_since(self, earlier: Self) -> f64 {
        self.0 - earlier.0
    }

    /// Parse `YYYY-MM-DD[THH:MM[:SS[.fff]]][Z|±HH:MM|±HHMM]`.
    ///
    /// A missing zone designator is read as UTC.
    pub fn parse_iso8601(text: &str) -> Result<Self, TileError> {
        parse(text.trim())
            .map(Self)
            .ok_or_else(|| TileError::InvalidExpireDate(text.to_string()))
    }
}

impl fmt::Display for Timestamp {
    /// Formats as `YYYY-MM-DDTHH:MM:SSZ`, with milliseconds when non-zero.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = (self.0 * 1000.0).round() as i64;
        let days = millis.div_euclid(MILLIS_PER_DAY);
        let of_day = millis.rem_euclid(MILLIS_PER_DAY);
        let (year, month, day) = civil_from_days(days);
        let hour = of_day / 3_600_000;
        let minute = (of_day / 60_000) % 60;
        let second = (of_day / 1000) % 60;
        let milli = of_day % 1000;
        write!(
            f,
            "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}"
        )?;
        if milli != 0 {
            write!(f, ".{milli:03}")?;
        }
        f.write_str("Z")
    }
}

fn parse(text: &str) -> Option<f64> {
    let date = text.get(0..10)?;
    let mut parts = date.split('-');
    let year: i64 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some()
        || !(1..=12).contains(&month)
        || day == 0
        || day > days_in_month(year, month)
    {
        return None;
    }
    let mut seconds = days_from_civil(year, month, day) as f64 * SECONDS_PER_DAY;

    let rest = &text[10..];
    if rest.is_empty() {
        return Some(seconds);
    }
    let rest = rest.strip_prefix('T').or_else(|| rest.strip_prefix(' '))?;
    let (clock, offset) = split_zone(rest)?;

    let mut fields = clock.split(':');
    let hour: u32 = fields.next()?.parse().ok()?;
    let minute: u32 = fields.next()?.parse().ok()?;
    let second: f64 = match fields.next() {
        Some(s) => s.parse().ok()?,
        None => 0.0,
    };
    if fields.next().is_some() || hour > 24 || minute > 59 || !(0.0..61.0).contains(&second) {
        return None;
    }
    seconds += f64::from(hour) * 3600.0 + f64::from(minute) * 60.0 + second;
    Some(seconds - offset)
}

/// Splits the clock from its zone designator, returning the offset in seconds.
fn split_zone(rest: &str) -> Option<(&str, f64)> {
    if let Some(clock) = rest.strip_suffix('Z').or_else(|| rest.strip_suffix('z')) {
        return Some((clock, 0.0));
    }
    let Some(index) = rest.rfind(|c| c == '+' || c == '-') else {
        return Some((rest, 0.0));
    };
    let (clock, zone) = rest.split_at(index);
    let sign = if zone.starts_with('-') { -1.0 } else { 1.0 };
    let zone = &zone[1..];
    let (hours, minutes) = match zone.split_once(':') {
        Some(pair) => pair,
        None if zone.len() == 4 => zone.split_at(2),
        None => (zone, "0"),
    };
    let hours: f64 = hours.parse().ok()?;
    let minutes: f64 = minutes.parse().ok()?;
    Some((clock, sign * (hours * 3600.0 + minutes * 60.0)))
}

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = (if year >= 0 { year } else { year - 399 }) / 400;
    let year_of_era = year - era * 400;
    let month = i64::from(month);
    let shifted_month = if month > 2 { month - 3 } else { month + 9 };
    let day_of_year = (153 * shifted_month + 2) / 5 + i64::from(day) - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    era * 146_097 + day_of_era - 719_468
}

/// Inverse of [`days_from_civil`].
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let day_of_era = z - era * 146_097;
    let year_of_era =
        (day_of_era - day_of_era / 1460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let mp = (5 * day_of_year + 2) / 153;
    let day = (day_of_year - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = year_of_era + era * 400;
    (if month <= 2 { year + 1 } else { year }, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_only_is_midnight_utc() {
        let t = Timestamp::parse_iso8601("1970-01-02").unwrap();
        assert_eq!(t.as_unix_seconds(), 86_400.0);
    }

    #[test]
    fn test_parse_full_utc_timestamp() {
        let t = Timestamp::parse_iso8601("2018-02-10T12:30:15Z").unwrap();
        assert_eq!(t.as_unix_seconds(), 1_518_265_815.0);
    }

    #[test]
    fn test_parse_applies_zone_offset() {
        let utc = Timestamp::parse_iso8601("2020-06-01T10:00:00Z").unwrap();
        let plus_two = Timestamp::parse_iso8601("2020-06-01T12:00:00+02:00").unwrap();
        let minus = Timestamp::parse_iso8601("2020-06-01T05:30:00-0430").unwrap();
        assert_eq!(utc, plus_two);
        assert_eq!(utc, minus);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Timestamp::parse_iso8601("yesterday").is_err());
        assert!(Timestamp::parse_iso8601("2021-02-30").is_err());
        assert!(Timestamp::parse_iso8601("2021-13-01T00:00Z").is_err());
    }

    #[test]
    fn test_display_formats_iso8601() {
        let t = Timestamp::from_unix_seconds(1_518_265_815.0);
        assert_eq!(t.to_string(), "2018-02-10T12:30:15Z");
        let fractional = Timestamp::from_unix_seconds(0.25);
        assert_eq!(fractional.to_string(), "1970-01-01T00:00:00.250Z");
    }

    #[test]
    fn test_display_parses_back() {
        let t = Timestamp::from_unix_seconds(951_782_400.0); // 2000-02-29
        let parsed = Timestamp::parse_iso8601(&t.to_string()).unwrap();
        assert_eq!(t, parsed);
    }

    #[test]
    fn test_add_seconds_moves_forward() {
        let t = Timestamp::UNIX_EPOCH.add_seconds(30.0);
        assert_eq!(t.seconds_since(Timestamp::UNIX_EPOCH), 30.0);
        assert!(t > Timestamp::UNIX_EPOCH);
    }
}
