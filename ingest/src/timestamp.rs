//! Extraction of "as of" timestamps from free-form upstream text.
//!
//! Upstream sources publish wall clock times in Indian Standard Time. All
//! parsers here normalize to UTC by subtracting the fixed 5h30m offset.

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::RefreshError;

const IST_OFFSET_MILLIS: i64 = 330 * 60 * 1000;
const HALF_DAY_MILLIS: i64 = 12 * 3600 * 1000;

// "as on 31.03.2020 at 08:00 PM"
static DOTTED_12H: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)as on (\d{2})\.(\d{2})\.(\d{4}) at (\d{2}):(\d{2})\s*([AP]M)").unwrap()
});

// "as on : 18 April 2020, 08:00 GMT+5:30"
static MONTH_NAME_24H: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)as on\s*:?\s*(\d{1,2})\s+([a-z]+)\s+(\d{4}),?\s*(\d{1,2}):(\d{2})").unwrap()
});

// "31/03/2020 20:00:00" or "1/4/2020 9.00 pm"
static TESTING_UPDATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)/(\d+)/(\d+) (\d{1,2})[:.](\d{1,2})([:.]\d{1,2})?").unwrap()
});

// "2020-03-31 9:30:00"
static ISO_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2}) (\d{1,2}):(\d{2}):(\d{2})").unwrap());

/// Returns the origin update time mentioned in `content` as milliseconds since
/// the epoch, or `0` when no known pattern matches. `0` means the timestamp is
/// unknown and must never be treated as a valid update.
pub fn parse_origin_update(content: &str) -> i64 {
    parse_dotted_12h(content)
        .or_else(|| parse_month_name_24h(content))
        .unwrap_or(0)
}

fn parse_dotted_12h(content: &str) -> Option<i64> {
    let caps = DOTTED_12H.captures(content)?;
    let day = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let year = caps[3].parse().ok()?;
    let hour = caps[4].parse().ok()?;
    let minute = caps[5].parse().ok()?;
    let is_pm = caps[6].eq_ignore_ascii_case("pm");

    let mut time = ist_wall_clock_millis(year, month, day, hour, minute)?;
    if is_pm {
        time += HALF_DAY_MILLIS;
    }
    Some(time)
}

fn parse_month_name_24h(content: &str) -> Option<i64> {
    let caps = MONTH_NAME_24H.captures(content)?;
    let day = caps[1].parse().ok()?;
    let month = month_from_name(&caps[2])?;
    let year = caps[3].parse().ok()?;
    let hour = caps[4].parse().ok()?;
    let minute = caps[5].parse().ok()?;

    ist_wall_clock_millis(year, month, day, hour, minute)
}

fn month_from_name(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let name = name.to_ascii_lowercase();
    if name.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| name.starts_with(m))
        .map(|idx| idx as u32 + 1)
}

fn ist_wall_clock_millis(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<i64> {
    let wall_clock = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
    Some(wall_clock.and_utc().timestamp_millis() - IST_OFFSET_MILLIS)
}

/// Parses the `updatetimestamp` column of the testing feed. Accepts `:` or `.`
/// as the minute separator, optional seconds and an optional trailing am/pm.
pub fn parse_testing_timestamp(content: &str) -> Result<DateTime<Utc>, RefreshError> {
    let invalid = || RefreshError::ParseFailure(format!("invalid timestamp in testing data: {content}"));

    let lowered = content.trim().to_lowercase();
    let caps = TESTING_UPDATE.captures(&lowered).ok_or_else(invalid)?;
    let day: u32 = caps[1].parse().map_err(|_| invalid())?;
    let month: u32 = caps[2].parse().map_err(|_| invalid())?;
    let year: i32 = caps[3].parse().map_err(|_| invalid())?;
    let mut hour: u32 = caps[4].parse().map_err(|_| invalid())?;
    let minute: u32 = caps[5].parse().map_err(|_| invalid())?;
    if lowered.ends_with("pm") {
        hour += 12;
    }

    // Hours past 23 roll over into the next day, matching how the feed is
    // published ("12:30 pm" style entries).
    let midnight = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(invalid)?;
    let millis = midnight.and_utc().timestamp_millis()
        + (hour as i64 * 3600 + minute as i64 * 60) * 1000
        - IST_OFFSET_MILLIS;

    from_millis(millis).ok_or_else(invalid)
}

/// Parses a `YYYY-MM-DD H:MM:SS` timestamp that is already expressed in UTC.
/// Returns the epoch when nothing matches.
pub fn parse_utc_datetime(content: &str) -> DateTime<Utc> {
    ISO_LIKE
        .captures(content)
        .and_then(|caps| {
            let date = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
            let time = date.and_hms_opt(
                caps[2].parse().ok()?,
                caps[3].parse().ok()?,
                caps[4].parse().ok()?,
            )?;
            Some(time.and_utc())
        })
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// ISO-8601 rendering with millisecond precision, e.g. `2020-03-31T14:30:00.000Z`.
pub fn to_iso_millis(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Calendar day (UTC) of an instant as `YYYY-MM-DD`.
pub fn day_of(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d").to_string()
}

/// Serde adapter that writes timestamps as [`to_iso_millis`] strings.
pub mod iso_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::to_iso_millis(time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
