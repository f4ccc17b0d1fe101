//! Conversions between stored unix seconds and the plant's local calendar.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};

/// Format accepted for user-supplied batch start/end times.
pub const MINUTE_FORMAT: &str = "%Y-%m-%dT%H:%M";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Unix seconds at local midnight starting `date`.
pub fn day_start(date: NaiveDate) -> i64 {
    local_to_unix(date.and_time(NaiveTime::MIN))
}

/// Half-open unix-seconds range covering `from..=to` local days.
pub fn day_range(from: NaiveDate, to: NaiveDate) -> (i64, i64) {
    let end = to.succ_opt().map(day_start).unwrap_or(i64::MAX);
    (day_start(from), end)
}

pub fn local_to_unix(naive: NaiveDateTime) -> i64 {
    // DST gaps have no local midnight; take the earliest valid instant.
    match Local.from_local_datetime(&naive).earliest() {
        Some(dt) => dt.timestamp(),
        None => naive.and_utc().timestamp(),
    }
}

pub fn to_local(ts: i64) -> Option<DateTime<Local>> {
    Local.timestamp_opt(ts, 0).single()
}

/// `YYYY-MM-DD HH:MM:SS` in local time, empty for an invalid instant.
pub fn format_local(ts: i64) -> String {
    to_local(ts)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

/// Parse a `%Y-%m-%dT%H:%M` local time into unix seconds.
pub fn parse_minute(s: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(s.trim(), MINUTE_FORMAT)
        .ok()
        .map(local_to_unix)
}

/// Local instant of an entry's stored date and time columns.
pub fn entry_instant(date: &str, time: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(local_to_unix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_range_spans_one_day() {
        let d = parse_date("2024-03-05").unwrap();
        let (start, end) = day_range(d, d);
        assert!(end - start >= 23 * 3600 && end - start <= 25 * 3600);
    }

    #[test]
    fn test_parse_minute_rejects_other_formats() {
        assert!(parse_minute("2024-03-05T08:30").is_some());
        assert!(parse_minute("2024-03-05 08:30").is_none());
        assert!(parse_minute("").is_none());
    }

    #[test]
    fn test_entry_instant_round_trips_through_format() {
        let ts = entry_instant("2024-03-05", "08:30:15").unwrap();
        assert_eq!(format_local(ts), "2024-03-05 08:30:15");
    }
}
