//! Best-effort parsing of customer-typed dates and times.
//!
//! Customers type things like "tomorrow 10am", "friday", or nothing useful
//! at all. Parsing is layered: strict formats first, then relative terms,
//! then a bare time of day. Callers decide what to do when everything
//! misses.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use regex::Regex;
use std::sync::OnceLock;

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*(am|pm)?\b").expect("valid time regex")
    })
}

/// Parse a free-text datetime relative to `now`. Returns `None` when
/// nothing recognizable is found; the booking path falls back to `now`
/// in that case.
pub fn parse_datetime(input: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    // Strict formats first.
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%d/%m/%Y %H:%M"] {
        if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(input, format) {
            return Some(ndt.and_utc());
        }
    }

    // A day reference, with an optional time of day in the remainder.
    let today = now.date_naive();
    if let Some(day) = parse_day(input, today) {
        let time = parse_time(input).unwrap_or(NaiveTime::from_hms_opt(9, 0, 0)?);
        return Some(day.and_time(time).and_utc());
    }

    // A bare time of day means today (or tomorrow if already past).
    if let Some(time) = parse_time(input) {
        let candidate = today.and_time(time).and_utc();
        if candidate > now {
            return Some(candidate);
        }
        return Some((today + Duration::days(1)).and_time(time).and_utc());
    }

    None
}

/// Parse a free-text day description relative to `today`.
///
/// Recognizes ISO dates, "today"/"tomorrow", and weekday names (resolved to
/// the next occurrence, up to a week out).
pub fn parse_day(input: &str, today: NaiveDate) -> Option<NaiveDate> {
    let lower = input.trim().to_lowercase();

    for format in ["%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(lower.trim(), format) {
            return Some(date);
        }
    }

    if lower.contains("today") {
        return Some(today);
    }
    if lower.contains("tomorrow") {
        return Some(today + Duration::days(1));
    }

    for (name, weekday) in [
        ("monday", Weekday::Mon),
        ("tuesday", Weekday::Tue),
        ("wednesday", Weekday::Wed),
        ("thursday", Weekday::Thu),
        ("friday", Weekday::Fri),
        ("saturday", Weekday::Sat),
        ("sunday", Weekday::Sun),
    ] {
        if lower.contains(name) {
            let mut day = today + Duration::days(1);
            for _ in 0..7 {
                if day.weekday() == weekday {
                    return Some(day);
                }
                day += Duration::days(1);
            }
        }
    }

    // An ISO date embedded in longer text ("on 2026-08-12 please").
    for word in lower.split_whitespace() {
        if let Ok(date) = NaiveDate::parse_from_str(word, "%Y-%m-%d") {
            return Some(date);
        }
    }

    None
}

/// Extract a time of day ("10am", "10:30", "2 pm") from free text.
pub fn parse_time(input: &str) -> Option<NaiveTime> {
    for captures in time_re().captures_iter(input) {
        let hour: u32 = captures.get(1)?.as_str().parse().ok()?;
        let minute: u32 = captures
            .get(2)
            .map(|m| m.as_str().parse().unwrap_or(0))
            .unwrap_or(0);
        let meridiem = captures.get(3).map(|m| m.as_str().to_lowercase());

        // A bare 1-2 digit number with no minutes or am/pm is more likely a
        // day-of-month or house number; skip it.
        if captures.get(2).is_none() && meridiem.is_none() {
            continue;
        }

        let hour = match meridiem.as_deref() {
            Some("pm") if hour < 12 => hour + 12,
            Some("am") if hour == 12 => 0,
            _ => hour,
        };
        if let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) {
            return Some(time);
        }
    }
    None
}
