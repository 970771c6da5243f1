use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
];

const ZONED_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f %z"];

static LEADING_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*\[?(\d{4}[-/]\d{2}[-/]\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2}| UTC)?)\]?",
    )
    .expect("leading timestamp regex is valid")
});

/// Parses a timestamp using every format CI providers commonly print.
///
/// Accepts RFC 3339 (any fractional precision, any offset), naive
/// `YYYY-MM-DD HH:MM:SS[.fff]` in either separator style, slash dates, a
/// trailing `UTC`, and unix seconds. Naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ZONED_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(raw, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }

    let naive = raw
        .strip_suffix(" UTC")
        .or_else(|| raw.strip_suffix('Z'))
        .unwrap_or(raw);
    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(naive, format) {
            return Some(Utc.from_utc_datetime(&parsed));
        }
    }

    parse_unix_seconds(raw)
}

fn parse_unix_seconds(raw: &str) -> Option<DateTime<Utc>> {
    let (whole, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let seconds: i64 = whole.parse().ok()?;
    let nanos = if fraction.is_empty() {
        0
    } else {
        let digits: String = fraction.chars().chain(std::iter::repeat('0')).take(9).collect();
        digits.parse().ok()?
    };
    DateTime::from_timestamp(seconds, nanos)
}

/// Splits a leading timestamp off a log line.
///
/// Returns the raw timestamp text and the remainder of the line. The raw
/// text is returned even when it does not parse, so callers can tell an
/// unparsable timestamp apart from a missing one.
pub fn split_leading_timestamp(line: &str) -> Option<(&str, &str)> {
    let captures = LEADING_TIMESTAMP.captures(line)?;
    let whole = captures.get(0)?;
    let stamp = captures.get(1)?;
    Some((stamp.as_str(), &line[whole.end()..]))
}

/// Seconds from `start` to `end`, or `None` if the span is negative.
#[allow(clippy::cast_precision_loss)]
pub fn span_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<f64> {
    let span = end.signed_duration_since(start);
    let millis = span.num_milliseconds();
    (millis >= 0).then(|| millis as f64 / 1000.0)
}
