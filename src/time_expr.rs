//! Parsing of user-supplied time boundaries such as `--since 2h`.
//!
//! Accepted forms, first match wins:
//! 1. all digits: a Unix timestamp in seconds
//! 2. ISO-8601 (RFC 3339, or a naive date/datetime taken as UTC)
//! 3. `<digits><unit>` relative to now, e.g. `30s`, `2h`, `5days`

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use crate::error::{Error, Result};

static RELATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\s*([A-Za-z]+)$").expect("relative time pattern is valid")
});

/// Parse `input` relative to the current time.
pub fn parse_time_expression(input: &str) -> Result<DateTime<Utc>> {
    parse_time_expression_at(input, Utc::now())
}

/// Parse `input`, resolving relative offsets against `now`.
pub fn parse_time_expression_at(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let trimmed = input.trim();
    let invalid = |reason: String| Error::InvalidTimeExpression {
        input: input.to_string(),
        reason,
    };

    if trimmed.is_empty() {
        return Err(invalid("empty time expression".to_string()));
    }

    if trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let secs: i64 = trimmed
            .parse()
            .map_err(|_| invalid("timestamp out of range".to_string()))?;
        return Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| invalid("timestamp out of range".to_string()));
    }

    if let Some(instant) = parse_iso8601(trimmed) {
        return Ok(instant);
    }

    let Some(captures) = RELATIVE.captures(trimmed) else {
        return Err(invalid(
            "expected a unix timestamp, an ISO-8601 date or an offset like 2h".to_string(),
        ));
    };

    let amount: i64 = captures[1]
        .parse()
        .map_err(|_| invalid("offset out of range".to_string()))?;
    let unit = &captures[2];
    let unit_millis = unit_millis(unit).ok_or_else(|| invalid(format!("unknown unit '{}'", unit)))?;

    amount
        .checked_mul(unit_millis)
        .and_then(Duration::try_milliseconds)
        .and_then(|offset| now.checked_sub_signed(offset))
        .ok_or_else(|| invalid("offset out of range".to_string()))
}

fn parse_iso8601(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(input) {
        return Some(instant.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn unit_millis(unit: &str) -> Option<i64> {
    const SECOND: i64 = 1_000;
    let millis = match unit.to_ascii_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => SECOND,
        "m" | "min" | "mins" | "minute" | "minutes" => 60 * SECOND,
        "h" | "hr" | "hrs" | "hour" | "hours" => 60 * 60 * SECOND,
        "d" | "day" | "days" => 24 * 60 * 60 * SECOND,
        _ => return None,
    };
    Some(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    #[test]
    fn test_unix_seconds() {
        let instant = parse_time_expression_at("1620000000", now()).unwrap();
        assert_eq!(instant.timestamp_millis(), 1_620_000_000_000);
    }

    #[test]
    fn test_unix_seconds_out_of_range() {
        let err = parse_time_expression_at("99999999999999999999", now()).unwrap_err();
        assert!(matches!(err, Error::InvalidTimeExpression { .. }));
    }

    #[test]
    fn test_iso8601() {
        let instant = parse_time_expression_at("2021-05-03T00:00:00Z", now()).unwrap();
        assert_eq!(instant.timestamp(), 1_620_000_000);

        let offset = parse_time_expression_at("2021-05-03T02:00:00+02:00", now()).unwrap();
        assert_eq!(offset, instant);

        let date_only = parse_time_expression_at("2021-05-03", now()).unwrap();
        assert_eq!(date_only, instant);
    }

    #[test]
    fn test_relative_offsets() {
        let base = now().timestamp_millis();
        let cases = [
            ("30s", 30_000),
            ("2h", 7_200_000),
            ("2 hours", 7_200_000),
            ("5days", 5 * 86_400_000),
            ("10min", 600_000),
            ("1hr", 3_600_000),
            ("3d", 3 * 86_400_000),
            ("15m", 900_000),
        ];
        for (input, millis) in cases {
            let instant = parse_time_expression_at(input, now()).unwrap();
            assert_eq!(instant.timestamp_millis(), base - millis, "input {input}");
        }
    }

    #[test]
    fn test_relative_to_wall_clock() {
        let before = Utc::now().timestamp_millis();
        let instant = parse_time_expression("2h").unwrap().timestamp_millis();
        let after = Utc::now().timestamp_millis();
        assert!(instant >= before - 7_200_000);
        assert!(instant <= after - 7_200_000);
    }

    #[test]
    fn test_unknown_unit_is_named() {
        let err = parse_time_expression_at("5fortnights", now()).unwrap_err();
        match err {
            Error::InvalidTimeExpression { input, reason } => {
                assert_eq!(input, "5fortnights");
                assert!(reason.contains("fortnights"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_garbage() {
        for input in ["not-a-time", "", "h2", "-5m"] {
            assert!(
                matches!(
                    parse_time_expression_at(input, now()),
                    Err(Error::InvalidTimeExpression { .. })
                ),
                "input {input:?}"
            );
        }
    }
}
