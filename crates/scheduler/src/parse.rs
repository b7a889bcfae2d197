//! Parsing utilities for times of day and absolute timestamps.

use chrono::{DateTime, Utc};

use crate::{Error, Result, types::TimeOfDay};

/// Parse a 24h `"HH:MM"` string.
///
/// Single-digit hours are accepted (`"9:30"`); minutes must be two digits.
pub fn parse_time_of_day(input: &str) -> Result<TimeOfDay> {
    let input = input.trim();
    let Some((h, m)) = input.split_once(':') else {
        return Err(Error::schedule_config(format!(
            "time of day must be HH:MM: {input:?}"
        )));
    };
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return Err(Error::schedule_config(format!(
            "time of day must be HH:MM: {input:?}"
        )));
    }
    let hour: u8 = h
        .parse()
        .map_err(|_| Error::schedule_config(format!("invalid hour in time of day: {h}")))?;
    let minute: u8 = m
        .parse()
        .map_err(|_| Error::schedule_config(format!("invalid minute in time of day: {m}")))?;
    TimeOfDay::new(hour, minute)
}

/// Parse an ISO 8601 timestamp into a UTC instant.
///
/// Accepts formats like `"2026-01-12T18:00:00Z"` or with a timezone offset.
pub fn parse_instant(input: &str) -> Result<DateTime<Utc>> {
    let dt = DateTime::parse_from_rfc3339(input.trim())?;
    Ok(dt.with_timezone(&Utc))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time() {
        let t = parse_time_of_day("14:30").unwrap();
        assert_eq!((t.hour(), t.minute()), (14, 30));
    }

    #[test]
    fn test_parse_time_single_digit_hour() {
        let t = parse_time_of_day(" 9:05 ").unwrap();
        assert_eq!((t.hour(), t.minute()), (9, 5));
    }

    #[test]
    fn test_parse_time_rejects_garbage() {
        assert!(parse_time_of_day("").is_err());
        assert!(parse_time_of_day("1430").is_err());
        assert!(parse_time_of_day("14:3").is_err());
        assert!(parse_time_of_day("ab:cd").is_err());
        assert!(parse_time_of_day("24:00").is_err());
    }

    #[test]
    fn test_parse_instant_utc() {
        let dt = parse_instant("2026-01-12T18:00:00Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-01-12T18:00:00+00:00");
    }

    #[test]
    fn test_parse_instant_with_offset() {
        let utc = parse_instant("2026-01-12T18:00:00Z").unwrap();
        let offset = parse_instant("2026-01-12T19:00:00+01:00").unwrap();
        assert_eq!(utc, offset);
    }

    #[test]
    fn test_parse_instant_invalid() {
        assert!(parse_instant("not a date").is_err());
    }
}
