//! Human-readable rendering of an agent's next run.

use {
    chrono::{DateTime, Utc},
    chrono_tz::Tz,
};

/// Describe `next_run_at` relative to `now`, as shown on the operator dashboard.
///
/// Anything a day or more away is rendered as weekday, date and time in `tz`.
#[must_use]
pub fn format_next_run(next_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>, tz: Tz) -> String {
    let Some(next) = next_run_at else {
        return "Not scheduled".to_string();
    };

    let diff_ms = (next - now).num_milliseconds();
    if diff_ms < 0 {
        return "Overdue".to_string();
    }

    let minutes = (diff_ms as f64 / 60_000.0).round() as i64;
    let hours_exact = diff_ms as f64 / 3_600_000.0;
    if hours_exact < 1.0 {
        return format!("In {minutes} minute{}", plural(minutes));
    }
    if hours_exact < 24.0 {
        let hours = hours_exact.round() as i64;
        return format!("In {hours} hour{}", plural(hours));
    }

    next.with_timezone(&tz)
        .format("%a, %b %-d, %-I:%M %p")
        .to_string()
}

fn plural(n: i64) -> &'static str {
    if n == 1 { "" } else { "s" }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        chrono::{Duration, TimeZone},
        rstest::rstest,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_not_scheduled() {
        assert_eq!(format_next_run(None, now(), Tz::UTC), "Not scheduled");
    }

    #[rstest]
    #[case(Duration::minutes(-1), "Overdue")]
    #[case(Duration::seconds(0), "In 0 minutes")]
    #[case(Duration::minutes(1), "In 1 minute")]
    #[case(Duration::minutes(45), "In 45 minutes")]
    #[case(Duration::minutes(60), "In 1 hour")]
    #[case(Duration::minutes(190), "In 3 hours")]
    #[case(Duration::minutes(23 * 60 + 40), "In 24 hours")]
    fn test_relative(#[case] ahead: Duration, #[case] expected: &str) {
        assert_eq!(format_next_run(Some(now() + ahead), now(), Tz::UTC), expected);
    }

    #[test]
    fn test_far_future_uses_timezone() {
        // 2025-01-17T19:30Z is Friday 2:30 PM in New York.
        let next = Utc.with_ymd_and_hms(2025, 1, 17, 19, 30, 0).unwrap();
        assert_eq!(
            format_next_run(Some(next), now(), chrono_tz::America::New_York),
            "Fri, Jan 17, 2:30 PM"
        );
    }
}
