use {
    anyhow::{Context, Result, bail},
    autopilot_scheduler::{compute_next_run, format::format_next_run, types::ScheduleSpec},
    chrono::{DateTime, Utc},
    serde::Serialize,
};

use crate::context::{parse_tz, print_json, read_json_arg};

/// Parse a schedule from JSON, filling in `timezone` when it is missing.
pub fn parse_schedule(raw: &str, default_timezone: &str) -> Result<ScheduleSpec> {
    let mut value: serde_json::Value =
        serde_json::from_str(raw).context("schedule is not valid JSON")?;
    let Some(obj) = value.as_object_mut() else {
        bail!("schedule must be a JSON object");
    };
    obj.entry("timezone")
        .or_insert_with(|| default_timezone.into());

    let spec: ScheduleSpec = serde_json::from_value(value).context("invalid schedule")?;
    spec.validate()?;
    Ok(spec)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpcomingRun {
    at: DateTime<Utc>,
    local: String,
    relative: String,
}

/// The next `count` firings of `spec` after `now`.
pub fn upcoming_runs(
    spec: &ScheduleSpec,
    now: DateTime<Utc>,
    count: usize,
) -> Result<Vec<DateTime<Utc>>> {
    let mut runs = Vec::with_capacity(count);
    let mut cursor = now;
    for _ in 0..count {
        let next = compute_next_run(spec, cursor)?;
        runs.push(next);
        cursor = next;
    }
    Ok(runs)
}

pub fn next_run(
    spec_arg: &str,
    count: usize,
    default_timezone: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let spec = parse_schedule(&read_json_arg(spec_arg)?, default_timezone)?;
    let tz = parse_tz(&spec.timezone)?;
    let runs = upcoming_runs(&spec, now, count.max(1))?
        .into_iter()
        .map(|at| UpcomingRun {
            at,
            local: at.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z").to_string(),
            relative: format_next_run(Some(at), now, tz),
        })
        .collect::<Vec<_>>();
    print_json(&runs)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, autopilot_scheduler::types::Recurrence, chrono::TimeZone};

    #[test]
    fn test_parse_schedule_fills_timezone() {
        let spec =
            parse_schedule(r#"{"frequency":"daily","time":"07:30"}"#, "Europe/Paris").unwrap();
        assert_eq!(spec.timezone, "Europe/Paris");
        assert!(spec.enabled);
        assert!(matches!(spec.recurrence, Recurrence::Daily { time: Some(_) }));
    }

    #[test]
    fn test_parse_schedule_keeps_explicit_timezone() {
        let spec = parse_schedule(
            r#"{"frequency":"hourly","timezone":"Asia/Kolkata"}"#,
            "UTC",
        )
        .unwrap();
        assert_eq!(spec.timezone, "Asia/Kolkata");
    }

    #[test]
    fn test_parse_schedule_rejects_invalid() {
        assert!(parse_schedule("[]", "UTC").is_err());
        assert!(parse_schedule(r#"{"frequency":"weekly","daysOfWeek":[]}"#, "UTC").is_err());
        assert!(
            parse_schedule(r#"{"frequency":"hourly","timezone":"Bad/Zone"}"#, "UTC").is_err()
        );
    }

    #[test]
    fn test_upcoming_daily_runs() {
        let spec = parse_schedule(r#"{"frequency":"daily","time":"09:00"}"#, "UTC").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let runs = upcoming_runs(&spec, now, 3).unwrap();
        assert_eq!(
            runs,
            vec![
                Utc.with_ymd_and_hms(2025, 3, 2, 9, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).unwrap(),
            ]
        );
    }
}
