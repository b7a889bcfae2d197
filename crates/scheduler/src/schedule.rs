//! Next-run computation for all schedule frequencies.

use {
    chrono::{
        DateTime, Datelike, Days, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime,
        TimeZone, Timelike, Utc,
    },
    chrono_tz::Tz,
};

use crate::{
    Error, Result,
    types::{Recurrence, ScheduleSpec, TimeOfDay},
};

/// Weekday used when a weekly schedule lists none (Monday, Sunday = 0).
pub const DEFAULT_WEEKDAY: u8 = 1;

/// Day used when a monthly schedule names none.
pub const DEFAULT_DAY_OF_MONTH: u8 = 1;

/// Longest wall-clock gap we step over when a local time does not exist.
const MAX_GAP_MINUTES: i64 = 180;

/// Compute the next instant strictly after `now` at which `spec` fires.
///
/// Time-of-day fields are evaluated in `spec.timezone`. The `enabled` flag is
/// not consulted; callers decide whether a disabled schedule runs at all.
pub fn compute_next_run(spec: &ScheduleSpec, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    spec.validate()?;
    let tz = spec.tz()?;

    let next = match &spec.recurrence {
        Recurrence::Hourly => Some(next_hour(now, tz)),
        Recurrence::Daily { time } => {
            next_on_matching_day(now, tz, time_or_default(*time), 1, |_| true)
        },
        Recurrence::Weekly { time, days_of_week } => {
            let days: Vec<u8> = match days_of_week {
                Some(days) => days.iter().copied().collect(),
                None => vec![DEFAULT_WEEKDAY],
            };
            next_on_matching_day(now, tz, time_or_default(*time), 7, |date| {
                days.contains(&(date.weekday().num_days_from_sunday() as u8))
            })
        },
        Recurrence::Monthly { time, day_of_month } => next_monthly(
            now,
            tz,
            time_or_default(*time),
            day_of_month.unwrap_or(DEFAULT_DAY_OF_MONTH),
        ),
    };

    next.filter(|next| *next > now).ok_or_else(|| {
        Error::schedule_config(format!("no upcoming {} run", spec.recurrence.as_str()))
    })
}

fn time_or_default(time: Option<TimeOfDay>) -> TimeOfDay {
    time.unwrap_or(TimeOfDay::DEFAULT)
}

/// Start of the next clock hour in `tz`.
fn next_hour(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);
    let into_hour = Duration::minutes(i64::from(local.minute()))
        + Duration::seconds(i64::from(local.second()))
        + Duration::nanoseconds(i64::from(local.nanosecond()));
    now - into_hour + Duration::hours(1)
}

/// Scan forward from today's local date (up to `horizon` extra days) for the
/// first day accepted by `matches` whose candidate is still in the future.
fn next_on_matching_day(
    now: DateTime<Utc>,
    tz: Tz,
    time: TimeOfDay,
    horizon: u64,
    matches: impl Fn(NaiveDate) -> bool,
) -> Option<DateTime<Utc>> {
    let today = now.with_timezone(&tz).date_naive();
    (0..=horizon)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .filter(|date| matches(*date))
        .map(|date| resolve_local(tz, date, time))
        .find(|candidate| *candidate > now)
}

/// `day_of_month` in the current local month, or the following month when
/// that has passed. Days beyond a month's length clamp to its last day.
fn next_monthly(
    now: DateTime<Utc>,
    tz: Tz,
    time: TimeOfDay,
    day_of_month: u8,
) -> Option<DateTime<Utc>> {
    let local = now.with_timezone(&tz);
    let (mut year, mut month) = (local.year(), local.month());
    for _ in 0..2 {
        let day = u32::from(day_of_month).min(last_day_of_month(year, month)?);
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let candidate = resolve_local(tz, date, time);
        if candidate > now {
            return Some(candidate);
        }
        (year, month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };
    }
    None
}

/// Number of days in the given month.
#[must_use]
pub fn last_day_of_month(year: i32, month: u32) -> Option<u32> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    first_of_next.pred_opt().map(|d| d.day())
}

/// Turn a local wall time into an instant.
///
/// Ambiguous times (clocks going back) take the earlier instant; times that
/// fall into a gap (clocks going forward) move to the first instant after it.
pub(crate) fn resolve_local(tz: Tz, date: NaiveDate, time: TimeOfDay) -> DateTime<Utc> {
    let naive_time = NaiveTime::from_hms_opt(u32::from(time.hour()), u32::from(time.minute()), 0)
        .unwrap_or(NaiveTime::MIN);
    let naive = date.and_time(naive_time);

    if let Some(dt) = first_valid(tz, naive) {
        return dt;
    }
    (1..=MAX_GAP_MINUTES)
        .find_map(|m| first_valid(tz, naive + Duration::minutes(m)))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

fn first_valid(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}
