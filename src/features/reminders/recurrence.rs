//! Next-occurrence computation for recurring reminders.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.3.0
//! - **Toggleable**: false

use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Timelike, Utc};

use super::Recurrence;

/// Apply one recurrence step to `base`. Calendar steps clamp the day when the
/// target month is shorter (Jan 31 + 1 month = Feb 28/29).
fn step(base: DateTime<Utc>, recurrence: Recurrence) -> Option<DateTime<Utc>> {
    match recurrence {
        Recurrence::Daily => base.checked_add_signed(Duration::days(1)),
        Recurrence::Weekly => base.checked_add_signed(Duration::weeks(1)),
        Recurrence::Monthly => base.checked_add_months(Months::new(1)),
        Recurrence::Yearly => base.checked_add_months(Months::new(12)),
        Recurrence::None => None,
    }
}

/// Compute the next occurrence of a recurring reminder.
///
/// The candidate is rebuilt from `last_occurrence_utc` with the time-of-day
/// forced back to the anchor hour/minute, so an occurrence whose time was
/// adjusted (past-time rollover, DST) cannot drift the schedule. When the
/// first candidate is not strictly after `now_utc` (a dispatch outage, for
/// example), the step is applied again until it is, skipping the missed
/// cycles instead of queuing a backlog.
///
/// Returns `None` for [`Recurrence::None`] (nothing to reschedule).
pub fn next_occurrence(
    last_occurrence_utc: DateTime<Utc>,
    recurrence: Recurrence,
    anchor_hour_utc: u32,
    anchor_minute_utc: u32,
    now_utc: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let base = Utc
        .with_ymd_and_hms(
            last_occurrence_utc.year(),
            last_occurrence_utc.month(),
            last_occurrence_utc.day(),
            anchor_hour_utc.min(23),
            anchor_minute_utc.min(59),
            0,
        )
        .single()?;

    let mut candidate = step(base, recurrence)?;
    while candidate <= now_utc {
        candidate = step(candidate, recurrence)?;
    }
    Some(candidate)
}
