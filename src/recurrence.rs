/*!
 # Recurrence engine

 Pure functions over a slice of schedules and a local "now". Nothing in
 here reads a clock, takes a lock or fails: the controller supplies the
 time and acts on the answers.

 Windows open at their start minute (inclusive) and close at their end
 minute (exclusive). A window whose end is earlier than its start runs
 across midnight.
*/

use chrono::{Datelike, NaiveDateTime, TimeDelta, Timelike};
use tracing::trace;

use crate::schedule::Schedule;

/// Wire value for "no upcoming event" where a plain number is required
pub const NO_EVENT_SECONDS: u32 = u32::MAX;

/// Days scanned by [`next_occurrence`]: one week plus one so the scan
/// still wraps around after skipping past today.
const SEARCH_DAYS: u32 = 8;

/// Minutes since midnight
pub fn minutes_of_day(time: &NaiveDateTime) -> u16 {
    (time.hour() * 60 + time.minute()) as u16
}

/// Day of the week, 0 = Sunday
pub fn weekday_of(time: &NaiveDateTime) -> u8 {
    time.weekday().num_days_from_sunday() as u8
}

/// Whether `now` falls in the window `start..end` (minute resolution)
pub fn is_time_in_range(
    now: &NaiveDateTime,
    start_hour: u8,
    start_minute: u8,
    end_hour: u8,
    end_minute: u8,
) -> bool {
    let current = minutes_of_day(now);
    let start = start_hour as u16 * 60 + start_minute as u16;
    let end = end_hour as u16 * 60 + end_minute as u16;

    if start <= end {
        current >= start && current < end
    } else {
        // Spans midnight
        current >= start || current < end
    }
}

/// Whether `schedule` is enabled, set for today's weekday and inside its window
pub fn is_active(schedule: &Schedule, now: &NaiveDateTime) -> bool {
    schedule.enabled
        && schedule.is_day_enabled(weekday_of(now))
        && is_time_in_range(
            now,
            schedule.start_hour,
            schedule.start_minute,
            schedule.end_hour,
            schedule.end_minute,
        )
}

/// First active schedule in store order
pub fn first_active<'a>(schedules: &'a [Schedule], now: &NaiveDateTime) -> Option<&'a Schedule> {
    schedules.iter().find(|s| is_active(s, now))
}

pub fn any_active(schedules: &[Schedule], now: &NaiveDateTime) -> bool {
    first_active(schedules, now).is_some()
}

/// Next instant strictly after `from` at which `schedule` opens
///
/// `None` when the schedule is disabled or has no days set.
pub fn next_occurrence(schedule: &Schedule, from: &NaiveDateTime) -> Option<NaiveDateTime> {
    if !schedule.enabled || schedule.day_mask == 0 {
        return None;
    }

    // Start from the next minute so the current instant never matches
    let mut next = *from + TimeDelta::minutes(1);

    for _ in 0..SEARCH_DAYS {
        if schedule.is_day_enabled(weekday_of(&next)) {
            let candidate = next
                .date()
                .and_hms_opt(schedule.start_hour as u32, schedule.start_minute as u32, 0);

            if let Some(candidate) = candidate.filter(|c| c > from) {
                trace!("Schedule {} next opens at {}", schedule.id, candidate);
                return Some(candidate);
            }
        }

        next += TimeDelta::days(1);
    }

    None
}

/// Earliest upcoming start across all enabled schedules
pub fn next_start(schedules: &[Schedule], now: &NaiveDateTime) -> Option<NaiveDateTime> {
    schedules
        .iter()
        .filter_map(|s| next_occurrence(s, now))
        .min()
}

/// When the window of an active `schedule` closes
///
/// Today's date at the end time, plus one day whenever the window spans
/// midnight. Seen after midnight that lands on the following night's end.
pub fn current_window_end(schedule: &Schedule, now: &NaiveDateTime) -> Option<NaiveDateTime> {
    let end_today = now
        .date()
        .and_hms_opt(schedule.end_hour as u32, schedule.end_minute as u32, 0)?;

    if schedule.spans_midnight() {
        Some(end_today + TimeDelta::days(1))
    } else {
        Some(end_today)
    }
}

/// Earliest end among the schedules active at `now`
///
/// Schedules that have not started yet have no end to report.
pub fn next_end(schedules: &[Schedule], now: &NaiveDateTime) -> Option<NaiveDateTime> {
    schedules
        .iter()
        .filter(|s| is_active(s, now))
        .filter_map(|s| current_window_end(s, now))
        .min()
}

/// Seconds until the next start or end, whichever comes first
pub fn seconds_until_next_event(schedules: &[Schedule], now: &NaiveDateTime) -> Option<u32> {
    [next_start(schedules, now), next_end(schedules, now)]
        .into_iter()
        .flatten()
        .filter(|event| event > now)
        .filter_map(|event| u32::try_from((event - *now).num_seconds()).ok())
        .min()
}
