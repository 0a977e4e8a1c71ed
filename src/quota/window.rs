//! Weekly quota window boundaries.
//!
//! A window ends at midnight at the start of a fixed weekday, in the
//! server's local time zone. Deployments spanning several time zones
//! reset at different instants per host.

use std::time::Duration;

use chrono::{DateTime, Datelike, Days, LocalResult, NaiveDateTime, TimeZone, Weekday};

/// Fallback window length when the computed boundary is unusable.
pub const FALLBACK_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// The next midnight that starts `weekday`, strictly after `now`'s date.
///
/// Calling on the reset weekday itself yields the same weekday one week
/// later, so a counter created at 00:00:01 on that day lives a full week.
pub fn next_reset<Tz: TimeZone>(now: &DateTime<Tz>, weekday: Weekday) -> DateTime<Tz> {
    let today = now.weekday().num_days_from_sunday();
    let target = weekday.num_days_from_sunday();
    let mut days_until = (target + 7 - today) % 7;
    if days_until == 0 {
        days_until = 7;
    }

    let date = now.date_naive() + Days::new(u64::from(days_until));
    let midnight: NaiveDateTime = date.and_time(chrono::NaiveTime::MIN);
    local_instant(&now.timezone(), midnight)
        .unwrap_or_else(|| now.clone() + chrono::Duration::days(i64::from(days_until)))
}

/// Time left from `now` until `reset`, falling back to a full week when the
/// boundary is not in the future.
pub fn ttl_until<Tz: TimeZone>(now: &DateTime<Tz>, reset: &DateTime<Tz>) -> Duration {
    reset
        .clone()
        .signed_duration_since(now.clone())
        .to_std()
        .ok()
        .filter(|d| !d.is_zero())
        .unwrap_or(FALLBACK_WINDOW)
}

/// Resolve a wall-clock time, stepping past a DST gap if midnight does not
/// exist on that day.
fn local_instant<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => tz
            .from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest(),
    }
}
