use chrono::{DateTime, Duration, NaiveTime, SecondsFormat, Utc};

/// Next occurrence of `at` (UTC wall-clock) strictly after `now`.
pub fn next_daily_run(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Midnight UTC of the day containing `now`.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::default()).and_utc()
}

/// Whole minutes elapsed since `then`, floored at zero.
pub fn minutes_since(then: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - then).num_minutes().max(0)
}

/// Minutes until an interval-driven job is due again, given when it last ran.
pub fn minutes_until_due(
    last_run: Option<DateTime<Utc>>,
    interval: std::time::Duration,
    now: DateTime<Utc>,
) -> i64 {
    let Some(last_run) = last_run else {
        return 0;
    };
    let interval = Duration::from_std(interval).unwrap_or_else(|_| Duration::minutes(30));
    ((last_run + interval) - now).num_minutes().max(0)
}

/// Fixed-width RFC 3339 (UTC, milliseconds). Lexicographic order equals time order.
pub fn stream_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
