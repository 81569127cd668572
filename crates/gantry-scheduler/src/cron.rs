use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Parses one of the five whitespace-separated fields of a standard
/// `minute hour day-of-month month day-of-week` cron expression: `*`,
/// a bare number, a comma list, or a `*/step`.
fn field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        return step.parse::<u32>().map(|s| s != 0 && value % s == 0).unwrap_or(false);
    }
    field.split(',').any(|part| part.trim().parse::<u32>() == Ok(value))
}

/// Returns `Err` for anything that isn't exactly five fields; callers
/// should surface this at trigger-registration time rather than at
/// every tick.
pub fn validate(expression: &str) -> Result<(), String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(format!(
            "expected 5 cron fields (minute hour dom month dow), got {}",
            fields.len()
        ));
    }
    Ok(())
}

/// Whether `expression` (in `timezone`, an IANA name) matches the wall-clock
/// minute of `now_utc`. Returns `false` (never fires) on a malformed
/// expression or timezone rather than erroring, since the scheduler ticks
/// continuously and a single bad trigger shouldn't need special-casing at
/// every tick.
pub fn matches(expression: &str, timezone: &str, now_utc: DateTime<Utc>) -> bool {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    let Ok(tz): Result<Tz, _> = timezone.parse() else {
        return false;
    };
    let local = now_utc.with_timezone(&tz);

    field_matches(fields[0], local.minute())
        && field_matches(fields[1], local.hour())
        && field_matches(fields[2], local.day())
        && field_matches(fields[3], local.month())
        && field_matches(fields[4], local.weekday().num_days_from_sunday())
}

/// Stable per-minute key used for the minute-boundary duplicate-firing
/// guard; two ticks landing in the same wall-clock minute (in UTC, since
/// the guard only needs to distinguish "already handled this tick" and
/// does not need to be timezone-aware) produce the same key.
pub fn minute_key(now_utc: DateTime<Utc>) -> i64 {
    now_utc.timestamp() / 60
}

/// Brute-forces the next minute-aligned UTC instant after `from` at which
/// `expression` matches, searching up to a year ahead. Used only to
/// populate a Cron Job's informational `next_run_at_ms`; firing itself
/// still works off `matches` at each tick, not off this value.
pub fn next_fire_after(expression: &str, timezone: &str, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return None;
    }
    let _: Tz = timezone.parse().ok()?;
    let mut candidate = (from + chrono::Duration::minutes(1))
        .with_second(0)
        .and_then(|d| d.with_nanosecond(0))?;
    for _ in 0..(366 * 24 * 60) {
        if matches(expression, timezone, candidate) {
            return Some(candidate);
        }
        candidate += chrono::Duration::minutes(1);
    }
    None
}

pub fn parse_timezone(timezone: &Option<String>) -> Tz {
    timezone
        .as_deref()
        .and_then(|tz| tz.parse().ok())
        .unwrap_or(chrono_tz::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    #[test]
    fn rejects_malformed_expressions() {
        assert!(validate("* * *").is_err());
        assert!(validate("* * * * *").is_ok());
    }

    #[test]
    fn matches_every_minute_expression() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 13, 30, 0).unwrap();
        assert!(matches("* * * * *", "UTC", now));
    }

    #[test]
    fn matches_specific_hour_and_minute() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 9, 0, 0).unwrap();
        assert!(matches("0 9 * * *", "UTC", now));
        let off = Utc.with_ymd_and_hms(2026, 7, 28, 9, 1, 0).unwrap();
        assert!(!matches("0 9 * * *", "UTC", off));
    }

    #[test]
    fn step_expression_matches_every_fifteen_minutes() {
        let hit = Utc.with_ymd_and_hms(2026, 7, 28, 0, 45, 0).unwrap();
        assert!(matches("*/15 * * * *", "UTC", hit));
        let miss = Utc.with_ymd_and_hms(2026, 7, 28, 0, 50, 0).unwrap();
        assert!(!matches("*/15 * * * *", "UTC", miss));
    }

    #[test]
    fn unknown_timezone_never_matches() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 9, 0, 0).unwrap();
        assert!(!matches("0 9 * * *", "Mars/OlympusMons", now));
    }

    #[test]
    fn next_fire_after_finds_the_following_matching_minute() {
        let from = Utc.with_ymd_and_hms(2026, 7, 28, 9, 0, 0).unwrap();
        let next = next_fire_after("0 9 * * *", "UTC", from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 29, 9, 0, 0).unwrap());
    }

    #[test]
    fn next_fire_after_rejects_malformed_expression() {
        assert!(next_fire_after("* * *", "UTC", Utc::now()).is_none());
    }
}
