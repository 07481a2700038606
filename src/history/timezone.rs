use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// One year of quarter hours.
const EQUIVALENCE_STEPS: i64 = 365 * 24 * 4;

pub fn parse_timezone(name: &str) -> CoreResult<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| CoreError::validation(format!("invalid timezone: {name}")))
}

/// Two zones are interchangeable for bucketing when their wall clocks agree at every quarter hour
/// for a year starting at `reference`.
pub fn timezones_equivalent(a: Tz, b: Tz, reference: DateTime<Utc>) -> bool {
    if a == b {
        return true;
    }
    (1..=EQUIVALENCE_STEPS).all(|step| {
        let instant = reference + Duration::minutes(15 * step);
        let left = instant.with_timezone(&a);
        let right = instant.with_timezone(&b);
        left.year() == right.year()
            && left.month() == right.month()
            && left.day() == right.day()
            && left.hour() == right.hour()
            && left.minute() == right.minute()
    })
}

/// Maps a wall-clock time to an instant. Ambiguous times take the earlier instant, times inside a
/// DST gap move forward to the first valid wall-clock hour.
pub(crate) fn resolve_local(tz: Tz, naive: NaiveDateTime) -> CoreResult<DateTime<Utc>> {
    let mut candidate = naive;
    // the longest historical gaps skip a whole calendar day
    for _ in 0..=48 {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return Ok(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earlier, later) => {
                return Ok(earlier.with_timezone(&Utc).min(later.with_timezone(&Utc)))
            }
            LocalResult::None => candidate += Duration::hours(1),
        }
    }
    Err(CoreError::validation(format!(
        "local time {naive} does not exist in {tz}"
    )))
}
