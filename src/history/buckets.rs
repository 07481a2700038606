//! Bucket boundaries independent of stored data.
//!
//! Boundaries are counted from a fixed origin, `1900-01-01 00:00` local time (a Monday, so weekly
//! buckets start on Mondays). Fixed-length intervals advance uniformly from that origin using the
//! zone's standard offset, so DST switches do not shift the grid. Calendar intervals advance in
//! local wall-clock time and are then mapped back to instants.

use super::interval::{Interval, Step};
use super::timezone::resolve_local;
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Days, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::{OffsetComponents, Tz};

fn origin_local() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1900, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Boundary number `k` counted from the origin.
struct BucketGrid {
    interval: Interval,
    tz: Tz,
    fixed_origin: DateTime<Utc>,
}

impl BucketGrid {
    /// `anchor` selects the standard offset used by fixed-length intervals.
    fn new(interval: Interval, tz: Tz, anchor: DateTime<Utc>) -> Self {
        let standard_offset = tz
            .offset_from_utc_datetime(&anchor.naive_utc())
            .base_utc_offset();
        let fixed_origin = Utc.from_utc_datetime(&(origin_local() - standard_offset));
        Self {
            interval,
            tz,
            fixed_origin,
        }
    }

    fn boundary(&self, k: i64) -> CoreResult<DateTime<Utc>> {
        let out_of_range =
            || CoreError::validation(format!("{} bucket {k} is out of range", self.interval));
        match self.interval.step() {
            Step::Seconds(seconds) => {
                let offset = k.checked_mul(seconds).ok_or_else(out_of_range)?;
                self.fixed_origin
                    .checked_add_signed(Duration::seconds(offset))
                    .ok_or_else(out_of_range)
            }
            Step::Days(days) => {
                let total = u64::try_from(k)
                    .ok()
                    .and_then(|k| k.checked_mul(days))
                    .ok_or_else(out_of_range)?;
                let local = origin_local()
                    .checked_add_days(Days::new(total))
                    .ok_or_else(out_of_range)?;
                resolve_local(self.tz, local)
            }
            Step::Months(months) => {
                let total = u32::try_from(k)
                    .ok()
                    .and_then(|k| k.checked_mul(months))
                    .ok_or_else(out_of_range)?;
                let local = origin_local()
                    .checked_add_months(Months::new(total))
                    .ok_or_else(out_of_range)?;
                resolve_local(self.tz, local)
            }
        }
    }

    /// Largest `k` whose boundary is at or before `target`: gallop forward doubling the stride while
    /// it undershoots, then bisect the last stride.
    fn floor_index(&self, target: DateTime<Utc>) -> CoreResult<i64> {
        if self.boundary(0)? > target {
            return Err(CoreError::validation(format!(
                "timestamp {target} precedes the bucket origin"
            )));
        }
        let mut low = 0i64;
        let mut stride = 1i64;
        while self.boundary(low + stride)? <= target {
            low += stride;
            stride = stride.saturating_mul(2);
        }
        let mut high = low + stride;
        while high - low > 1 {
            let mid = low + (high - low) / 2;
            if self.boundary(mid)? <= target {
                low = mid;
            } else {
                high = mid;
            }
        }
        Ok(low)
    }
}

/// Every bucket boundary inside `[start, end]`, ascending.
pub fn generate_buckets(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Interval,
    tz: Tz,
) -> CoreResult<Vec<DateTime<Utc>>> {
    let grid = BucketGrid::new(interval, tz, start);
    let mut k = grid.floor_index(start)?;
    let mut buckets = Vec::new();
    loop {
        let boundary = grid.boundary(k)?;
        if boundary > end {
            break;
        }
        if boundary >= start {
            buckets.push(boundary);
        }
        k += 1;
    }
    Ok(buckets)
}

/// Instant of boundary zero for fixed-length intervals, the grid every `Step::Seconds` interval
/// shares around `anchor`.
pub fn fixed_origin(tz: Tz, anchor: DateTime<Utc>) -> DateTime<Utc> {
    BucketGrid::new(Interval::OneSecond, tz, anchor).fixed_origin
}

/// Start of the bucket containing `ts`.
pub fn bucket_floor(ts: DateTime<Utc>, interval: Interval, tz: Tz) -> CoreResult<DateTime<Utc>> {
    let grid = BucketGrid::new(interval, tz, ts);
    grid.boundary(grid.floor_index(ts)?)
}

/// Moves `ts` by `factor` intervals, using calendar arithmetic in `tz` for days and longer.
pub fn shift_by_intervals(
    ts: DateTime<Utc>,
    interval: Interval,
    factor: i32,
    tz: Tz,
) -> CoreResult<DateTime<Utc>> {
    let out_of_range = || CoreError::validation(format!("cannot shift {ts} by {factor} {interval}"));
    let local = ts.with_timezone(&tz).naive_local();
    let magnitude = factor.unsigned_abs();
    match interval.step() {
        Step::Seconds(seconds) => ts
            .checked_add_signed(Duration::seconds(seconds * i64::from(factor)))
            .ok_or_else(out_of_range),
        Step::Days(days) => {
            let days = Days::new(days * u64::from(magnitude));
            let shifted = if factor >= 0 {
                local.checked_add_days(days)
            } else {
                local.checked_sub_days(days)
            };
            resolve_local(tz, shifted.ok_or_else(out_of_range)?)
        }
        Step::Months(months) => {
            let months = Months::new(months * magnitude);
            let shifted = if factor >= 0 {
                local.checked_add_months(months)
            } else {
                local.checked_sub_months(months)
            };
            resolve_local(tz, shifted.ok_or_else(out_of_range)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike, Weekday};
    use chrono_tz::Europe::Vienna;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn fixed_interval_count_matches_span() {
        let start = utc(2024, 5, 1, 10, 0, 0);
        let cases = [
            (Interval::OneSecond, Duration::minutes(7)),
            (Interval::FifteenSeconds, Duration::hours(2)),
            (Interval::OneMinute, Duration::hours(5)),
            (Interval::FifteenMinutes, Duration::days(2)),
            (Interval::OneHour, Duration::days(20)),
        ];
        for (interval, span) in cases {
            let Step::Seconds(step) = interval.step() else {
                unreachable!()
            };
            let buckets = generate_buckets(start, start + span, interval, chrono_tz::UTC).unwrap();
            let expected = span.num_seconds() / step + 1;
            assert_eq!(buckets.len() as i64, expected, "{interval}");
            assert_eq!(buckets[0], start);
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let start = utc(2023, 11, 3, 7, 12, 0);
        let end = utc(2024, 2, 3, 7, 12, 0);
        let first = generate_buckets(start, end, Interval::OneDay, Vienna).unwrap();
        let second = generate_buckets(start, end, Interval::OneDay, Vienna).unwrap();
        assert_eq!(first, second);
        assert!(first.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn unaligned_start_begins_at_next_boundary() {
        let start = utc(2024, 5, 1, 10, 7, 30);
        let buckets =
            generate_buckets(start, utc(2024, 5, 1, 11, 0, 0), Interval::FifteenMinutes, chrono_tz::UTC)
                .unwrap();
        assert_eq!(
            buckets,
            vec![
                utc(2024, 5, 1, 10, 15, 0),
                utc(2024, 5, 1, 10, 30, 0),
                utc(2024, 5, 1, 10, 45, 0),
                utc(2024, 5, 1, 11, 0, 0),
            ]
        );
    }

    #[test]
    fn hourly_buckets_stay_on_the_hour_across_dst() {
        let start = utc(2024, 3, 30, 20, 0, 0);
        let end = utc(2024, 3, 31, 4, 0, 0);
        let buckets = generate_buckets(start, end, Interval::OneHour, Vienna).unwrap();
        assert_eq!(buckets.len(), 9);
        assert!(buckets.iter().all(|b| b.minute() == 0 && b.second() == 0));
    }

    #[test]
    fn daily_buckets_follow_local_midnight() {
        // spans the switch to summer time on 2024-03-31
        let start = utc(2024, 3, 29, 23, 0, 0);
        let end = utc(2024, 4, 1, 21, 0, 0);
        let buckets = generate_buckets(start, end, Interval::OneDay, Vienna).unwrap();
        assert_eq!(
            buckets,
            vec![
                utc(2024, 3, 29, 23, 0, 0),
                utc(2024, 3, 30, 23, 0, 0),
                utc(2024, 3, 31, 22, 0, 0),
            ]
        );
        for bucket in &buckets {
            let local = bucket.with_timezone(&Vienna);
            assert_eq!((local.hour(), local.minute()), (0, 0));
        }
    }

    #[test]
    fn weekly_buckets_start_on_monday() {
        let start = utc(2024, 1, 1, 0, 0, 0);
        let end = utc(2024, 3, 1, 0, 0, 0);
        let buckets = generate_buckets(start, end, Interval::OneWeek, chrono_tz::UTC).unwrap();
        assert!(!buckets.is_empty());
        assert!(buckets.iter().all(|b| b.weekday() == Weekday::Mon));
    }

    #[test]
    fn monthly_buckets_land_on_first_of_month() {
        let start = utc(2023, 12, 31, 23, 0, 0);
        let end = utc(2024, 6, 30, 21, 0, 0);
        let buckets = generate_buckets(start, end, Interval::OneMonth, Vienna).unwrap();
        assert_eq!(buckets.len(), 6);
        for (index, bucket) in buckets.iter().enumerate() {
            let local = bucket.with_timezone(&Vienna);
            assert_eq!(local.day(), 1);
            assert_eq!(local.month(), index as u32 + 1);
            assert_eq!(local.hour(), 0);
        }
    }

    #[test]
    fn yearly_buckets() {
        let start = utc(2015, 6, 1, 0, 0, 0);
        let end = utc(2024, 6, 1, 0, 0, 0);
        let buckets = generate_buckets(start, end, Interval::OneYear, chrono_tz::UTC).unwrap();
        let years: Vec<i32> = buckets.iter().map(|b| b.year()).collect();
        assert_eq!(years, (2016..=2024).collect::<Vec<_>>());
    }

    #[test]
    fn floor_finds_containing_bucket() {
        let ts = utc(2024, 5, 17, 13, 44, 12);
        assert_eq!(
            bucket_floor(ts, Interval::FifteenMinutes, chrono_tz::UTC).unwrap(),
            utc(2024, 5, 17, 13, 30, 0)
        );
        assert_eq!(
            bucket_floor(ts, Interval::OneMonth, chrono_tz::UTC).unwrap(),
            utc(2024, 5, 1, 0, 0, 0)
        );
        assert_eq!(
            bucket_floor(utc(2024, 5, 1, 0, 0, 0), Interval::OneMonth, chrono_tz::UTC).unwrap(),
            utc(2024, 5, 1, 0, 0, 0)
        );
    }

    #[test]
    fn start_before_origin_is_rejected() {
        let err = generate_buckets(
            utc(1850, 1, 1, 0, 0, 0),
            utc(1850, 1, 2, 0, 0, 0),
            Interval::OneHour,
            chrono_tz::UTC,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn shifting_uses_calendar_arithmetic() {
        let ts = utc(2024, 3, 31, 22, 0, 0); // 2024-04-01 00:00 in Vienna
        let back = shift_by_intervals(ts, Interval::OneMonth, -1, Vienna).unwrap();
        assert_eq!(back, utc(2024, 2, 29, 23, 0, 0));
        let day_back = shift_by_intervals(ts, Interval::OneDay, -1, Vienna).unwrap();
        assert_eq!(day_back, utc(2024, 3, 30, 23, 0, 0));
        let hour_back = shift_by_intervals(ts, Interval::OneHour, -1, Vienna).unwrap();
        assert_eq!(hour_back, utc(2024, 3, 31, 21, 0, 0));
    }
}
