use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DataPoint {
    pub time: DateTime<Utc>,
    pub value: Option<f64>,
}

impl DataPoint {
    pub fn new(time: DateTime<Utc>, value: Option<f64>) -> Self {
        Self { time, value }
    }
}

/// Places sparse `(bucket, value)` rows onto the full bucket list; rows off the grid are dropped.
pub fn merge_onto_buckets(
    buckets: &[DateTime<Utc>],
    rows: &[(DateTime<Utc>, Option<f64>)],
) -> Vec<DataPoint> {
    let by_second: HashMap<i64, Option<f64>> = rows
        .iter()
        .map(|(bucket, value)| (bucket.timestamp(), *value))
        .collect();
    buckets
        .iter()
        .map(|bucket| DataPoint::new(*bucket, by_second.get(&bucket.timestamp()).copied().flatten()))
        .collect()
}

/// Last observation carried forward. Leading gaps stay empty.
pub fn fill_forward(points: &mut [DataPoint]) {
    let mut carried = None;
    for point in points.iter_mut() {
        match point.value {
            Some(value) => carried = Some(value),
            None => point.value = carried,
        }
    }
}

/// Clamps counter dips so the series never decreases. Walking backwards, a value below the
/// highest earlier observation is overwritten with the closest later (already corrected)
/// observation, or with that earlier maximum when it is higher or no later observation exists.
pub fn correct_monotonic(points: &mut [DataPoint]) {
    let earlier_max: Vec<Option<f64>> = points
        .iter()
        .scan(None, |max: &mut Option<f64>, point| {
            let before = *max;
            if let Some(value) = point.value {
                *max = Some(max.map_or(value, |current: f64| current.max(value)));
            }
            Some(before)
        })
        .collect();

    let mut later: Option<f64> = None;
    for index in (0..points.len()).rev() {
        let Some(current) = points[index].value else {
            continue;
        };
        let corrected = match earlier_max[index] {
            Some(earlier) if current < earlier => later.map_or(earlier, |later| later.max(earlier)),
            _ => current,
        };
        points[index].value = Some(corrected);
        later = Some(corrected);
    }
}

/// Consecutive differences, stamped with the later bucket. Yields one point fewer than the input.
pub fn differences(points: &[DataPoint]) -> Vec<DataPoint> {
    points
        .windows(2)
        .map(|pair| {
            let value = match (pair[0].value, pair[1].value) {
                (Some(previous), Some(current)) => Some(current - previous),
                _ => None,
            };
            DataPoint::new(pair[1].time, value)
        })
        .collect()
}

/// Like [`differences`], divided by the hours elapsed between the two buckets.
pub fn rates_per_hour(points: &[DataPoint]) -> Vec<DataPoint> {
    points
        .windows(2)
        .map(|pair| {
            let hours = (pair[1].time - pair[0].time).num_seconds() as f64 / 3600.0;
            let value = match (pair[0].value, pair[1].value) {
                (Some(previous), Some(current)) if hours > 0.0 => {
                    Some((current - previous) / hours)
                }
                _ => None,
            };
            DataPoint::new(pair[1].time, value)
        })
        .collect()
}

/// Wire form `[[unix_seconds, value], ..]`; empty buckets are reported as `0`.
pub fn to_wire(points: &[DataPoint]) -> Vec<(i64, f64)> {
    points
        .iter()
        .map(|point| (point.time.timestamp(), point.value.unwrap_or(0.0)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn series(values: &[Option<f64>]) -> Vec<DataPoint> {
        let origin = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, value)| DataPoint::new(origin + Duration::hours(i as i64), *value))
            .collect()
    }

    fn values(points: &[DataPoint]) -> Vec<Option<f64>> {
        points.iter().map(|p| p.value).collect()
    }

    #[test]
    fn merge_marks_missing_buckets_empty() {
        let buckets: Vec<_> = series(&[None, None, None]).iter().map(|p| p.time).collect();
        let rows = vec![(buckets[0], Some(1.5)), (buckets[2], Some(3.0))];
        let merged = merge_onto_buckets(&buckets, &rows);
        assert_eq!(values(&merged), vec![Some(1.5), None, Some(3.0)]);
    }

    #[test]
    fn locf_carries_forward_only() {
        let mut points = series(&[Some(5.0), None, None]);
        fill_forward(&mut points);
        assert_eq!(values(&points), vec![Some(5.0); 3]);

        let mut leading_gap = series(&[None, Some(5.0)]);
        fill_forward(&mut leading_gap);
        assert_eq!(values(&leading_gap), vec![None, Some(5.0)]);
    }

    #[test]
    fn dips_are_clamped_to_the_following_value() {
        let mut points = series(&[Some(10.0), Some(8.0), Some(12.0)]);
        correct_monotonic(&mut points);
        assert_eq!(values(&points), vec![Some(10.0), Some(12.0), Some(12.0)]);
        assert_eq!(values(&differences(&points)), vec![Some(2.0), Some(0.0)]);
    }

    #[test]
    fn correction_skips_gaps_and_handles_trailing_dip() {
        let mut points = series(&[Some(10.0), None, Some(7.0), Some(15.0)]);
        correct_monotonic(&mut points);
        assert_eq!(
            values(&points),
            vec![Some(10.0), None, Some(15.0), Some(15.0)]
        );

        let mut trailing = series(&[Some(10.0), Some(12.0), Some(3.0)]);
        correct_monotonic(&mut trailing);
        assert_eq!(values(&trailing), vec![Some(10.0), Some(12.0), Some(12.0)]);
    }

    #[test]
    fn counter_resets_never_produce_negative_deltas() {
        for raw in [
            vec![Some(10.0), Some(3.0), Some(5.0)],
            vec![Some(10.0), Some(8.0), Some(9.0), Some(12.0)],
            vec![Some(10.0), None, Some(2.0), Some(4.0), Some(11.0)],
        ] {
            let mut points = series(&raw);
            correct_monotonic(&mut points);
            fill_forward(&mut points);
            let deltas = differences(&points);
            assert!(
                deltas.iter().all(|p| p.value.map_or(true, |v| v >= 0.0)),
                "{raw:?} gave {:?}",
                values(&deltas)
            );
        }

        let mut reset = series(&[Some(10.0), Some(3.0), Some(5.0)]);
        correct_monotonic(&mut reset);
        assert_eq!(values(&reset), vec![Some(10.0); 3]);

        let mut recovering = series(&[Some(10.0), Some(8.0), Some(9.0), Some(12.0)]);
        correct_monotonic(&mut recovering);
        assert_eq!(
            values(&recovering),
            vec![Some(10.0), Some(12.0), Some(12.0), Some(12.0)]
        );
    }

    #[test]
    fn rates_divide_by_elapsed_hours() {
        let points = series(&[Some(100.0), Some(104.0)]);
        let rates = rates_per_hour(&points);
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].value, Some(4.0));
        assert_eq!(rates[0].time, points[1].time);
    }

    #[test]
    fn differences_need_two_points() {
        assert!(differences(&series(&[Some(1.0)])).is_empty());
        assert_eq!(
            values(&differences(&series(&[None, Some(4.0)]))),
            vec![None]
        );
    }

    #[test]
    fn wire_form_reports_empty_as_zero() {
        let points = series(&[Some(2.5), None]);
        let wire = to_wire(&points);
        assert_eq!(wire[0].1, 2.5);
        assert_eq!(wire[1].1, 0.0);
        assert_eq!(wire[1].0 - wire[0].0, 3600);
    }
}
