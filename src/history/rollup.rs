use super::interval::Interval;
use super::timezone::timezones_equivalent;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Continuous aggregates maintained by the database, all bucketed in one timezone.
#[derive(Debug, Clone)]
pub struct RollupCatalog {
    timezone: Tz,
    views: BTreeMap<Interval, String>,
    /// Requested zone -> equivalent to `timezone`. Shared by clones.
    equivalence: Arc<Mutex<HashMap<Tz, bool>>>,
}

impl RollupCatalog {
    /// The views shipped with the measurements schema.
    pub fn standard(timezone: Tz) -> Self {
        let views = [
            (Interval::FifteenMinutes, "measurements_15_min"),
            (Interval::OneHour, "measurements_1_hour_europe_vienna"),
            (Interval::OneDay, "measurements_1_day_europe_vienna"),
            (Interval::OneWeek, "measurements_1_week_europe_vienna"),
            (Interval::OneMonth, "measurements_1_month_europe_vienna"),
            (Interval::OneYear, "measurements_1_year_europe_vienna"),
        ]
        .into_iter()
        .map(|(interval, view)| (interval, view.to_string()))
        .collect();
        Self::with_views(timezone, views)
    }

    /// No rollups; every query aggregates raw rows.
    pub fn none(timezone: Tz) -> Self {
        Self::with_views(timezone, BTreeMap::new())
    }

    fn with_views(timezone: Tz, views: BTreeMap<Interval, String>) -> Self {
        Self {
            timezone,
            views,
            equivalence: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn equivalence_lock(&self) -> MutexGuard<'_, HashMap<Tz, bool>> {
        match self.equivalence.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Recovering timezone equivalence cache from poisoned lock");
                poisoned.into_inner()
            }
        }
    }

    /// Whether `timezone` buckets like the catalogue's zone. Computed once per zone.
    fn equivalent(&self, timezone: Tz, reference: DateTime<Utc>) -> bool {
        if timezone == self.timezone {
            return true;
        }
        if let Some(known) = self.equivalence_lock().get(&timezone) {
            return *known;
        }
        let equivalent = timezones_equivalent(self.timezone, timezone, reference);
        self.equivalence_lock().insert(timezone, equivalent);
        equivalent
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn has(&self, interval: Interval) -> bool {
        self.views.contains_key(&interval)
    }

    pub fn view(&self, interval: Interval) -> Option<&str> {
        self.views.get(&interval).map(String::as_str)
    }

    pub fn interval_of(&self, view: &str) -> Option<Interval> {
        self.views
            .iter()
            .find(|(_, name)| name.as_str() == view)
            .map(|(interval, _)| *interval)
    }

    /// The view usable for `interval` when bucketing in `timezone`.
    pub fn view_for(
        &self,
        interval: Interval,
        timezone: Tz,
        reference: DateTime<Utc>,
    ) -> Option<&str> {
        let view = self.view(interval)?;
        self.equivalent(timezone, reference).then_some(view)
    }
}
