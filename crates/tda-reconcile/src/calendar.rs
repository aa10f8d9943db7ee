use chrono::NaiveDate;
use tda_schemas::EntityKey;

use crate::error::EngineError;
use crate::retry::RetryPolicy;
use crate::store::PeriodStore;

/// Ascending, deduplicated trading days of one entity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Calendar {
    days: Vec<NaiveDate>,
}

impl Calendar {
    pub fn from_days(mut days: Vec<NaiveDate>) -> Self {
        days.sort_unstable();
        days.dedup();
        Self { days }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn first(&self) -> Option<NaiveDate> {
        self.days.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDate> {
        self.days.last().copied()
    }

    pub fn contains(&self, d: NaiveDate) -> bool {
        self.days.binary_search(&d).is_ok()
    }

    /// Smallest trading day strictly greater than `d`.
    pub fn next_after(&self, d: NaiveDate) -> Option<NaiveDate> {
        let idx = self.days.partition_point(|x| *x <= d);
        self.days.get(idx).copied()
    }

    /// Largest trading day strictly smaller than `d`.
    pub fn previous_before(&self, d: NaiveDate) -> Option<NaiveDate> {
        let idx = self.days.partition_point(|x| *x < d);
        idx.checked_sub(1).and_then(|i| self.days.get(i).copied())
    }

    pub fn iter(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.days.iter().copied()
    }

    pub fn as_slice(&self) -> &[NaiveDate] {
        &self.days
    }
}

/// Read the entity's trading calendar. Store failure (after retries) aborts the pass.
pub async fn resolve_calendar(
    store: &dyn PeriodStore,
    entity: &EntityKey,
    retry: &RetryPolicy,
) -> Result<Calendar, EngineError> {
    let days = retry
        .run("select_trading_days", || store.select_trading_days(entity))
        .await
        .map_err(|source| EngineError::CalendarUnavailable {
            entity: entity.clone(),
            source,
        })?;

    let cal = Calendar::from_days(days);
    if cal.is_empty() {
        tracing::warn!(entity = %entity, "trading calendar is empty");
    } else {
        tracing::debug!(
            entity = %entity,
            days = cal.len(),
            first = ?cal.first(),
            last = ?cal.last(),
            "trading calendar resolved"
        );
    }
    Ok(cal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    #[test]
    fn from_days_sorts_and_dedups() {
        let c = Calendar::from_days(vec![d(1, 5), d(1, 2), d(1, 5), d(1, 3)]);
        assert_eq!(c.as_slice(), &[d(1, 2), d(1, 3), d(1, 5)]);
        assert_eq!(c.first(), Some(d(1, 2)));
        assert_eq!(c.last(), Some(d(1, 5)));
    }

    #[test]
    fn neighbours_are_strict() {
        let c = Calendar::from_days(vec![d(1, 2), d(1, 5), d(1, 8)]);
        assert_eq!(c.next_after(d(1, 2)), Some(d(1, 5)));
        assert_eq!(c.next_after(d(1, 3)), Some(d(1, 5)));
        assert_eq!(c.next_after(d(1, 1)), Some(d(1, 2)));
        assert_eq!(c.next_after(d(1, 8)), None);
        assert_eq!(c.previous_before(d(1, 5)), Some(d(1, 2)));
        assert_eq!(c.previous_before(d(1, 2)), None);
        assert_eq!(c.previous_before(d(1, 9)), Some(d(1, 8)));
    }

    #[test]
    fn empty_calendar_has_no_neighbours() {
        let c = Calendar::empty();
        assert!(c.is_empty());
        assert_eq!(c.next_after(d(1, 1)), None);
        assert_eq!(c.previous_before(d(1, 1)), None);
        assert!(!c.contains(d(1, 1)));
    }
}
