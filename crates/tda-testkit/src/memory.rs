use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tda_reconcile::{EventSource, PeriodStore, ResetScope, StoreError, UpsertKind};
use tda_schemas::{Category, CategoryCounts, EntityKey, Event};

/// Port operations that can be counted and faulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    TradingDays,
    PeriodCounters,
    Upsert,
    Reset,
    NormalizeNulls,
    Events,
    EventsBetween,
    EventCount,
}

#[derive(Clone, Debug)]
pub enum Fault {
    /// Every call fails.
    Always(StoreError),
    /// The next `n` calls fail, then calls succeed again.
    Times(u32, StoreError),
    /// Every call sleeps first (drives timeouts).
    Delay(Duration),
}

/// One stored aggregate row. `None` counters model SQL nulls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoredRow {
    pub has_quote: bool,
    pub positive: Option<i64>,
    pub negative: Option<i64>,
    pub neutral: Option<i64>,
}

impl StoredRow {
    pub fn quote(counts: CategoryCounts) -> Self {
        Self {
            has_quote: true,
            positive: Some(counts.positive),
            negative: Some(counts.negative),
            neutral: Some(counts.neutral),
        }
    }

    pub fn counts(&self) -> CategoryCounts {
        CategoryCounts::new(
            self.positive.unwrap_or(0),
            self.negative.unwrap_or(0),
            self.neutral.unwrap_or(0),
        )
    }

    fn set(&mut self, c: CategoryCounts) {
        self.positive = Some(c.positive);
        self.negative = Some(c.negative);
        self.neutral = Some(c.neutral);
    }
}

#[derive(Default)]
struct State {
    rows: BTreeMap<(EntityKey, NaiveDate), StoredRow>,
    events: Vec<(EntityKey, NaiveDate, Option<String>)>,
    faults: HashMap<StoreOp, Fault>,
    entity_faults: HashMap<(EntityKey, StoreOp), StoreError>,
    upsert_failures: BTreeMap<NaiveDate, StoreError>,
    calls: HashMap<StoreOp, usize>,
    writes: Vec<(EntityKey, NaiveDate, CategoryCounts)>,
}

/// In-memory implementation of both store ports, with fault injection and
/// call accounting. Behaves like the Postgres adapter: null counters read as
/// 0, rows created by an upsert have no quote and so stay off the calendar.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- seeding ------------------------------------------------------------

    /// Quote rows with zero counters.
    pub fn add_trading_days(&self, entity: &EntityKey, days: impl IntoIterator<Item = NaiveDate>) {
        let mut st = self.state();
        for d in days {
            st.rows
                .entry((entity.clone(), d))
                .or_insert_with(|| StoredRow::quote(CategoryCounts::zero()))
                .has_quote = true;
        }
    }

    pub fn set_row(&self, entity: &EntityKey, day: NaiveDate, row: StoredRow) {
        self.state().rows.insert((entity.clone(), day), row);
    }

    pub fn add_event(&self, entity: &EntityKey, date: NaiveDate, category: Category) {
        self.add_raw_event(entity, date, Some(category.as_str()));
    }

    pub fn add_events(&self, entity: &EntityKey, events: impl IntoIterator<Item = Event>) {
        for e in events {
            self.add_event(entity, e.date, e.category);
        }
    }

    /// Event with an arbitrary (possibly null or unknown) label.
    pub fn add_raw_event(&self, entity: &EntityKey, date: NaiveDate, label: Option<&str>) {
        self.state()
            .events
            .push((entity.clone(), date, label.map(str::to_string)));
    }

    // -- faults -------------------------------------------------------------

    pub fn inject(&self, op: StoreOp, fault: Fault) {
        self.state().faults.insert(op, fault);
    }

    pub fn clear_fault(&self, op: StoreOp) {
        self.state().faults.remove(&op);
    }

    /// Every `op` call for `entity` fails with `err`; other entities are unaffected.
    pub fn fail_for_entity(&self, entity: &EntityKey, op: StoreOp, err: StoreError) {
        self.state().entity_faults.insert((entity.clone(), op), err);
    }

    /// Every upsert of `day` fails with `err`, for any entity.
    pub fn fail_upsert_on(&self, day: NaiveDate, err: StoreError) {
        self.state().upsert_failures.insert(day, err);
    }

    pub fn clear_upsert_failures(&self) {
        self.state().upsert_failures.clear();
    }

    // -- inspection ---------------------------------------------------------

    pub fn calls(&self, op: StoreOp) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn row(&self, entity: &EntityKey, day: NaiveDate) -> Option<StoredRow> {
        self.state().rows.get(&(entity.clone(), day)).copied()
    }

    pub fn counters(&self, entity: &EntityKey, day: NaiveDate) -> Option<CategoryCounts> {
        self.row(entity, day).map(|r| r.counts())
    }

    /// Every stored row of the entity, nulls read as 0.
    pub fn all_counters(&self, entity: &EntityKey) -> BTreeMap<NaiveDate, CategoryCounts> {
        self.state()
            .rows
            .iter()
            .filter(|((e, _), _)| e == entity)
            .map(|((_, d), r)| (*d, r.counts()))
            .collect()
    }

    /// Upserts applied so far, in order.
    pub fn write_log(&self) -> Vec<(EntityKey, NaiveDate, CategoryCounts)> {
        self.state().writes.clone()
    }

    // -- internals ----------------------------------------------------------

    async fn enter(&self, op: StoreOp, entity: &EntityKey) -> Result<(), StoreError> {
        let delay = {
            let mut st = self.state();
            *st.calls.entry(op).or_insert(0) += 1;
            if let Some(e) = st.entity_faults.get(&(entity.clone(), op)) {
                return Err(e.clone());
            }
            match st.faults.get_mut(&op) {
                None => None,
                Some(Fault::Always(e)) => return Err(e.clone()),
                Some(Fault::Times(n, e)) => {
                    if *n > 0 {
                        *n -= 1;
                        return Err(e.clone());
                    }
                    None
                }
                Some(Fault::Delay(d)) => Some(*d),
            }
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        Ok(())
    }

    fn events_where(
        &self,
        entity: &EntityKey,
        keep: impl Fn(NaiveDate) -> bool,
    ) -> Vec<Event> {
        self.state()
            .events
            .iter()
            .filter(|(e, d, _)| e == entity && keep(*d))
            .filter_map(|(_, d, label)| {
                let c = Category::parse(label.as_deref()?)?;
                Some(Event::new(*d, c))
            })
            .collect()
    }
}

#[async_trait]
impl EventSource for MemoryStore {
    async fn select_events(
        &self,
        entity: &EntityKey,
        dates: Option<&[NaiveDate]>,
    ) -> Result<Vec<Event>, StoreError> {
        self.enter(StoreOp::Events, entity).await?;
        Ok(self.events_where(entity, |d| dates.map_or(true, |ds| ds.contains(&d))))
    }

    async fn select_events_between(
        &self,
        entity: &EntityKey,
        after: Option<NaiveDate>,
        through: Option<NaiveDate>,
    ) -> Result<Vec<Event>, StoreError> {
        self.enter(StoreOp::EventsBetween, entity).await?;
        Ok(self.events_where(entity, |d| {
            after.map_or(true, |a| d > a) && through.map_or(true, |t| d <= t)
        }))
    }

    async fn select_event_count(&self, entity: &EntityKey) -> Result<u64, StoreError> {
        self.enter(StoreOp::EventCount, entity).await?;
        let n = self
            .state()
            .events
            .iter()
            .filter(|(e, _, label)| e == entity && label.as_deref().is_some_and(|l| !l.is_empty()))
            .count();
        Ok(n as u64)
    }
}

#[async_trait]
impl PeriodStore for MemoryStore {
    async fn select_trading_days(&self, entity: &EntityKey) -> Result<Vec<NaiveDate>, StoreError> {
        self.enter(StoreOp::TradingDays, entity).await?;
        Ok(self
            .state()
            .rows
            .iter()
            .filter(|((e, _), r)| e == entity && r.has_quote)
            .map(|((_, d), _)| *d)
            .collect())
    }

    async fn select_period_counters(
        &self,
        entity: &EntityKey,
        dates: Option<&[NaiveDate]>,
    ) -> Result<BTreeMap<NaiveDate, CategoryCounts>, StoreError> {
        self.enter(StoreOp::PeriodCounters, entity).await?;
        Ok(self
            .all_counters(entity)
            .into_iter()
            .filter(|(d, _)| dates.map_or(true, |ds| ds.contains(d)))
            .collect())
    }

    async fn upsert_period_counters(
        &self,
        entity: &EntityKey,
        day: NaiveDate,
        counts: CategoryCounts,
    ) -> Result<UpsertKind, StoreError> {
        self.enter(StoreOp::Upsert, entity).await?;
        let mut st = self.state();
        if let Some(e) = st.upsert_failures.get(&day) {
            return Err(e.clone());
        }
        let kind = match st.rows.get_mut(&(entity.clone(), day)) {
            Some(row) => {
                row.set(counts);
                UpsertKind::Updated
            }
            None => {
                let mut row = StoredRow::quote(counts);
                row.has_quote = false;
                st.rows.insert((entity.clone(), day), row);
                UpsertKind::Created
            }
        };
        st.writes.push((entity.clone(), day, counts));
        Ok(kind)
    }

    async fn reset_period_counters(
        &self,
        entity: &EntityKey,
        scope: &ResetScope,
    ) -> Result<u64, StoreError> {
        self.enter(StoreOp::Reset, entity).await?;
        let mut st = self.state();
        let mut touched = 0;
        for ((e, d), row) in st.rows.iter_mut() {
            let in_scope = match scope {
                ResetScope::All => true,
                ResetScope::Dates(ds) => ds.contains(d),
            };
            if e == entity && in_scope {
                row.set(CategoryCounts::zero());
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn normalize_null_counters(&self, entity: &EntityKey) -> Result<u64, StoreError> {
        self.enter(StoreOp::NormalizeNulls, entity).await?;
        let mut st = self.state();
        let mut touched = 0;
        for ((e, _), row) in st.rows.iter_mut() {
            let has_null = row.positive.is_none() || row.negative.is_none() || row.neutral.is_none();
            if e == entity && has_null {
                let c = row.counts();
                row.set(c);
                touched += 1;
            }
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[tokio::test]
    async fn upserted_rows_stay_off_the_calendar() {
        let s = MemoryStore::new();
        let fpt = EntityKey::new("FPT").unwrap();
        s.add_trading_days(&fpt, [d(2), d(5)]);

        let k = s
            .upsert_period_counters(&fpt, d(3), CategoryCounts::new(1, 0, 0))
            .await
            .unwrap();
        assert_eq!(k, UpsertKind::Created);
        let k = s
            .upsert_period_counters(&fpt, d(5), CategoryCounts::new(0, 1, 0))
            .await
            .unwrap();
        assert_eq!(k, UpsertKind::Updated);

        assert_eq!(s.select_trading_days(&fpt).await.unwrap(), vec![d(2), d(5)]);
        assert_eq!(s.all_counters(&fpt).len(), 3);
    }

    #[tokio::test]
    async fn null_and_unknown_labels_are_not_events() {
        let s = MemoryStore::new();
        let fpt = EntityKey::new("FPT").unwrap();
        s.add_event(&fpt, d(3), Category::Positive);
        s.add_raw_event(&fpt, d(3), None);
        s.add_raw_event(&fpt, d(3), Some(""));
        s.add_raw_event(&fpt, d(3), Some("Mixed"));

        assert_eq!(s.select_events(&fpt, None).await.unwrap().len(), 1);
        // unknown labels still count as classified rows, like the SQL filter
        assert_eq!(s.select_event_count(&fpt).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn times_fault_recovers() {
        let s = MemoryStore::new();
        let fpt = EntityKey::new("FPT").unwrap();
        s.inject(StoreOp::TradingDays, Fault::Times(1, StoreError::Unavailable("down".into())));
        assert!(s.select_trading_days(&fpt).await.is_err());
        assert!(s.select_trading_days(&fpt).await.is_ok());
        assert_eq!(s.calls(StoreOp::TradingDays), 2);
    }
}
