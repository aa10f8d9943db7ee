//! Update orchestration: one linear pass per trigger, per entity.
//!
//! calendar -> classification -> mapping -> event fetch -> aggregation -> reconcile.
//! Calendar and event read failures abort the pass before any write.
//! Passes over the same entity are serialised; different entities run in parallel.

use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError};
use tda_schemas::{EntityKey, Event};
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tracing::Instrument;
use uuid::Uuid;

use crate::aggregate::aggregate;
use crate::calendar::{resolve_calendar, Calendar};
use crate::classifier::{classify, Classification, DEFAULT_ACTIVITY_THRESHOLD};
use crate::error::{EngineError, StoreError};
use crate::mapper::{absorption_window, map_dates};
use crate::reconciler::{ReconcileMode, ReconcileReport, Reconciler};
use crate::retry::RetryPolicy;
use crate::store::{EventSource, PeriodStore};
use crate::types::{OutcomeKind, PassReport, PassTrigger, StatusReport, Strategy};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    pub activity_threshold: u64,
    /// Max dates per `select_events` and scoped snapshot call.
    pub chunk_size: usize,
    /// Events dated before this are ignored by every pass.
    pub min_event_date: Option<NaiveDate>,
    pub max_parallel_entities: usize,
    pub retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            activity_threshold: DEFAULT_ACTIVITY_THRESHOLD,
            chunk_size: 20,
            min_event_date: NaiveDate::from_ymd_opt(2020, 1, 1),
            max_parallel_entities: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// One async mutex per entity. An entry lives only while some pass holds or
/// waits on it.
#[derive(Default)]
struct EntityLocks {
    inner: std::sync::Mutex<HashMap<EntityKey, Arc<Mutex<()>>>>,
}

impl EntityLocks {
    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<EntityKey, Arc<Mutex<()>>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn acquire(self: &Arc<Self>, entity: &EntityKey) -> EntityGuard {
        let lock = Arc::clone(self.map().entry(entity.clone()).or_default());
        let guard = lock.lock_owned().await;
        EntityGuard {
            locks: Arc::clone(self),
            entity: entity.clone(),
            guard: Some(guard),
        }
    }
}

struct EntityGuard {
    locks: Arc<EntityLocks>,
    entity: EntityKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        // Release first so the map's Arc is the only one left when idle.
        drop(self.guard.take());
        let mut map = self.locks.map();
        if map
            .get(&self.entity)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.entity);
        }
    }
}

#[derive(Clone, Debug)]
pub enum BatchTrigger {
    ProcessNew(Vec<NaiveDate>),
    RecomputeAll,
}

#[derive(Clone, Debug)]
pub struct BatchJob {
    pub entity: EntityKey,
    pub trigger: BatchTrigger,
}

impl BatchJob {
    pub fn process_new(entity: EntityKey, dates: Vec<NaiveDate>) -> Self {
        Self {
            entity,
            trigger: BatchTrigger::ProcessNew(dates),
        }
    }

    pub fn recompute_all(entity: EntityKey) -> Self {
        Self {
            entity,
            trigger: BatchTrigger::RecomputeAll,
        }
    }
}

#[derive(Debug)]
pub struct BatchEntry {
    pub entity: EntityKey,
    pub result: Result<PassReport, EngineError>,
}

/// Per-entity results in job order. One entity failing never affects another.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }

    /// Every pass succeeded and every day was written.
    pub fn is_clean(&self) -> bool {
        self.entries
            .iter()
            .all(|e| matches!(&e.result, Ok(r) if r.is_complete()))
    }

    pub fn get(&self, entity: &EntityKey) -> Option<&Result<PassReport, EngineError>> {
        self.entries
            .iter()
            .find(|e| &e.entity == entity)
            .map(|e| &e.result)
    }
}

/// The aggregation engine. Cheap to clone; clones share stores and entity locks.
#[derive(Clone)]
pub struct Engine {
    periods: Arc<dyn PeriodStore>,
    events: Arc<dyn EventSource>,
    settings: EngineSettings,
    locks: Arc<EntityLocks>,
}

impl Engine {
    pub fn new(
        periods: Arc<dyn PeriodStore>,
        events: Arc<dyn EventSource>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            periods,
            events,
            settings,
            locks: Arc::new(EntityLocks::default()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Incremental pass for newly arrived event dates.
    ///
    /// Every trading day absorbing one of `new_event_dates` is recomputed from
    /// its whole absorption window, then reconciled in scoped mode. All other
    /// stored days are left as they are.
    pub async fn process_new(
        &self,
        entity: &EntityKey,
        new_event_dates: &[NaiveDate],
    ) -> Result<PassReport, EngineError> {
        let pass_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "pass",
            entity = %entity,
            trigger = PassTrigger::ProcessNew.as_str(),
            pass_id = %pass_id
        );
        async {
            let _guard = self.locks.acquire(entity).await;
            let calendar = self.calendar(entity).await?;
            let class = self.classify(entity).await;

            let dates: BTreeSet<NaiveDate> = new_event_dates
                .iter()
                .copied()
                .filter(|d| self.in_range(*d))
                .collect();
            if dates.len() < new_event_dates.len() {
                tracing::debug!(
                    given = new_event_dates.len(),
                    kept = dates.len(),
                    "duplicate or pre-cutoff dates ignored"
                );
            }

            let mapping = map_dates(dates.iter().copied(), &calendar, class.strategy);
            let affected = mapping.absorbing_days();
            let dropped_dates: Vec<NaiveDate> = mapping.unmapped().collect();
            tracing::info!(
                new_dates = dates.len(),
                affected_days = affected.len(),
                unmapped_dates = dropped_dates.len(),
                "new event dates mapped"
            );

            self.scoped_pass(
                pass_id,
                entity,
                PassTrigger::ProcessNew,
                &calendar,
                class,
                affected,
                dropped_dates,
            )
            .await
        }
        .instrument(span)
        .await
    }

    /// Full pass: every stored day is zeroed, then every computed day written.
    pub async fn recompute_all(&self, entity: &EntityKey) -> Result<PassReport, EngineError> {
        let pass_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "pass",
            entity = %entity,
            trigger = PassTrigger::RecomputeAll.as_str(),
            pass_id = %pass_id
        );
        async {
            let _guard = self.locks.acquire(entity).await;
            let calendar = self.calendar(entity).await?;
            let class = self.classify(entity).await;

            let events = self.fetch_all(entity).await?;
            let mapping = map_dates(distinct_dates(&events), &calendar, class.strategy);
            let aggregation = aggregate(&events, &mapping);
            let dropped_dates: Vec<NaiveDate> = mapping.unmapped().collect();

            let reconciler = Reconciler::new(
                self.periods.as_ref(),
                &self.settings.retry,
                self.settings.chunk_size,
            );
            let rec = reconciler
                .reconcile(entity, &aggregation, ReconcileMode::Full)
                .await?;

            Ok(self.finish(
                pass_id,
                entity,
                PassTrigger::RecomputeAll,
                class,
                rec,
                aggregation.dropped,
                dropped_dates,
            ))
        }
        .instrument(span)
        .await
    }

    /// Re-run a scoped pass limited to `days`, typically the failed days of an
    /// earlier report. Under CarryForward, days that are not trading days are skipped.
    pub async fn retry_failed(
        &self,
        entity: &EntityKey,
        days: &[NaiveDate],
    ) -> Result<PassReport, EngineError> {
        let pass_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "pass",
            entity = %entity,
            trigger = PassTrigger::RetryFailed.as_str(),
            pass_id = %pass_id
        );
        async {
            let _guard = self.locks.acquire(entity).await;
            let calendar = self.calendar(entity).await?;
            let class = self.classify(entity).await;

            let mut affected = BTreeSet::new();
            for day in days {
                if absorption_window(*day, &calendar, class.strategy).is_some() {
                    affected.insert(*day);
                } else {
                    tracing::warn!(
                        day = %day,
                        strategy = class.strategy.as_str(),
                        "day cannot absorb events under current strategy; skipped"
                    );
                }
            }

            self.scoped_pass(
                pass_id,
                entity,
                PassTrigger::RetryFailed,
                &calendar,
                class,
                affected,
                Vec::new(),
            )
            .await
        }
        .instrument(span)
        .await
    }

    /// Read-only: maps the full event history against the calendar.
    pub async fn status(&self, entity: &EntityKey) -> Result<StatusReport, EngineError> {
        let span = tracing::info_span!("status", entity = %entity);
        async {
            let calendar = self.calendar(entity).await?;
            let class = self.classify(entity).await;
            let events = self.fetch_all(entity).await?;
            let mapping = map_dates(distinct_dates(&events), &calendar, class.strategy);
            let aggregation = aggregate(&events, &mapping);

            Ok(StatusReport {
                entity: entity.clone(),
                strategy: class.strategy,
                event_count: class.event_count,
                classification_degraded: class.degraded,
                trading_days: calendar.len(),
                first_trading_day: calendar.first(),
                last_trading_day: calendar.last(),
                mapped_days: aggregation.days.len(),
                dropped_count: aggregation.dropped,
            })
        }
        .instrument(span)
        .await
    }

    /// Run many entity passes concurrently, at most `max_parallel_entities` at a time.
    pub async fn run_batch(&self, jobs: Vec<BatchJob>) -> BatchReport {
        let permits = Arc::new(Semaphore::new(self.settings.max_parallel_entities.max(1)));
        let mut handles = Vec::with_capacity(jobs.len());

        for job in jobs {
            let engine = self.clone();
            let permits = Arc::clone(&permits);
            let entity = job.entity.clone();
            let handle = tokio::spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => {
                        return Err(EngineError::PassAborted {
                            entity: job.entity,
                            reason: "batch semaphore closed".to_string(),
                        })
                    }
                };
                match job.trigger {
                    BatchTrigger::ProcessNew(dates) => engine.process_new(&job.entity, &dates).await,
                    BatchTrigger::RecomputeAll => engine.recompute_all(&job.entity).await,
                }
            });
            handles.push((entity, handle));
        }

        let mut report = BatchReport::default();
        for (entity, handle) in handles {
            let result = match handle.await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(entity = %entity, error = %e, "batch task ended without a report");
                    Err(EngineError::PassAborted {
                        entity: entity.clone(),
                        reason: e.to_string(),
                    })
                }
            };
            if let Err(e) = &result {
                tracing::error!(entity = %entity, error = %e, "entity pass aborted");
            }
            report.entries.push(BatchEntry { entity, result });
        }

        tracing::info!(
            entities = report.entries.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            "batch finished"
        );
        report
    }

    // -----------------------------------------------------------------------
    // pass stages
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn scoped_pass(
        &self,
        pass_id: Uuid,
        entity: &EntityKey,
        trigger: PassTrigger,
        calendar: &Calendar,
        class: Classification,
        affected: BTreeSet<NaiveDate>,
        dropped_dates: Vec<NaiveDate>,
    ) -> Result<PassReport, EngineError> {
        let strategy = class.strategy;

        let mut events = self.fetch_windows(entity, calendar, strategy, &affected).await?;
        let dropped_events = if dropped_dates.is_empty() {
            0
        } else {
            self.fetch_dates(entity, &dropped_dates)
                .await?
                .into_iter()
                .filter(|e| self.in_range(e.date))
                .count() as u64
        };
        events.retain(|e| self.in_range(e.date));

        let mapping = map_dates(distinct_dates(&events), calendar, strategy);
        let aggregation = aggregate(&events, &mapping);
        let dropped = aggregation.dropped + dropped_events;
        let mut aggregation = aggregation.restrict_to(&affected);
        aggregation.ensure_days(&affected);

        let reconciler = Reconciler::new(
            self.periods.as_ref(),
            &self.settings.retry,
            self.settings.chunk_size,
        );
        let rec = reconciler
            .reconcile(entity, &aggregation, ReconcileMode::Scoped)
            .await?;

        Ok(self.finish(pass_id, entity, trigger, class, rec, dropped, dropped_dates))
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        pass_id: Uuid,
        entity: &EntityKey,
        trigger: PassTrigger,
        class: Classification,
        rec: ReconcileReport,
        dropped_count: u64,
        dropped_dates: Vec<NaiveDate>,
    ) -> PassReport {
        if dropped_count > 0 {
            tracing::warn!(
                dropped_count,
                dates = ?dropped_dates,
                "events without an absorbing trading day were dropped"
            );
        }

        let report = PassReport {
            pass_id,
            entity: entity.clone(),
            trigger,
            strategy: class.strategy,
            event_count: class.event_count,
            classification_degraded: class.degraded,
            outcomes: rec.outcomes,
            dropped_count,
            dropped_dates,
            zeroed_days: rec.zeroed_days,
        };

        let failed = report.count(OutcomeKind::Failed);
        tracing::info!(
            strategy = report.strategy.as_str(),
            created = report.count(OutcomeKind::Created),
            updated = report.count(OutcomeKind::Updated),
            unchanged = report.count(OutcomeKind::Unchanged),
            failed,
            dropped = report.dropped_count,
            "pass finished"
        );
        if failed > 0 {
            tracing::warn!(days = ?report.failed_days(), "some days failed; retry only those days");
        }
        report
    }

    async fn calendar(&self, entity: &EntityKey) -> Result<Calendar, EngineError> {
        resolve_calendar(self.periods.as_ref(), entity, &self.settings.retry).await
    }

    async fn classify(&self, entity: &EntityKey) -> Classification {
        classify(
            self.events.as_ref(),
            entity,
            self.settings.activity_threshold,
            &self.settings.retry,
        )
        .await
    }

    fn in_range(&self, d: NaiveDate) -> bool {
        self.settings.min_event_date.map_or(true, |cutoff| d >= cutoff)
    }

    async fn fetch_all(&self, entity: &EntityKey) -> Result<Vec<Event>, EngineError> {
        let source = self.events.as_ref();
        let mut events = self
            .settings
            .retry
            .run("select_events", || source.select_events(entity, None))
            .await
            .map_err(|e| events_unavailable(entity, e))?;
        events.retain(|e| self.in_range(e.date));
        Ok(events)
    }

    /// Exact-date fetch, `chunk_size` dates per call.
    async fn fetch_dates(
        &self,
        entity: &EntityKey,
        dates: &[NaiveDate],
    ) -> Result<Vec<Event>, EngineError> {
        let source = self.events.as_ref();
        let mut out = Vec::new();
        for chunk in dates.chunks(self.settings.chunk_size.max(1)) {
            let events = self
                .settings
                .retry
                .run("select_events", || source.select_events(entity, Some(chunk)))
                .await
                .map_err(|e| events_unavailable(entity, e))?;
            out.extend(events);
        }
        Ok(out)
    }

    /// Every event that maps to one of `affected`.
    async fn fetch_windows(
        &self,
        entity: &EntityKey,
        calendar: &Calendar,
        strategy: Strategy,
        affected: &BTreeSet<NaiveDate>,
    ) -> Result<Vec<Event>, EngineError> {
        match strategy {
            Strategy::DailyDirect => {
                let days: Vec<NaiveDate> = affected.iter().copied().collect();
                self.fetch_dates(entity, &days).await
            }
            Strategy::CarryForward => {
                let source = self.events.as_ref();
                let mut out = Vec::new();
                for day in affected {
                    let Some(w) = absorption_window(*day, calendar, strategy) else {
                        continue;
                    };
                    let events = self
                        .settings
                        .retry
                        .run("select_events_between", || {
                            source.select_events_between(entity, w.after, w.through)
                        })
                        .await
                        .map_err(|e| events_unavailable(entity, e))?;
                    tracing::debug!(
                        day = %day,
                        after = ?w.after,
                        through = ?w.through,
                        events = events.len(),
                        "absorption window fetched"
                    );
                    out.extend(events);
                }
                Ok(out)
            }
        }
    }
}

fn events_unavailable(entity: &EntityKey, source: StoreError) -> EngineError {
    EngineError::EventsUnavailable {
        entity: entity.clone(),
        source,
    }
}

fn distinct_dates(events: &[Event]) -> BTreeSet<NaiveDate> {
    events.iter().map(|e| e.date).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holders(locks: &EntityLocks, entity: &EntityKey) -> Option<usize> {
        locks.map().get(entity).map(Arc::strong_count)
    }

    #[tokio::test]
    async fn lock_entry_goes_away_with_last_holder() {
        let locks = Arc::new(EntityLocks::default());
        let fpt = EntityKey::new("FPT").unwrap();
        let vcb = EntityKey::new("VCB").unwrap();

        let first = locks.acquire(&fpt).await;
        let other = locks.acquire(&vcb).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            let fpt = fpt.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&fpt).await;
            })
        };
        // map + held guard + queued waiter
        while holders(&locks, &fpt) != Some(3) {
            tokio::task::yield_now().await;
        }

        drop(first);
        assert!(holders(&locks, &fpt).is_some(), "waiter still needs the entry");

        waiter.await.unwrap();
        assert_eq!(holders(&locks, &fpt), None);

        drop(other);
        assert!(locks.map().is_empty());
    }
}
