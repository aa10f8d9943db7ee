use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use tda_schemas::{CategoryCounts, EntityKey};

use crate::aggregate::Aggregation;
use crate::error::EngineError;
use crate::retry::RetryPolicy;
use crate::store::PeriodStore;
use crate::types::{DayOutcome, ResetScope};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Touch only the days present in the aggregation.
    Scoped,
    /// Zero every stored day, then write every computed day.
    Full,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub outcomes: BTreeMap<NaiveDate, DayOutcome>,
    pub zeroed_days: u64,
}

/// Reset-then-write of stored counters. Stored values always end up equal to
/// the computed ones, never old + new.
pub struct Reconciler<'a> {
    store: &'a dyn PeriodStore,
    retry: &'a RetryPolicy,
    /// Max dates per snapshot read.
    chunk_size: usize,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn PeriodStore, retry: &'a RetryPolicy, chunk_size: usize) -> Self {
        Self {
            store,
            retry,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Per-day write failures land in the outcome map as `Failed`. Only a
    /// failed full reset returns `Err`, and then nothing has been written.
    pub async fn reconcile(
        &self,
        entity: &EntityKey,
        aggregation: &Aggregation,
        mode: ReconcileMode,
    ) -> Result<ReconcileReport, EngineError> {
        match mode {
            ReconcileMode::Scoped => Ok(self.scoped(entity, aggregation).await),
            ReconcileMode::Full => self.full(entity, aggregation).await,
        }
    }

    async fn scoped(&self, entity: &EntityKey, aggregation: &Aggregation) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if aggregation.is_empty() {
            return report;
        }

        let days: Vec<NaiveDate> = aggregation.days.keys().copied().collect();
        let (stored, known) = self.snapshot(entity, &days).await;

        for (day, counts) in &aggregation.days {
            let outcome = if known.contains(day) {
                match stored.get(day) {
                    Some(prev) if prev == counts => DayOutcome::Unchanged,
                    // absent row reads as zero
                    None if counts.is_zero() => DayOutcome::Unchanged,
                    _ => self.reset_then_write(entity, *day, *counts).await,
                }
            } else {
                self.reset_then_write(entity, *day, *counts).await
            };
            report.outcomes.insert(*day, outcome);
        }
        report
    }

    /// Stored counters of `days`, read `chunk_size` dates at a time. The
    /// second value holds the days whose chunk was read; days of a failed
    /// chunk are missing from it and get written unconditionally.
    async fn snapshot(
        &self,
        entity: &EntityKey,
        days: &[NaiveDate],
    ) -> (BTreeMap<NaiveDate, CategoryCounts>, BTreeSet<NaiveDate>) {
        let store = self.store;
        let mut stored = BTreeMap::new();
        let mut known = BTreeSet::new();

        for chunk in days.chunks(self.chunk_size) {
            match self
                .retry
                .run("select_period_counters", || {
                    store.select_period_counters(entity, Some(chunk))
                })
                .await
            {
                Ok(part) => {
                    stored.extend(part);
                    known.extend(chunk.iter().copied());
                }
                Err(e) => tracing::warn!(
                    entity = %entity,
                    error = %e,
                    first = %chunk[0],
                    days = chunk.len(),
                    "snapshot read failed; writing every day of this chunk"
                ),
            }
        }
        (stored, known)
    }

    async fn full(
        &self,
        entity: &EntityKey,
        aggregation: &Aggregation,
    ) -> Result<ReconcileReport, EngineError> {
        let store = self.store;
        let reset_failed = |source| EngineError::ResetFailed {
            entity: entity.clone(),
            source,
        };

        match self
            .retry
            .run("normalize_null_counters", || store.normalize_null_counters(entity))
            .await
        {
            Ok(0) => {}
            Ok(n) => tracing::info!(entity = %entity, rows = n, "null counters normalised"),
            Err(e) => tracing::warn!(entity = %entity, error = %e, "null counter normalisation failed"),
        }

        let snapshot = self
            .retry
            .run("select_period_counters", || store.select_period_counters(entity, None))
            .await
            .map_err(reset_failed)?;

        let all = &ResetScope::All;
        let reset_rows = self
            .retry
            .run("reset_period_counters", || store.reset_period_counters(entity, all))
            .await
            .map_err(reset_failed)?;
        tracing::info!(entity = %entity, rows = reset_rows, "all stored counters reset");

        let mut report = ReconcileReport::default();
        for (day, counts) in &aggregation.days {
            let written = self.write(entity, *day, *counts).await;
            let outcome = match (written, snapshot.get(day)) {
                (failed @ DayOutcome::Failed { .. }, _) => failed,
                (_, Some(prev)) if prev == counts => DayOutcome::Unchanged,
                (_, Some(_)) => DayOutcome::Updated,
                (_, None) => DayOutcome::Created,
            };
            report.outcomes.insert(*day, outcome);
        }

        report.zeroed_days = snapshot
            .iter()
            .filter(|(d, c)| !aggregation.days.contains_key(*d) && !c.is_zero())
            .count() as u64;
        if report.zeroed_days > 0 {
            tracing::info!(
                entity = %entity,
                zeroed_days = report.zeroed_days,
                "stored days no longer absorb any event"
            );
        }
        Ok(report)
    }

    async fn reset_then_write(
        &self,
        entity: &EntityKey,
        day: NaiveDate,
        counts: CategoryCounts,
    ) -> DayOutcome {
        let store = self.store;
        let scope = &ResetScope::Dates(vec![day]);
        if let Err(e) = self
            .retry
            .run("reset_period_counters", || store.reset_period_counters(entity, scope))
            .await
        {
            tracing::error!(entity = %entity, day = %day, error = %e, "day reset failed");
            return DayOutcome::Failed {
                reason: format!("reset: {e}"),
            };
        }
        self.write(entity, day, counts).await
    }

    async fn write(&self, entity: &EntityKey, day: NaiveDate, counts: CategoryCounts) -> DayOutcome {
        let store = self.store;
        match self
            .retry
            .run("upsert_period_counters", || {
                store.upsert_period_counters(entity, day, counts)
            })
            .await
        {
            Ok(kind) => {
                tracing::debug!(entity = %entity, day = %day, counts = %counts, "day written");
                kind.into()
            }
            Err(e) => {
                tracing::error!(entity = %entity, day = %day, error = %e, "day write failed");
                DayOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
