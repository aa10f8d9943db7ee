//! Store ports consumed by the engine.
//!
//! Implementations own all date/label parsing. The engine only ever sees
//! `NaiveDate`, [`Event`] and [`CategoryCounts`].

use chrono::NaiveDate;
use std::collections::BTreeMap;
use tda_schemas::{CategoryCounts, EntityKey, Event};

use crate::error::StoreError;
use crate::types::{ResetScope, UpsertKind};

/// Read access to classified events.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    /// Events with a non-null category, optionally restricted to exact dates.
    async fn select_events(
        &self,
        entity: &EntityKey,
        dates: Option<&[NaiveDate]>,
    ) -> Result<Vec<Event>, StoreError>;

    /// Events dated in `(after, through]`. `None` leaves that side unbounded.
    async fn select_events_between(
        &self,
        entity: &EntityKey,
        after: Option<NaiveDate>,
        through: Option<NaiveDate>,
    ) -> Result<Vec<Event>, StoreError>;

    /// Total number of classified events for the entity.
    async fn select_event_count(&self, entity: &EntityKey) -> Result<u64, StoreError>;
}

/// Trading calendar and per-day aggregate counters.
#[async_trait::async_trait]
pub trait PeriodStore: Send + Sync {
    /// Days with a recorded quote. Order and duplicates are not guaranteed.
    async fn select_trading_days(&self, entity: &EntityKey) -> Result<Vec<NaiveDate>, StoreError>;

    /// Stored counters (nulls read as 0), for all rows or only `dates`.
    async fn select_period_counters(
        &self,
        entity: &EntityKey,
        dates: Option<&[NaiveDate]>,
    ) -> Result<BTreeMap<NaiveDate, CategoryCounts>, StoreError>;

    /// Overwrite the counters of one day, creating a quote-less row if absent.
    async fn upsert_period_counters(
        &self,
        entity: &EntityKey,
        day: NaiveDate,
        counts: CategoryCounts,
    ) -> Result<UpsertKind, StoreError>;

    /// Zero the counters in scope. Returns the number of rows touched.
    async fn reset_period_counters(
        &self,
        entity: &EntityKey,
        scope: &ResetScope,
    ) -> Result<u64, StoreError>;

    /// Replace null counters with 0. Returns the number of rows touched.
    async fn normalize_null_counters(&self, entity: &EntityKey) -> Result<u64, StoreError>;
}
