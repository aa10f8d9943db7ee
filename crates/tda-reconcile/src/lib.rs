//! tda-reconcile
//!
//! Event-to-trading-day aggregation and reconciliation engine.
//!
//! Pipeline for one entity pass (leaf to root):
//! - calendar: ordered, deduplicated trading days read from the store
//! - classifier: DailyDirect vs CarryForward by historical event volume
//! - mapper: event date -> absorbing trading day
//! - aggregate: per absorbing day category counts, dropped events counted
//! - reconciler: reset-then-write of stored counters (scoped or full)
//! - engine: `process_new`, `recompute_all`, `status`, `run_batch`
//!
//! The mapping/aggregation stages are pure. All IO goes through the
//! [`EventSource`] and [`PeriodStore`] ports, each call under a [`RetryPolicy`].

mod aggregate;
mod calendar;
mod classifier;
mod engine;
mod error;
mod mapper;
mod reconciler;
mod retry;
mod store;
mod types;

pub use aggregate::{aggregate, Aggregation};
pub use calendar::{resolve_calendar, Calendar};
pub use classifier::{classify, strategy_for_count, Classification, DEFAULT_ACTIVITY_THRESHOLD};
pub use engine::{BatchEntry, BatchJob, BatchReport, BatchTrigger, Engine, EngineSettings};
pub use error::{EngineError, StoreError};
pub use mapper::{absorption_window, map_dates, AbsorptionWindow, DayMapping};
pub use reconciler::{ReconcileMode, ReconcileReport, Reconciler};
pub use retry::RetryPolicy;
pub use store::{EventSource, PeriodStore};
pub use types::*;
