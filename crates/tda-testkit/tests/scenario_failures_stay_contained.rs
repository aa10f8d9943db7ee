//! Read failures abort before any write; write failures stay per-day.

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tda_reconcile::{DayOutcome, Engine, EngineError, EngineSettings, OutcomeKind, StoreError, Strategy};
use tda_schemas::{Category, CategoryCounts, EntityKey};
use tda_testkit::{test_settings, Fault, MemoryStore, StoreOp, StoredRow};

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

fn down() -> StoreError {
    StoreError::Unavailable("connection refused".to_string())
}

fn five_days() -> (Arc<MemoryStore>, Engine, EntityKey, Vec<NaiveDate>) {
    let key = EntityKey::new("IMP").unwrap();
    let store = Arc::new(MemoryStore::new());
    let days: Vec<NaiveDate> = (10..15).map(d).collect();
    for day in &days {
        store.add_event(&key, *day, Category::Positive);
    }
    let engine = Engine::new(store.clone(), store.clone(), test_settings());
    (store, engine, key, days)
}

#[tokio::test]
async fn one_failed_write_does_not_stop_the_others() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (store, engine, key, days) = five_days();
    store.fail_upsert_on(d(12), StoreError::Query("constraint violated".to_string()));

    let report = engine.process_new(&key, &days).await.unwrap();

    assert_eq!(report.count(OutcomeKind::Created), 4);
    assert!(!report.is_complete());
    assert_eq!(report.failed_days(), vec![d(12)]);
    assert!(matches!(&report.outcomes[&d(12)], DayOutcome::Failed { reason } if reason.contains("constraint")));
    assert_eq!(store.row(&key, d(12)), None);
    // non-retryable: a single attempt
    assert_eq!(store.calls(StoreOp::Upsert), 5);

    store.clear_upsert_failures();
    let retry = engine.retry_failed(&key, &report.failed_days()).await.unwrap();
    assert_eq!(retry.outcomes.len(), 1);
    assert_eq!(retry.outcomes[&d(12)], DayOutcome::Created);
    assert_eq!(store.all_counters(&key).len(), 5);
}

#[tokio::test]
async fn calendar_failure_aborts_without_writes() {
    let (store, engine, key, days) = five_days();
    store.inject(StoreOp::TradingDays, Fault::Always(down()));

    let err = engine.process_new(&key, &days).await.unwrap_err();

    assert!(matches!(err, EngineError::CalendarUnavailable { .. }));
    assert_eq!(err.entity(), &key);
    // first attempt plus two retries
    assert_eq!(store.calls(StoreOp::TradingDays), 3);
    assert_eq!(store.calls(StoreOp::Upsert), 0);
    assert!(store.write_log().is_empty());
}

#[tokio::test]
async fn event_read_failure_aborts_without_writes() {
    let (store, engine, key, days) = five_days();
    store.inject(StoreOp::Events, Fault::Always(down()));

    let err = engine.process_new(&key, &days).await.unwrap_err();
    assert!(matches!(err, EngineError::EventsUnavailable { .. }));

    let err = engine.recompute_all(&key).await.unwrap_err();
    assert!(matches!(err, EngineError::EventsUnavailable { .. }));

    assert_eq!(store.calls(StoreOp::Reset), 0);
    assert!(store.write_log().is_empty());
}

#[tokio::test]
async fn failed_full_reset_leaves_stored_counters_alone() {
    let (store, engine, key, _) = five_days();
    store.set_row(&key, d(10), StoredRow::quote(CategoryCounts::new(7, 0, 0)));
    store.inject(StoreOp::Reset, Fault::Always(down()));

    let err = engine.recompute_all(&key).await.unwrap_err();

    assert!(matches!(err, EngineError::ResetFailed { .. }));
    assert_eq!(store.counters(&key, d(10)), Some(CategoryCounts::new(7, 0, 0)));
    assert_eq!(store.calls(StoreOp::Upsert), 0);
}

#[tokio::test]
async fn failed_count_degrades_to_carry_forward() {
    let (store, engine, key, days) = five_days();
    store.add_trading_days(&key, [d(11), d(14)]);
    store.inject(StoreOp::EventCount, Fault::Always(down()));

    let report = engine.process_new(&key, &days).await.unwrap();

    assert_eq!(report.strategy, Strategy::CarryForward);
    assert_eq!(report.event_count, None);
    assert!(report.classification_degraded.is_some());
    assert_eq!(store.counters(&key, d(11)), Some(CategoryCounts::new(2, 0, 0)));
    assert_eq!(store.counters(&key, d(14)), Some(CategoryCounts::new(3, 0, 0)));
    assert_eq!(store.row(&key, d(12)), None);
}

#[tokio::test]
async fn slow_write_times_out_as_a_failed_day() {
    let (store, engine, key, _) = five_days();
    store.inject(StoreOp::Upsert, Fault::Delay(Duration::from_millis(500)));

    let report = engine.process_new(&key, &[d(10)]).await.unwrap();

    match &report.outcomes[&d(10)] {
        DayOutcome::Failed { reason } => assert!(reason.contains("timed out"), "{reason}"),
        other => panic!("expected Failed, got {other:?}"),
    }
    // timeouts are retried
    assert_eq!(store.calls(StoreOp::Upsert), 3);
}

#[tokio::test]
async fn transient_write_failure_recovers_on_retry() {
    let (store, engine, key, _) = five_days();
    store.inject(StoreOp::Upsert, Fault::Times(2, down()));

    let report = engine.process_new(&key, &[d(10)]).await.unwrap();

    assert_eq!(report.outcomes[&d(10)], DayOutcome::Created);
    assert_eq!(store.calls(StoreOp::Upsert), 3);
    assert_eq!(store.counters(&key, d(10)), Some(CategoryCounts::new(1, 0, 0)));
}

#[tokio::test]
async fn retry_failed_skips_days_that_cannot_absorb() {
    let (store, _, key, _) = five_days();
    store.add_trading_days(&key, [d(11)]);
    let settings = EngineSettings {
        activity_threshold: 1,
        ..test_settings()
    };
    let engine = Engine::new(store.clone(), store.clone(), settings);

    // 01-12 is not a trading day under carry-forward
    let report = engine.retry_failed(&key, &[d(11), d(12)]).await.unwrap();

    assert_eq!(report.outcomes.keys().copied().collect::<Vec<_>>(), vec![d(11)]);
    assert_eq!(store.counters(&key, d(11)), Some(CategoryCounts::new(5, 0, 0)));
}
