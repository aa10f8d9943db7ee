//! Batch isolation, same-entity serialisation and chunked store reads.

use chrono::{Days, NaiveDate};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tda_reconcile::{BatchJob, DayOutcome, Engine, EngineError, EngineSettings, OutcomeKind, StoreError};
use tda_schemas::{Category, CategoryCounts, EntityKey};
use tda_testkit::{memory_store_from_csv, test_settings, Fault, MemoryStore, StoreOp};

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

fn key(s: &str) -> EntityKey {
    EntityKey::new(s).unwrap()
}

fn fixture(name: &str) -> String {
    format!("{}/fixtures/{name}", env!("CARGO_MANIFEST_DIR"))
}

#[tokio::test]
async fn failing_entity_does_not_affect_the_rest_of_the_batch() {
    let store = Arc::new(MemoryStore::new());
    for name in ["AAA", "BBB", "CCC"] {
        store.add_event(&key(name), d(3), Category::Positive);
    }
    store.fail_for_entity(
        &key("BBB"),
        StoreOp::TradingDays,
        StoreError::Unavailable("replica lag".to_string()),
    );
    let engine = Engine::new(store.clone(), store.clone(), test_settings());

    let jobs = ["AAA", "BBB", "CCC"]
        .into_iter()
        .map(|n| BatchJob::process_new(key(n), vec![d(3)]))
        .collect();
    let report = engine.run_batch(jobs).await;

    assert_eq!(report.entries.len(), 3);
    assert_eq!(
        report.entries.iter().map(|e| e.entity.as_str()).collect::<Vec<_>>(),
        vec!["AAA", "BBB", "CCC"]
    );
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert!(!report.is_clean());
    assert!(matches!(
        report.get(&key("BBB")),
        Some(Err(EngineError::CalendarUnavailable { .. }))
    ));
    assert_eq!(store.counters(&key("AAA"), d(3)), Some(CategoryCounts::new(1, 0, 0)));
    assert_eq!(store.counters(&key("CCC"), d(3)), Some(CategoryCounts::new(1, 0, 0)));
    assert_eq!(store.row(&key("BBB"), d(3)), None);
}

#[tokio::test]
async fn passes_over_one_entity_never_overlap() {
    let store = Arc::new(MemoryStore::new());
    let fpt = key("FPT");
    store.add_event(&fpt, d(3), Category::Positive);
    store.inject(StoreOp::TradingDays, Fault::Delay(Duration::from_millis(80)));
    let engine = Engine::new(store.clone(), store.clone(), test_settings());
    let other = engine.clone();

    let dates = [d(3)];
    let started = Instant::now();
    let (a, b) = tokio::join!(
        engine.process_new(&fpt, &dates),
        other.recompute_all(&fpt)
    );
    let elapsed = started.elapsed();

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert!(elapsed >= Duration::from_millis(160), "passes overlapped: {elapsed:?}");
    assert_eq!(store.counters(&fpt, d(3)), Some(CategoryCounts::new(1, 0, 0)));
}

#[tokio::test]
async fn batch_respects_parallelism_bound() {
    let store = Arc::new(MemoryStore::new());
    store.inject(StoreOp::TradingDays, Fault::Delay(Duration::from_millis(60)));
    let settings = EngineSettings {
        max_parallel_entities: 1,
        ..test_settings()
    };
    let engine = Engine::new(store.clone(), store.clone(), settings);

    let started = Instant::now();
    let report = engine
        .run_batch(vec![
            BatchJob::recompute_all(key("AAA")),
            BatchJob::recompute_all(key("BBB")),
        ])
        .await;

    assert!(report.is_clean());
    assert!(started.elapsed() >= Duration::from_millis(120));
}

#[tokio::test]
async fn new_dates_are_fetched_in_chunks() {
    let store = Arc::new(MemoryStore::new());
    let imp = key("IMP");
    let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
    let dates: Vec<NaiveDate> = (0..45).map(|i| start + Days::new(i)).collect();
    for date in &dates {
        store.add_event(&imp, *date, Category::Neutral);
    }
    let settings = EngineSettings {
        chunk_size: 20,
        activity_threshold: 100,
        ..test_settings()
    };
    let engine = Engine::new(store.clone(), store.clone(), settings);

    let report = engine.process_new(&imp, &dates).await.unwrap();

    assert_eq!(store.calls(StoreOp::Events), 3);
    assert_eq!(store.calls(StoreOp::PeriodCounters), 3);
    assert_eq!(report.outcomes.len(), 45);
    assert!(report.is_complete());
    assert_eq!(store.all_counters(&imp).len(), 45);
}

#[tokio::test]
async fn failed_snapshot_chunk_rewrites_only_its_own_days() {
    let store = Arc::new(MemoryStore::new());
    let imp = key("IMP");
    let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
    let dates: Vec<NaiveDate> = (0..45).map(|i| start + Days::new(i)).collect();
    for date in &dates {
        store.add_event(&imp, *date, Category::Positive);
    }
    let settings = EngineSettings {
        chunk_size: 20,
        activity_threshold: 100,
        ..test_settings()
    };
    let engine = Engine::new(store.clone(), store.clone(), settings);
    assert!(engine.process_new(&imp, &dates).await.unwrap().is_complete());

    // Query errors are not retried, so exactly the first chunk read fails.
    store.inject(
        StoreOp::PeriodCounters,
        Fault::Times(1, StoreError::Query("snapshot".into())),
    );
    let report = engine.process_new(&imp, &dates).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.count(OutcomeKind::Updated), 20);
    assert_eq!(report.count(OutcomeKind::Unchanged), 25);
    for date in &dates[..20] {
        assert_eq!(report.outcomes[date], DayOutcome::Updated);
    }
    for date in &dates[20..] {
        assert_eq!(report.outcomes[date], DayOutcome::Unchanged);
    }
    assert_eq!(store.counters(&imp, dates[0]), Some(CategoryCounts::new(1, 0, 0)));
}

#[tokio::test]
async fn csv_fixtures_end_to_end() {
    let store = Arc::new(
        memory_store_from_csv(&fixture("events_small.csv"), &fixture("calendar_small.csv")).unwrap(),
    );
    let settings = EngineSettings {
        activity_threshold: 5,
        ..test_settings()
    };
    let engine = Engine::new(store.clone(), store.clone(), settings);

    let report = engine
        .run_batch(vec![
            BatchJob::recompute_all(key("FPT")),
            BatchJob::recompute_all(key("VCB")),
        ])
        .await;
    assert!(report.is_clean());

    // FPT has 5 labelled events: carry-forward
    let fpt = key("FPT");
    assert_eq!(store.counters(&fpt, d(2)), Some(CategoryCounts::new(0, 0, 1)));
    assert_eq!(store.counters(&fpt, d(5)), Some(CategoryCounts::new(1, 1, 0)));
    assert_eq!(store.counters(&fpt, d(8)), Some(CategoryCounts::new(1, 0, 1)));
    assert_eq!(store.all_counters(&fpt).len(), 3);

    // VCB has 2: daily-direct, 01-06 becomes a virtual day
    let vcb = key("VCB");
    assert_eq!(store.counters(&vcb, d(3)), Some(CategoryCounts::new(1, 0, 0)));
    assert_eq!(store.counters(&vcb, d(6)), Some(CategoryCounts::new(0, 1, 0)));
    assert!(!store.row(&vcb, d(6)).unwrap().has_quote);
    assert_eq!(store.counters(&vcb, d(2)), Some(CategoryCounts::zero()));
}
