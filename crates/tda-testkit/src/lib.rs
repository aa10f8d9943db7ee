use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::time::Duration;
use tda_reconcile::{EngineSettings, RetryPolicy};
use tda_schemas::EntityKey;

mod memory;

pub use memory::{Fault, MemoryStore, StoreOp, StoredRow};

/// One row of an events fixture: `entity,date,category` (category may be empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub entity: EntityKey,
    pub date: NaiveDate,
    pub category: Option<String>,
}

/// One row of a calendar fixture: `entity,date`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarRow {
    pub entity: EntityKey,
    pub date: NaiveDate,
}

pub fn load_events_csv(path: &str) -> Result<Vec<EventRow>> {
    let mut rdr = csv::Reader::from_path(path).with_context(|| format!("open events csv: {path}"))?;
    let mut out = Vec::new();

    for (i, rec) in rdr.records().enumerate() {
        let rec = rec.with_context(|| format!("read events csv row {}", i + 1))?;
        if rec.len() < 2 {
            bail!("events csv row {}: expected entity,date[,category]", i + 1);
        }
        let entity = EntityKey::new(&rec[0]).with_context(|| format!("row {} entity", i + 1))?;
        let date = parse_date(&rec[1]).with_context(|| format!("row {} date", i + 1))?;
        let category = rec
            .get(2)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        out.push(EventRow {
            entity,
            date,
            category,
        });
    }
    Ok(out)
}

pub fn load_calendar_csv(path: &str) -> Result<Vec<CalendarRow>> {
    let mut rdr =
        csv::Reader::from_path(path).with_context(|| format!("open calendar csv: {path}"))?;
    let mut out = Vec::new();

    for (i, rec) in rdr.records().enumerate() {
        let rec = rec.with_context(|| format!("read calendar csv row {}", i + 1))?;
        if rec.len() < 2 {
            bail!("calendar csv row {}: expected entity,date", i + 1);
        }
        out.push(CalendarRow {
            entity: EntityKey::new(&rec[0]).with_context(|| format!("row {} entity", i + 1))?,
            date: parse_date(&rec[1]).with_context(|| format!("row {} date", i + 1))?,
        });
    }
    Ok(out)
}

/// Build a store from fixture files.
pub fn memory_store_from_csv(events_path: &str, calendar_path: &str) -> Result<MemoryStore> {
    let store = MemoryStore::new();
    for row in load_calendar_csv(calendar_path)? {
        store.add_trading_days(&row.entity, [row.date]);
    }
    for row in load_events_csv(events_path)? {
        store.add_raw_event(&row.entity, row.date, row.category.as_deref());
    }
    Ok(store)
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", s.trim()))
}

/// Settings for scenario tests: no cutoff, millisecond retries.
pub fn test_settings() -> EngineSettings {
    EngineSettings {
        min_event_date: None,
        retry: RetryPolicy {
            timeout: Duration::from_millis(200),
            max_retries: 2,
            backoff_initial: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
        },
        ..EngineSettings::default()
    }
}
