// CSV ingestion into `events` and `trading_days`.
//
// Rejected rows (blank entity, bad date, unknown category label) are counted
// in the report and never inserted. Each file is loaded in one transaction.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::path::Path;
use tda_schemas::{Category, EntityKey};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub rows_read: u64,
    pub rows_ok: u64,
    pub rows_rejected: u64,
    pub rows_inserted: u64,
    /// Calendar only: days that already existed and were (re)marked as quoted.
    pub rows_updated: u64,
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// `entity,date[,category]`. An empty category is stored as null (unclassified).
pub async fn ingest_events_csv(pool: &PgPool, path: &Path) -> Result<IngestReport> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("open events csv: {}", path.display()))?;
    let mut report = IngestReport::default();
    let mut tx = pool.begin().await.context("ingest_events_csv: begin failed")?;

    for (i, rec) in rdr.records().enumerate() {
        let rec = rec.with_context(|| format!("read events csv row {}", i + 1))?;
        report.rows_read += 1;

        let entity = rec.get(0).and_then(|s| EntityKey::new(s).ok());
        let date = rec.get(1).and_then(parse_date);
        let label = rec.get(2).map(str::trim).filter(|s| !s.is_empty());
        let category = match label {
            None => Some(None),
            Some(l) => Category::parse(l).map(|c| Some(c.as_str())),
        };

        let (Some(entity), Some(date), Some(category)) = (entity, date, category) else {
            tracing::warn!(row = i + 1, record = ?rec, "events csv row rejected");
            report.rows_rejected += 1;
            continue;
        };
        report.rows_ok += 1;

        sqlx::query(
            r#"
            insert into events (entity, event_date, category)
            values ($1, $2, $3)
            "#,
        )
        .bind(entity.as_str())
        .bind(date)
        .bind(category)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("insert event row {}", i + 1))?;
        report.rows_inserted += 1;
    }

    tx.commit().await.context("ingest_events_csv: commit failed")?;
    tracing::info!(
        path = %path.display(),
        read = report.rows_read,
        inserted = report.rows_inserted,
        rejected = report.rows_rejected,
        "events ingested"
    );
    Ok(report)
}

/// `entity,date`. Each row becomes (or re-marks) a quoted trading day; counters are kept.
pub async fn ingest_calendar_csv(pool: &PgPool, path: &Path) -> Result<IngestReport> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("open calendar csv: {}", path.display()))?;
    let mut report = IngestReport::default();
    let mut tx = pool.begin().await.context("ingest_calendar_csv: begin failed")?;

    for (i, rec) in rdr.records().enumerate() {
        let rec = rec.with_context(|| format!("read calendar csv row {}", i + 1))?;
        report.rows_read += 1;

        let entity = rec.get(0).and_then(|s| EntityKey::new(s).ok());
        let date = rec.get(1).and_then(parse_date);
        let (Some(entity), Some(date)) = (entity, date) else {
            tracing::warn!(row = i + 1, record = ?rec, "calendar csv row rejected");
            report.rows_rejected += 1;
            continue;
        };
        report.rows_ok += 1;

        // inserted = (xmax = 0) in Postgres (true on insert, false on update).
        let inserted: bool = sqlx::query_scalar(
            r#"
            insert into trading_days (entity, day, has_quote)
            values ($1, $2, true)
            on conflict (entity, day) do update set
              has_quote  = true,
              updated_at = now()
            returning (xmax = 0)
            "#,
        )
        .bind(entity.as_str())
        .bind(date)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("upsert trading day row {}", i + 1))?;

        if inserted {
            report.rows_inserted += 1;
        } else {
            report.rows_updated += 1;
        }
    }

    tx.commit().await.context("ingest_calendar_csv: commit failed")?;
    tracing::info!(
        path = %path.display(),
        read = report.rows_read,
        inserted = report.rows_inserted,
        updated = report.rows_updated,
        rejected = report.rows_rejected,
        "calendar ingested"
    );
    Ok(report)
}
