use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use tda_reconcile::{EventSource, PeriodStore, ResetScope, StoreError, UpsertKind};
use tda_schemas::{Category, CategoryCounts, EntityKey, Event};

/// Postgres implementation of both store ports.
///
/// Null counters read as 0. Rows inserted by `upsert_period_counters` carry
/// `has_quote = false`, so they never show up in the calendar.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn store_err(op: &'static str, e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(format!("{op}: {e}")),
        sqlx::Error::RowNotFound => StoreError::NotFound(op.to_string()),
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_) => StoreError::Decode(format!("{op}: {e}")),
        _ => StoreError::Query(format!("{op}: {e}")),
    }
}

fn decode_counts(r: &PgRow) -> Result<(NaiveDate, CategoryCounts), sqlx::Error> {
    let day: NaiveDate = r.try_get("day")?;
    let counts = CategoryCounts::new(
        r.try_get("positive")?,
        r.try_get("negative")?,
        r.try_get("neutral")?,
    );
    Ok((day, counts))
}

/// Rows with labels outside the known set are skipped with a warning.
fn decode_events(entity: &EntityKey, rows: Vec<PgRow>) -> Result<Vec<Event>, sqlx::Error> {
    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
        let date: NaiveDate = r.try_get("event_date")?;
        let label: String = r.try_get("category")?;
        match Category::parse(&label) {
            Some(c) => out.push(Event::new(date, c)),
            None => tracing::warn!(
                entity = %entity,
                date = %date,
                label = %label,
                "unknown event category; row skipped"
            ),
        }
    }
    Ok(out)
}

#[async_trait]
impl EventSource for PgStore {
    async fn select_events(
        &self,
        entity: &EntityKey,
        dates: Option<&[NaiveDate]>,
    ) -> Result<Vec<Event>, StoreError> {
        const OP: &str = "select_events";
        let rows = match dates {
            None => {
                sqlx::query(
                    r#"
                    select event_date, category
                    from events
                    where entity = $1
                      and category is not null
                    order by event_date asc, event_id asc
                    "#,
                )
                .bind(entity.as_str())
                .fetch_all(&self.pool)
                .await
            }
            Some(ds) => {
                sqlx::query(
                    r#"
                    select event_date, category
                    from events
                    where entity = $1
                      and category is not null
                      and event_date = any($2)
                    order by event_date asc, event_id asc
                    "#,
                )
                .bind(entity.as_str())
                .bind(ds)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| store_err(OP, e))?;

        decode_events(entity, rows).map_err(|e| store_err(OP, e))
    }

    async fn select_events_between(
        &self,
        entity: &EntityKey,
        after: Option<NaiveDate>,
        through: Option<NaiveDate>,
    ) -> Result<Vec<Event>, StoreError> {
        const OP: &str = "select_events_between";
        let rows = sqlx::query(
            r#"
            select event_date, category
            from events
            where entity = $1
              and category is not null
              and ($2::date is null or event_date > $2)
              and ($3::date is null or event_date <= $3)
            order by event_date asc, event_id asc
            "#,
        )
        .bind(entity.as_str())
        .bind(after)
        .bind(through)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err(OP, e))?;

        decode_events(entity, rows).map_err(|e| store_err(OP, e))
    }

    async fn select_event_count(&self, entity: &EntityKey) -> Result<u64, StoreError> {
        const OP: &str = "select_event_count";
        let n: i64 = sqlx::query_scalar(
            r#"
            select count(*)::bigint
            from events
            where entity = $1
              and category is not null
              and category <> ''
            "#,
        )
        .bind(entity.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_err(OP, e))?;

        u64::try_from(n).map_err(|_| StoreError::Decode(format!("{OP}: negative count {n}")))
    }
}

#[async_trait]
impl PeriodStore for PgStore {
    async fn select_trading_days(&self, entity: &EntityKey) -> Result<Vec<NaiveDate>, StoreError> {
        sqlx::query_scalar(
            r#"
            select day
            from trading_days
            where entity = $1
              and has_quote
            order by day asc
            "#,
        )
        .bind(entity.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("select_trading_days", e))
    }

    async fn select_period_counters(
        &self,
        entity: &EntityKey,
        dates: Option<&[NaiveDate]>,
    ) -> Result<BTreeMap<NaiveDate, CategoryCounts>, StoreError> {
        const OP: &str = "select_period_counters";
        let rows = match dates {
            None => {
                sqlx::query(
                    r#"
                    select day,
                           coalesce(positive, 0) as positive,
                           coalesce(negative, 0) as negative,
                           coalesce(neutral, 0)  as neutral
                    from trading_days
                    where entity = $1
                    "#,
                )
                .bind(entity.as_str())
                .fetch_all(&self.pool)
                .await
            }
            Some(ds) => {
                sqlx::query(
                    r#"
                    select day,
                           coalesce(positive, 0) as positive,
                           coalesce(negative, 0) as negative,
                           coalesce(neutral, 0)  as neutral
                    from trading_days
                    where entity = $1
                      and day = any($2)
                    "#,
                )
                .bind(entity.as_str())
                .bind(ds)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| store_err(OP, e))?;

        rows.iter()
            .map(decode_counts)
            .collect::<Result<_, _>>()
            .map_err(|e| store_err(OP, e))
    }

    async fn upsert_period_counters(
        &self,
        entity: &EntityKey,
        day: NaiveDate,
        counts: CategoryCounts,
    ) -> Result<UpsertKind, StoreError> {
        // inserted = (xmax = 0): true on insert, false on update.
        let inserted: bool = sqlx::query_scalar(
            r#"
            insert into trading_days (entity, day, has_quote, positive, negative, neutral, updated_at)
            values ($1, $2, false, $3, $4, $5, now())
            on conflict (entity, day) do update set
              positive   = excluded.positive,
              negative   = excluded.negative,
              neutral    = excluded.neutral,
              updated_at = now()
            returning (xmax = 0)
            "#,
        )
        .bind(entity.as_str())
        .bind(day)
        .bind(counts.positive)
        .bind(counts.negative)
        .bind(counts.neutral)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_err("upsert_period_counters", e))?;

        Ok(if inserted {
            UpsertKind::Created
        } else {
            UpsertKind::Updated
        })
    }

    async fn reset_period_counters(
        &self,
        entity: &EntityKey,
        scope: &ResetScope,
    ) -> Result<u64, StoreError> {
        const OP: &str = "reset_period_counters";
        let res = match scope {
            ResetScope::All => {
                sqlx::query(
                    r#"
                    update trading_days
                    set positive = 0, negative = 0, neutral = 0, updated_at = now()
                    where entity = $1
                    "#,
                )
                .bind(entity.as_str())
                .execute(&self.pool)
                .await
            }
            ResetScope::Dates(ds) => {
                sqlx::query(
                    r#"
                    update trading_days
                    set positive = 0, negative = 0, neutral = 0, updated_at = now()
                    where entity = $1
                      and day = any($2)
                    "#,
                )
                .bind(entity.as_str())
                .bind(ds.as_slice())
                .execute(&self.pool)
                .await
            }
        }
        .map_err(|e| store_err(OP, e))?;

        Ok(res.rows_affected())
    }

    async fn normalize_null_counters(&self, entity: &EntityKey) -> Result<u64, StoreError> {
        let res = sqlx::query(
            r#"
            update trading_days
            set positive = coalesce(positive, 0),
                negative = coalesce(negative, 0),
                neutral  = coalesce(neutral, 0),
                updated_at = now()
            where entity = $1
              and (positive is null or negative is null or neutral is null)
            "#,
        )
        .bind(entity.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("normalize_null_counters", e))?;

        Ok(res.rows_affected())
    }
}
