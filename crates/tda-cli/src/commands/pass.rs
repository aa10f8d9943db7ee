//! Engine pass commands: process-new, recompute-all, retry-failed, status, run-batch.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use tda_config::EngineConfig;
use tda_reconcile::{BatchJob, BatchReport, DayOutcome, OutcomeKind, PassReport, StatusReport};
use tda_schemas::EntityKey;

use super::Output;

fn opt<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

fn print_pass(report: &PassReport) {
    println!(
        "entity={} pass_id={} trigger={} strategy={} event_count={}",
        report.entity,
        report.pass_id,
        report.trigger.as_str(),
        report.strategy.as_str(),
        opt(report.event_count)
    );
    if let Some(reason) = &report.classification_degraded {
        println!("classification_degraded=true reason={reason}");
    }
    println!(
        "created={} updated={} unchanged={} failed={} dropped_count={} zeroed_days={}",
        report.count(OutcomeKind::Created),
        report.count(OutcomeKind::Updated),
        report.count(OutcomeKind::Unchanged),
        report.count(OutcomeKind::Failed),
        report.dropped_count,
        report.zeroed_days
    );
    for d in &report.dropped_dates {
        println!("dropped_date={d}");
    }
    for (day, outcome) in &report.outcomes {
        if let DayOutcome::Failed { reason } = outcome {
            println!("failed_day={day} reason={reason}");
        }
    }
}

/// Print the report; an incomplete pass exits non-zero after printing.
pub fn finish_pass(out: &Output, config_hash: &str, report: &PassReport) -> Result<()> {
    if out.json {
        out.print_json(report)?;
    } else {
        println!("config_hash={config_hash}");
        print_pass(report);
    }

    if !report.is_complete() {
        bail!(
            "PASS_INCOMPLETE entity={} failed_days={} (re-run with: tda retry-failed --entity {} --day ...)",
            report.entity,
            report.count(OutcomeKind::Failed),
            report.entity
        );
    }
    Ok(())
}

pub fn print_status(out: &Output, s: &StatusReport) -> Result<()> {
    if out.json {
        return out.print_json(s);
    }
    println!("entity={}", s.entity);
    println!("strategy={}", s.strategy.as_str());
    println!("event_count={}", opt(s.event_count));
    println!(
        "classification_degraded={}",
        s.classification_degraded.as_deref().unwrap_or("")
    );
    println!("trading_days={}", s.trading_days);
    println!("first_trading_day={}", opt(s.first_trading_day));
    println!("last_trading_day={}", opt(s.last_trading_day));
    println!("mapped_days={}", s.mapped_days);
    println!("dropped_count={}", s.dropped_count);
    Ok(())
}

/// Entities from the command line, else from `engine.entities`.
/// With dates, every job is an incremental pass; without, a full recompute.
pub fn batch_jobs(
    entities: Vec<EntityKey>,
    config: &EngineConfig,
    dates: Vec<NaiveDate>,
) -> Result<Vec<BatchJob>> {
    let entities = if entities.is_empty() {
        config
            .engine
            .entities
            .iter()
            .map(|e| EntityKey::new(e.as_str()).with_context(|| format!("engine.entities: '{e}'")))
            .collect::<Result<Vec<_>>>()?
    } else {
        entities
    };
    if entities.is_empty() {
        bail!("no entities: pass --entity or set engine.entities in config");
    }

    Ok(entities
        .into_iter()
        .map(|e| {
            if dates.is_empty() {
                BatchJob::recompute_all(e)
            } else {
                BatchJob::process_new(e, dates.clone())
            }
        })
        .collect())
}

pub fn finish_batch(out: &Output, config_hash: &str, report: &BatchReport) -> Result<()> {
    if out.json {
        let entries: Vec<serde_json::Value> = report
            .entries
            .iter()
            .map(|e| match &e.result {
                Ok(r) => serde_json::json!({ "entity": e.entity, "report": r }),
                Err(err) => serde_json::json!({ "entity": e.entity, "error": err.to_string() }),
            })
            .collect();
        out.print_json(&entries)?;
    } else {
        println!("config_hash={config_hash}");
        for e in &report.entries {
            match &e.result {
                Ok(r) => print_pass(r),
                Err(err) => println!("entity={} aborted=true error={}", e.entity, err),
            }
        }
        println!(
            "batch_entities={} succeeded={} failed={}",
            report.entries.len(),
            report.succeeded(),
            report.failed()
        );
    }

    if !report.is_clean() {
        bail!(
            "BATCH_INCOMPLETE aborted_entities={} (see per-entity lines above)",
            report.failed()
        );
    }
    Ok(())
}
