//! Command handlers for the `tda` binary.
//!
//! Shared wiring (config -> settings -> Postgres-backed engine) lives here.

pub mod db;
pub mod pass;

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tda_config::{report_unused_keys, ConfigMode, EngineConfig, UnusedKeyPolicy};
use tda_reconcile::{Engine, EngineSettings, RetryPolicy};

/// How reports are printed.
pub struct Output {
    pub json: bool,
}

impl Output {
    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let s = serde_json::to_string_pretty(value).context("serialize report")?;
        println!("{s}");
        Ok(())
    }
}

pub struct EngineContext {
    pub config_hash: String,
    pub config: EngineConfig,
    pub engine: Engine,
}

impl EngineContext {
    /// Load layered config, check unused keys, connect, and build the engine.
    pub async fn open(
        config_paths: &[String],
        mode: ConfigMode,
        policy: UnusedKeyPolicy,
    ) -> Result<Self> {
        let path_refs: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
        let loaded = tda_config::load_layered_yaml(&path_refs)?;

        let report = report_unused_keys(mode, &loaded.config_json, policy)?;
        if !report.is_clean() {
            eprintln!(
                "WARN: CONFIG_UNUSED_KEYS mode={} unused_leaf_keys={}",
                mode.as_str(),
                report.unused_leaf_pointers.len()
            );
            for p in report.unused_leaf_pointers.iter().take(50) {
                eprintln!("  unused={p}");
            }
        }

        let config = loaded.engine_config()?;
        let db_url = tda_config::resolve_database_url(&loaded.config_json)?;
        let pool = tda_db::connect(db_url.expose())
            .await
            .with_context(|| format!("connect using {}", db_url.env_name()))?;
        let store = Arc::new(tda_db::PgStore::new(pool));

        tracing::info!(
            config_hash = %loaded.config_hash,
            mode = mode.as_str(),
            "engine configured"
        );
        let engine = Engine::new(store.clone(), store, engine_settings(&config));
        Ok(Self {
            config_hash: loaded.config_hash,
            config,
            engine,
        })
    }
}

pub fn engine_settings(cfg: &EngineConfig) -> EngineSettings {
    EngineSettings {
        activity_threshold: cfg.engine.activity_threshold,
        chunk_size: cfg.engine.chunk_size,
        min_event_date: cfg.engine.min_event_date,
        max_parallel_entities: cfg.engine.max_parallel_entities,
        retry: RetryPolicy {
            timeout: Duration::from_millis(cfg.store.timeout_ms),
            max_retries: cfg.store.max_retries,
            backoff_initial: Duration::from_millis(cfg.store.backoff_initial_ms),
            backoff_max: Duration::from_millis(cfg.store.backoff_max_ms),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_config() {
        let loaded = tda_config::load_layered_yaml_from_strings(&[
            "engine:\n  activity_threshold: 10\n  chunk_size: 5\nstore:\n  timeout_ms: 750\n  max_retries: 1\n",
        ])
        .unwrap();
        let s = engine_settings(&loaded.engine_config().unwrap());

        assert_eq!(s.activity_threshold, 10);
        assert_eq!(s.chunk_size, 5);
        assert_eq!(s.max_parallel_entities, 4);
        assert_eq!(s.min_event_date, chrono::NaiveDate::from_ymd_opt(2020, 1, 1));
        assert_eq!(s.retry.timeout, Duration::from_millis(750));
        assert_eq!(s.retry.max_retries, 1);
        assert_eq!(s.retry.backoff_max, Duration::from_millis(2000));
    }
}
