//! Typed view of the `engine:` and `store:` sections.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::secrets::DEFAULT_DATABASE_URL_ENV;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Event count at or above which carry-forward mapping is used.
    pub activity_threshold: u64,
    /// Max dates per store query.
    pub chunk_size: usize,
    /// Events dated before this are ignored by every pass. `null` disables the cutoff.
    pub min_event_date: Option<NaiveDate>,
    pub max_parallel_entities: usize,
    /// Entities processed by `run-batch` when none are given on the command line.
    pub entities: Vec<String>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            activity_threshold: 50,
            chunk_size: 20,
            min_event_date: NaiveDate::from_ymd_opt(2020, 1, 1),
            max_parallel_entities: 4,
            entities: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    /// NAME of the env var holding the Postgres URL.
    pub database_url_env: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_retries: 3,
            backoff_initial_ms: 100,
            backoff_max_ms: 2_000,
            database_url_env: DEFAULT_DATABASE_URL_ENV.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EngineSection,
    pub store: StoreSection,
}

impl EngineConfig {
    pub fn from_config_json(v: &Value) -> Result<Self> {
        let cfg: EngineConfig =
            serde_json::from_value(v.clone()).context("invalid engine/store config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.chunk_size == 0 {
            bail!("CONFIG_INVALID engine.chunk_size must be >= 1");
        }
        if self.engine.max_parallel_entities == 0 {
            bail!("CONFIG_INVALID engine.max_parallel_entities must be >= 1");
        }
        if self.store.timeout_ms == 0 {
            bail!("CONFIG_INVALID store.timeout_ms must be >= 1");
        }
        if self.store.backoff_initial_ms > self.store.backoff_max_ms {
            bail!(
                "CONFIG_INVALID store.backoff_initial_ms ({}) exceeds store.backoff_max_ms ({})",
                self.store.backoff_initial_ms,
                self.store.backoff_max_ms
            );
        }
        if self.store.database_url_env.trim().is_empty() {
            bail!("CONFIG_INVALID store.database_url_env must name an env var");
        }
        Ok(())
    }
}
