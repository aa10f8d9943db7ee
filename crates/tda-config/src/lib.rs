//! tda-config
//!
//! Layered YAML configuration for the aggregation engine.
//!
//! - Documents merge in order: earlier docs are base, later docs override.
//! - The merged document is canonicalized to JSON and hashed (SHA-256) so a
//!   pass report can name the exact configuration it ran under.
//! - Literal secrets are refused; YAML stores env var NAMES only (see [`secrets`]).
//! - Unused keys are reported against a per-command registry of consumed pointers.

pub mod engine;
mod layers;
mod pointer;
pub mod secrets;

pub use engine::{EngineConfig, EngineSection, StoreSection};
pub use layers::{load_layered_yaml, load_layered_yaml_from_strings, LoadedConfig};
pub use secrets::{resolve_database_url, DatabaseUrl, DEFAULT_DATABASE_URL_ENV};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Which command is reading the config. Each reads a different subset of keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    ProcessNew,
    RecomputeAll,
    Status,
    Batch,
}

impl ConfigMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigMode::ProcessNew => "PROCESS_NEW",
            ConfigMode::RecomputeAll => "RECOMPUTE_ALL",
            ConfigMode::Status => "STATUS",
            ConfigMode::Batch => "BATCH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    pub mode: String,
    /// Normalized prefixes the command reads, sorted.
    pub consumed_prefixes: Vec<String>,
    /// Leaves no prefix covers, sorted.
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }

    fn preview(&self, n: usize) -> String {
        let shown: Vec<&str> = self.unused_leaf_pointers.iter().take(n).map(String::as_str).collect();
        format!("[{}]", shown.join(", "))
    }
}

/// Registry of consumed JSON-pointer prefixes per command.
///
/// Only list pointers the command actually reads through [`EngineConfig`] or
/// [`resolve_database_url`].
pub fn consumed_pointers_for_mode(mode: ConfigMode) -> &'static [&'static str] {
    match mode {
        ConfigMode::ProcessNew => &[
            "/engine/activity_threshold",
            "/engine/chunk_size",
            "/engine/min_event_date",
            "/store",
        ],
        ConfigMode::RecomputeAll => &[
            "/engine/activity_threshold",
            "/engine/min_event_date",
            "/store",
        ],
        ConfigMode::Status => &[
            "/engine/activity_threshold",
            "/engine/min_event_date",
            "/store",
        ],
        ConfigMode::Batch => &[
            "/engine/activity_threshold",
            "/engine/chunk_size",
            "/engine/min_event_date",
            "/engine/max_parallel_entities",
            "/engine/entities",
            "/store",
        ],
    }
}

/// Unused-key report for `mode`.
/// `Fail` returns an error when unused keys exist; `Warn` logs and returns the report.
pub fn report_unused_keys(
    mode: ConfigMode,
    config_json: &Value,
    policy: UnusedKeyPolicy,
) -> Result<UnusedKeyReport> {
    let consumed_prefixes: Vec<String> = consumed_pointers_for_mode(mode)
        .iter()
        .map(|p| pointer::normalize(p))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let unused_leaf_pointers: Vec<String> = pointer::leaves(config_json)
        .into_iter()
        .map(|leaf| leaf.pointer)
        .filter(|lp| !consumed_prefixes.iter().any(|cp| pointer::covers(cp, lp)))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let report = UnusedKeyReport {
        mode: mode.as_str().to_string(),
        consumed_prefixes,
        unused_leaf_pointers,
    };
    if report.is_clean() {
        return Ok(report);
    }

    match policy {
        UnusedKeyPolicy::Fail => bail!(
            "CONFIG_UNUSED_KEYS (mode={}): {} unused config leaf key(s) detected. \
            Remove them or update the consumed registry. First few: {}",
            report.mode,
            report.unused_leaf_pointers.len(),
            report.preview(12)
        ),
        UnusedKeyPolicy::Warn => {
            tracing::warn!(
                mode = report.mode.as_str(),
                unused = report.unused_leaf_pointers.len(),
                first = %report.preview(5),
                "config contains keys this command does not read"
            );
            Ok(report)
        }
    }
}
