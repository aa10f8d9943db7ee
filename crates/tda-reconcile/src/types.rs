use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tda_schemas::EntityKey;
use uuid::Uuid;

/// How event dates are projected onto trading days. Chosen once per pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    /// Every event date is its own (possibly virtual) trading day.
    DailyDirect,
    /// Non-trading-day events wait for the next trading day.
    CarryForward,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::DailyDirect => "DAILY_DIRECT",
            Strategy::CarryForward => "CARRY_FORWARD",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of reconciling one trading day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DayOutcome {
    Created,
    Updated,
    Unchanged,
    Failed { reason: String },
}

impl DayOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            DayOutcome::Created => OutcomeKind::Created,
            DayOutcome::Updated => OutcomeKind::Updated,
            DayOutcome::Unchanged => OutcomeKind::Unchanged,
            DayOutcome::Failed { .. } => OutcomeKind::Failed,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DayOutcome::Failed { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutcomeKind {
    Created,
    Updated,
    Unchanged,
    Failed,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Created => "created",
            OutcomeKind::Updated => "updated",
            OutcomeKind::Unchanged => "unchanged",
            OutcomeKind::Failed => "failed",
        }
    }
}

/// Which stored days a reset touches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResetScope {
    Dates(Vec<NaiveDate>),
    All,
}

/// What an upsert did to the stored row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertKind {
    Created,
    Updated,
}

impl From<UpsertKind> for DayOutcome {
    fn from(k: UpsertKind) -> Self {
        match k {
            UpsertKind::Created => DayOutcome::Created,
            UpsertKind::Updated => DayOutcome::Updated,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassTrigger {
    ProcessNew,
    RecomputeAll,
    RetryFailed,
}

impl PassTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassTrigger::ProcessNew => "process_new",
            PassTrigger::RecomputeAll => "recompute_all",
            PassTrigger::RetryFailed => "retry_failed",
        }
    }
}

/// Structured outcome of one entity pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub entity: EntityKey,
    pub trigger: PassTrigger,
    pub strategy: Strategy,
    /// Historical event count used for classification; `None` when the count failed.
    pub event_count: Option<u64>,
    /// Set when classification fell back to CarryForward.
    pub classification_degraded: Option<String>,
    pub outcomes: BTreeMap<NaiveDate, DayOutcome>,
    /// Events excluded because their date had no absorbing trading day.
    pub dropped_count: u64,
    pub dropped_dates: Vec<NaiveDate>,
    /// Full recompute only: stored days with non-zero counters that no event maps to anymore.
    pub zeroed_days: u64,
}

impl PassReport {
    pub fn failed_days(&self) -> Vec<NaiveDate> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_failed())
            .map(|(d, _)| *d)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        !self.outcomes.values().any(DayOutcome::is_failed)
    }

    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.values().filter(|o| o.kind() == kind).count()
    }
}

/// Read-only view of an entity's mapping state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub entity: EntityKey,
    pub strategy: Strategy,
    pub event_count: Option<u64>,
    pub classification_degraded: Option<String>,
    pub trading_days: usize,
    pub first_trading_day: Option<NaiveDate>,
    pub last_trading_day: Option<NaiveDate>,
    /// Absorbing days that receive at least one event.
    pub mapped_days: usize,
    pub dropped_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    #[test]
    fn report_helpers_see_failures() {
        let mut outcomes = BTreeMap::new();
        outcomes.insert(d(1, 2), DayOutcome::Created);
        outcomes.insert(d(1, 3), DayOutcome::Failed { reason: "timeout".into() });
        outcomes.insert(d(1, 4), DayOutcome::Unchanged);
        let r = PassReport {
            pass_id: Uuid::nil(),
            entity: EntityKey::new("FPT").unwrap(),
            trigger: PassTrigger::ProcessNew,
            strategy: Strategy::CarryForward,
            event_count: Some(60),
            classification_degraded: None,
            outcomes,
            dropped_count: 0,
            dropped_dates: Vec::new(),
            zeroed_days: 0,
        };
        assert!(!r.is_complete());
        assert_eq!(r.failed_days(), vec![d(1, 3)]);
        assert_eq!(r.count(OutcomeKind::Created), 1);
        assert_eq!(r.count(OutcomeKind::Updated), 0);
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let v = serde_json::to_value(DayOutcome::Failed { reason: "x".into() }).unwrap();
        assert_eq!(v, serde_json::json!({ "outcome": "failed", "reason": "x" }));
        let v = serde_json::to_value(DayOutcome::Created).unwrap();
        assert_eq!(v, serde_json::json!({ "outcome": "created" }));
    }
}
