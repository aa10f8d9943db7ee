use tda_schemas::EntityKey;
use thiserror::Error;

/// Failure reported by a store port.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Connection refused, pool exhausted, network error.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store call {op} timed out after {after_ms} ms")]
    Timeout { op: &'static str, after_ms: u64 },
    #[error("query failed: {0}")]
    Query(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout { .. })
    }
}

/// Errors that abort a whole entity pass. Nothing has been written when one is returned.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("calendar unavailable for {entity}: {source}")]
    CalendarUnavailable {
        entity: EntityKey,
        #[source]
        source: StoreError,
    },

    #[error("event set unavailable for {entity}: {source}")]
    EventsUnavailable {
        entity: EntityKey,
        #[source]
        source: StoreError,
    },

    #[error("full reset failed for {entity}: {source}")]
    ResetFailed {
        entity: EntityKey,
        #[source]
        source: StoreError,
    },

    #[error("pass for {entity} aborted: {reason}")]
    PassAborted { entity: EntityKey, reason: String },
}

impl EngineError {
    pub fn entity(&self) -> &EntityKey {
        match self {
            EngineError::CalendarUnavailable { entity, .. }
            | EngineError::EventsUnavailable { entity, .. }
            | EngineError::ResetFailed { entity, .. }
            | EngineError::PassAborted { entity, .. } => entity,
        }
    }
}
