use tda_schemas::EntityKey;

use crate::retry::RetryPolicy;
use crate::store::EventSource;
use crate::types::Strategy;

pub const DEFAULT_ACTIVITY_THRESHOLD: u64 = 50;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub strategy: Strategy,
    pub event_count: Option<u64>,
    /// Reason the count could not be read; strategy then defaults to CarryForward.
    pub degraded: Option<String>,
}

/// `count >= threshold` is high activity.
pub fn strategy_for_count(count: u64, threshold: u64) -> Strategy {
    if count >= threshold {
        Strategy::CarryForward
    } else {
        Strategy::DailyDirect
    }
}

/// Pick the mapping strategy from the entity's historical event volume.
///
/// Never fails: a count error degrades to CarryForward, the strategy that
/// never creates virtual days.
pub async fn classify(
    events: &dyn EventSource,
    entity: &EntityKey,
    threshold: u64,
    retry: &RetryPolicy,
) -> Classification {
    match retry
        .run("select_event_count", || events.select_event_count(entity))
        .await
    {
        Ok(count) => {
            let strategy = strategy_for_count(count, threshold);
            tracing::info!(
                entity = %entity,
                event_count = count,
                threshold,
                strategy = strategy.as_str(),
                "activity classified"
            );
            Classification {
                strategy,
                event_count: Some(count),
                degraded: None,
            }
        }
        Err(e) => {
            tracing::warn!(
                entity = %entity,
                error = %e,
                "activity classification degraded; defaulting to CARRY_FORWARD"
            );
            Classification {
                strategy: Strategy::CarryForward,
                event_count: None,
                degraded: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_inclusive_for_carry_forward() {
        assert_eq!(strategy_for_count(49, 50), Strategy::DailyDirect);
        assert_eq!(strategy_for_count(50, 50), Strategy::CarryForward);
        assert_eq!(strategy_for_count(51, 50), Strategy::CarryForward);
        assert_eq!(strategy_for_count(0, 50), Strategy::DailyDirect);
    }

    #[test]
    fn zero_threshold_always_carries_forward() {
        assert_eq!(strategy_for_count(0, 0), Strategy::CarryForward);
    }
}
