use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use tda_schemas::{CategoryCounts, Event};

use crate::mapper::DayMapping;

/// Per absorbing day counts plus the number of events with no absorbing day.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Aggregation {
    pub days: BTreeMap<NaiveDate, CategoryCounts>,
    pub dropped: u64,
}

impl Aggregation {
    /// Combine partial results. Associative and commutative, so chunked
    /// fetching cannot change the outcome.
    pub fn merge(mut self, other: Aggregation) -> Aggregation {
        for (day, counts) in other.days {
            self.days.entry(day).or_default().merge(&counts);
        }
        self.dropped += other.dropped;
        self
    }

    /// Keep only the given absorbing days.
    pub fn restrict_to(mut self, days: &BTreeSet<NaiveDate>) -> Aggregation {
        self.days.retain(|d, _| days.contains(d));
        self
    }

    /// Zero-fill days that received no events.
    pub fn ensure_days(&mut self, days: &BTreeSet<NaiveDate>) {
        for d in days {
            self.days.entry(*d).or_default();
        }
    }

    pub fn total(&self) -> CategoryCounts {
        let mut out = CategoryCounts::zero();
        for c in self.days.values() {
            out.merge(c);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

/// Group events by absorbing day and tally categories.
///
/// An event whose date is unmapped, or absent from `mapping` altogether, is
/// counted in `dropped` and excluded from every day.
pub fn aggregate(events: &[Event], mapping: &DayMapping) -> Aggregation {
    let mut out = Aggregation::default();
    for e in events {
        match mapping.absorbing_day(e.date) {
            Some(day) => out.days.entry(day).or_default().add(e.category),
            None => out.dropped += 1,
        }
    }
    out
}
