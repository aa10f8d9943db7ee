//! Event date -> absorbing trading day.
//!
//! DailyDirect: identity, whether or not the date is a trading day.
//!
//! CarryForward, for a date `d`:
//! 1. `d` is a trading day -> `d`
//! 2. else the smallest trading day `> d`
//! 3. else (no later day) the last trading day, when `d >= last`
//! 4. else unmapped. An empty calendar leaves every date unmapped.
//!
//! Pure: identical inputs always give identical output.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

use crate::calendar::Calendar;
use crate::types::Strategy;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DayMapping {
    assigned: BTreeMap<NaiveDate, NaiveDate>,
    unmapped: BTreeSet<NaiveDate>,
}

impl DayMapping {
    pub fn absorbing_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        self.assigned.get(&date).copied()
    }

    pub fn is_unmapped(&self, date: NaiveDate) -> bool {
        self.unmapped.contains(&date)
    }

    pub fn absorbing_days(&self) -> BTreeSet<NaiveDate> {
        self.assigned.values().copied().collect()
    }

    /// Source dates absorbed by `day`, ascending.
    pub fn dates_for(&self, day: NaiveDate) -> Vec<NaiveDate> {
        self.assigned
            .iter()
            .filter(|(_, to)| **to == day)
            .map(|(from, _)| *from)
            .collect()
    }

    pub fn unmapped(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.unmapped.iter().copied()
    }

    pub fn mapped_len(&self) -> usize {
        self.assigned.len()
    }

    pub fn unmapped_len(&self) -> usize {
        self.unmapped.len()
    }
}

pub fn map_dates(
    dates: impl IntoIterator<Item = NaiveDate>,
    calendar: &Calendar,
    strategy: Strategy,
) -> DayMapping {
    let mut out = DayMapping::default();
    for d in dates {
        match absorbing_day(d, calendar, strategy) {
            Some(day) => {
                out.assigned.insert(d, day);
            }
            None => {
                out.unmapped.insert(d);
            }
        }
    }
    out
}

fn absorbing_day(d: NaiveDate, calendar: &Calendar, strategy: Strategy) -> Option<NaiveDate> {
    match strategy {
        Strategy::DailyDirect => Some(d),
        Strategy::CarryForward => {
            if calendar.contains(d) {
                return Some(d);
            }
            if let Some(next) = calendar.next_after(d) {
                return Some(next);
            }
            calendar.last().filter(|last| d >= *last)
        }
    }
}

/// Half-open date range `(after, through]` whose events all map to one day.
/// `None` on either side means unbounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbsorptionWindow {
    pub after: Option<NaiveDate>,
    pub through: Option<NaiveDate>,
}

impl AbsorptionWindow {
    pub fn contains(&self, d: NaiveDate) -> bool {
        self.after.map_or(true, |a| d > a) && self.through.map_or(true, |t| d <= t)
    }
}

/// Every date that maps to `day`, as a range.
///
/// CarryForward: from the previous trading day (exclusive) to `day`; the first
/// trading day is open to the left and the last one open to the right.
/// Returns `None` when `day` cannot absorb anything under `strategy`.
pub fn absorption_window(
    day: NaiveDate,
    calendar: &Calendar,
    strategy: Strategy,
) -> Option<AbsorptionWindow> {
    match strategy {
        Strategy::DailyDirect => Some(AbsorptionWindow {
            after: day.pred_opt(),
            through: Some(day),
        }),
        Strategy::CarryForward => {
            if !calendar.contains(day) {
                return None;
            }
            let through = if calendar.last() == Some(day) {
                None
            } else {
                Some(day)
            };
            Some(AbsorptionWindow {
                after: calendar.previous_before(day),
                through,
            })
        }
    }
}
