//! tda-schemas
//!
//! Shared domain records for the trading-day aggregation workspace:
//! entity keys, sentiment categories, per-day counters and events.
//!
//! Dates are `chrono::NaiveDate` everywhere past the storage/CLI boundary.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Entity key
// ---------------------------------------------------------------------------

/// Stable key of the subject entity (e.g. a stock code such as `"FPT"`).
///
/// Construction trims surrounding whitespace and rejects empty keys, so every
/// `EntityKey` reaching the engine is usable as a storage filter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityKey(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntityKeyError {
    #[error("entity key must not be empty")]
    Empty,
}

impl EntityKey {
    pub fn new(raw: impl Into<String>) -> Result<Self, EntityKeyError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EntityKeyError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityKey {
    type Err = EntityKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EntityKey {
    type Error = EntityKeyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<EntityKey> for String {
    fn from(k: EntityKey) -> Self {
        k.0
    }
}

impl AsRef<str> for EntityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Closed set of sentiment labels produced by the upstream classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Positive,
    Negative,
    Neutral,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Positive, Category::Negative, Category::Neutral];

    /// Label as stored in the event table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Positive => "Positive",
            Category::Negative => "Negative",
            Category::Neutral => "Neutral",
        }
    }

    /// Parse a stored label. Case-insensitive; `None` for empty or unknown labels.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Some(Category::Positive),
            "negative" => Some(Category::Negative),
            "neutral" => Some(Category::Neutral),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// One counter per category for a single (entity, day) aggregate row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub positive: i64,
    pub negative: i64,
    pub neutral: i64,
}

impl CategoryCounts {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn new(positive: i64, negative: i64, neutral: i64) -> Self {
        Self {
            positive,
            negative,
            neutral,
        }
    }

    pub fn get(&self, c: Category) -> i64 {
        match c {
            Category::Positive => self.positive,
            Category::Negative => self.negative,
            Category::Neutral => self.neutral,
        }
    }

    pub fn add(&mut self, c: Category) {
        match c {
            Category::Positive => self.positive += 1,
            Category::Negative => self.negative += 1,
            Category::Neutral => self.neutral += 1,
        }
    }

    pub fn merge(&mut self, other: &CategoryCounts) {
        self.positive += other.positive;
        self.negative += other.negative;
        self.neutral += other.neutral;
    }

    pub fn total(&self) -> i64 {
        self.positive + self.negative + self.neutral
    }

    pub fn is_zero(&self) -> bool {
        self.positive == 0 && self.negative == 0 && self.neutral == 0
    }
}

impl fmt::Display for CategoryCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "P={} N={} Neu={}",
            self.positive, self.negative, self.neutral
        )
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A classified record already scoped to one entity. Immutable once read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Event {
    pub date: NaiveDate,
    pub category: Category,
}

impl Event {
    pub fn new(date: NaiveDate, category: Category) -> Self {
        Self { date, category }
    }
}

/// Category histogram of a set of events.
pub fn histogram<'a>(events: impl IntoIterator<Item = &'a Event>) -> CategoryCounts {
    let mut out = CategoryCounts::zero();
    for e in events {
        out.add(e.category);
    }
    out
}
