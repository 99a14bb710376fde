//! The persistence seam. The engine never touches storage directly; callers
//! hand it something implementing [`LifecycleStore`].

use std::fmt;

use jiff::civil::Date;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::date::{month_start, parse_date};
use crate::error::{EngineError, Result};
use crate::habit::{Habit, HabitUpdate};
use crate::tree::{ActionNode, Forest};

/// Identifies one monthly target bucket, or the undated "future" bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketKey {
    /// Always the first day of the month.
    Month(Date),
    Future,
}

impl BucketKey {
    pub fn month_of(date: Date) -> Self {
        BucketKey::Month(month_start(date))
    }

    /// Storage form: `YYYY-MM-DD` for months, empty for the future bucket.
    pub fn to_storage(self) -> String {
        match self {
            BucketKey::Month(d) => d.to_string(),
            BucketKey::Future => String::new(),
        }
    }

    pub fn from_storage(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(BucketKey::Future);
        }
        let d = parse_date(s)?;
        if d.day() != 1 {
            return Err(EngineError::InvalidDate(format!(
                "bucket key {s} is not the first of a month"
            )));
        }
        Ok(BucketKey::Month(d))
    }

    /// Parse user input: `YYYY-MM`, `YYYY-MM-DD` (any day of the month), or
    /// `future`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("future") {
            return Ok(BucketKey::Future);
        }
        let full = if s.len() == 7 { format!("{s}-01") } else { s.to_string() };
        Ok(BucketKey::month_of(parse_date(&full)?))
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Month(d) => write!(f, "{}", d.strftime("%Y-%m")),
            BucketKey::Future => f.write_str("future"),
        }
    }
}

/// A stored habit that could not be decoded. Carries the raw id and name so
/// the failure can still be reported against the right habit.
#[derive(Clone, Debug, PartialEq)]
pub struct UnreadableHabit {
    pub habit_id: String,
    pub name: String,
    pub error: EngineError,
}

/// One row of a bulk habit fetch: decoded, or unreadable on its own.
pub type HabitRecord = std::result::Result<Habit, UnreadableHabit>;

/// Store collaborator consumed by the processor and the migrator.
///
/// Implementations are expected to give at-most-one-writer semantics per
/// row; the engine does no locking of its own.
pub trait LifecycleStore {
    type Error: Into<EngineError>;

    /// Habits of `user_id` whose `processed_date` is not `today`. A row that
    /// fails to decode is returned as its own `Err` record; the fetch itself
    /// only fails when the store cannot be read at all.
    fn fetch_unprocessed_habits(
        &self,
        user_id: &str,
        today: Date,
    ) -> std::result::Result<Vec<HabitRecord>, Self::Error>;

    fn update_habit(&self, id: Uuid, update: &HabitUpdate) -> std::result::Result<(), Self::Error>;

    /// Missing buckets read as empty forests.
    fn fetch_bucket(&self, user_id: &str, key: BucketKey)
    -> std::result::Result<Forest, Self::Error>;

    fn update_bucket(
        &self,
        user_id: &str,
        key: BucketKey,
        forest: &[ActionNode],
    ) -> std::result::Result<(), Self::Error>;
}
