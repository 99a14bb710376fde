use std::fmt;
use std::str::FromStr;

use jiff::civil::Date;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Streak value of a junked habit that has no active count.
pub const BROKEN_STREAK: i32 = -1;

/// Where a habit sits in the daily lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HabitState {
    /// Done today.
    Today,
    /// Done yesterday; today is still open.
    Yesterday,
    /// Active, with the single grace miss already used.
    Lively,
    /// Streak broken.
    Junked,
}

impl HabitState {
    pub fn as_str(self) -> &'static str {
        match self {
            HabitState::Today => "TODAY",
            HabitState::Yesterday => "YESTERDAY",
            HabitState::Lively => "LIVELY",
            HabitState::Junked => "JUNKED",
        }
    }
}

impl fmt::Display for HabitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HabitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TODAY" => Ok(HabitState::Today),
            "YESTERDAY" => Ok(HabitState::Yesterday),
            "LIVELY" => Ok(HabitState::Lively),
            "JUNKED" => Ok(HabitState::Junked),
            other => Err(format!("unknown habit state '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleEvent {
    UserComplete,
    UserUndo,
    GraceComplete,
    GraceIncomplete,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::UserComplete => "USER_COMPLETE",
            LifecycleEvent::UserUndo => "USER_UNDO",
            LifecycleEvent::GraceComplete => "GRACE_COMPLETE",
            LifecycleEvent::GraceIncomplete => "GRACE_INCOMPLETE",
        };
        f.write_str(name)
    }
}

/// The five lifecycle fields a transition changes and undo restores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleSnapshot {
    pub streak: i32,
    pub longest_streak: i32,
    pub habit_state: HabitState,
    pub junked_date: Option<Date>,
    pub completed_date: Option<Date>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Habit {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub habit_state: HabitState,
    pub streak: i32,
    pub longest_streak: i32,
    pub junked_date: Option<Date>,
    pub completed_date: Option<Date>,
    /// Last calendar day the engine advanced this habit.
    pub processed_date: Date,
    /// Day the user last answered a grace prompt for this habit.
    pub last_resolved_date: Option<Date>,
    /// Values from immediately before the most recent forward transition.
    pub undo: Option<LifecycleSnapshot>,
    pub is_public: bool,
    pub goal_value: Option<f64>,
    pub goal_unit: Option<String>,
}

impl Habit {
    /// A fresh habit: lively, no streak yet, processed as of `today`.
    ///
    /// The creation day counts as already resolved: there is no yesterday to
    /// ask about.
    pub fn new(user_id: &str, name: &str, today: Date) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            habit_state: HabitState::Lively,
            streak: 0,
            longest_streak: 0,
            junked_date: None,
            completed_date: None,
            processed_date: today,
            last_resolved_date: Some(today),
            undo: None,
            is_public: false,
            goal_value: None,
            goal_unit: None,
        }
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        LifecycleSnapshot {
            streak: self.streak,
            longest_streak: self.longest_streak,
            habit_state: self.habit_state,
            junked_date: self.junked_date,
            completed_date: self.completed_date,
        }
    }

    /// Apply a partial update in place. Fields left `None` are untouched.
    pub fn apply(&mut self, update: &HabitUpdate) {
        if let Some(streak) = update.streak {
            self.streak = streak;
        }
        if let Some(longest) = update.longest_streak {
            self.longest_streak = longest;
        }
        if let Some(state) = update.habit_state {
            self.habit_state = state;
        }
        if let Some(junked) = update.junked_date {
            self.junked_date = junked;
        }
        if let Some(completed) = update.completed_date {
            self.completed_date = completed;
        }
        if let Some(processed) = update.processed_date {
            self.processed_date = processed;
        }
        if let Some(resolved) = update.last_resolved_date {
            self.last_resolved_date = resolved;
        }
        if let Some(undo) = update.undo {
            self.undo = Some(undo);
        }
    }

    /// Copy of `self` with `update` applied.
    pub fn with(&self, update: &HabitUpdate) -> Self {
        let mut next = self.clone();
        next.apply(update);
        next
    }
}

/// Field-level partial update produced by transitions and the processor.
///
/// Nullable columns use `Option<Option<_>>`: the outer `None` leaves the
/// field alone, `Some(None)` clears it. Serialize-only: plain serde would read
/// an explicit `null` back as "leave alone".
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HabitUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streak: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longest_streak: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub habit_state: Option<HabitState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub junked_date: Option<Option<Date>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_date: Option<Option<Date>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_date: Option<Date>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_resolved_date: Option<Option<Date>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undo: Option<LifecycleSnapshot>,
}

impl HabitUpdate {
    pub fn is_empty(&self) -> bool {
        *self == HabitUpdate::default()
    }

    /// Later fields win. Used to fold several transitions into one write.
    pub fn merge(mut self, later: HabitUpdate) -> Self {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if later.$field.is_some() { self.$field = later.$field; })*
            };
        }
        take!(
            streak,
            longest_streak,
            habit_state,
            junked_date,
            completed_date,
            processed_date,
            last_resolved_date,
            undo
        );
        self
    }

    /// Only the lifecycle fields, set to the values in `snap`.
    pub fn restoring(snap: &LifecycleSnapshot) -> Self {
        Self {
            streak: Some(snap.streak),
            longest_streak: Some(snap.longest_streak),
            habit_state: Some(snap.habit_state),
            junked_date: Some(snap.junked_date),
            completed_date: Some(snap.completed_date),
            ..Self::default()
        }
    }
}
