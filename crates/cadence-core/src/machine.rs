//! Pure transition function over a single habit.
//!
//! Every transition returns a [`HabitUpdate`] and leaves the input alone.
//! Forward transitions capture the lifecycle fields from just before the
//! change into the undo snapshot, so undo is exactly one level deep.
//!
//! Demotion is two-step ("two-day rule"): TODAY → YESTERDAY → LIVELY costs
//! nothing; only the next miss (LIVELY → JUNKED) breaks the streak.

use jiff::civil::Date;

use crate::date::add_days;
use crate::error::{EngineError, Result};
use crate::habit::{BROKEN_STREAK, Habit, HabitState, HabitUpdate, LifecycleEvent, LifecycleSnapshot};

pub struct HabitLifecycleMachine;

impl HabitLifecycleMachine {
    pub fn transition(habit: &Habit, event: LifecycleEvent, today: Date) -> Result<HabitUpdate> {
        match event {
            LifecycleEvent::UserComplete => user_complete(habit, today),
            LifecycleEvent::UserUndo => user_undo(habit),
            LifecycleEvent::GraceComplete => grace_complete(habit, today),
            LifecycleEvent::GraceIncomplete => grace_incomplete(habit, today),
        }
    }
}

/// Free-function form of [`HabitLifecycleMachine::transition`].
pub fn transition(habit: &Habit, event: LifecycleEvent, today: Date) -> Result<HabitUpdate> {
    HabitLifecycleMachine::transition(habit, event, today)
}

fn rejected(habit: &Habit, event: LifecycleEvent, reason: &'static str) -> EngineError {
    EngineError::InvalidTransition {
        event,
        state: habit.habit_state,
        reason,
    }
}

/// Streak after one more completion. A junked habit starts over at 1.
fn next_streak(habit: &Habit) -> i32 {
    match habit.habit_state {
        HabitState::Junked => 1,
        _ => habit.streak.max(0) + 1,
    }
}

fn user_complete(habit: &Habit, today: Date) -> Result<HabitUpdate> {
    if habit.habit_state == HabitState::Today {
        return Err(rejected(
            habit,
            LifecycleEvent::UserComplete,
            "already completed today",
        ));
    }

    let streak = next_streak(habit);
    Ok(HabitUpdate {
        streak: Some(streak),
        longest_streak: Some(habit.longest_streak.max(streak)),
        habit_state: Some(HabitState::Today),
        junked_date: Some(None),
        completed_date: Some(Some(today)),
        undo: Some(habit.snapshot()),
        ..HabitUpdate::default()
    })
}

fn user_undo(habit: &Habit) -> Result<HabitUpdate> {
    if habit.habit_state != HabitState::Today {
        return Err(rejected(
            habit,
            LifecycleEvent::UserUndo,
            "only a completion made today can be undone",
        ));
    }
    let snap = habit.undo.ok_or_else(|| {
        rejected(habit, LifecycleEvent::UserUndo, "no undo snapshot recorded")
    })?;
    Ok(HabitUpdate::restoring(&snap))
}

fn grace_complete(habit: &Habit, today: Date) -> Result<HabitUpdate> {
    let yesterday = add_days(today, -1)?;
    let streak = next_streak(habit);
    let after = LifecycleSnapshot {
        streak,
        longest_streak: habit.longest_streak.max(streak),
        habit_state: HabitState::Yesterday,
        junked_date: None,
        completed_date: Some(yesterday),
    };
    // Live and undo fields agree, so a later undo lands back on this grace result.
    Ok(HabitUpdate {
        undo: Some(after),
        ..HabitUpdate::restoring(&after)
    })
}

fn grace_incomplete(habit: &Habit, today: Date) -> Result<HabitUpdate> {
    let mut update = HabitUpdate {
        undo: Some(habit.snapshot()),
        ..HabitUpdate::default()
    };
    match habit.habit_state {
        HabitState::Today => update.habit_state = Some(HabitState::Yesterday),
        HabitState::Yesterday => update.habit_state = Some(HabitState::Lively),
        HabitState::Lively => {
            update.habit_state = Some(HabitState::Junked);
            update.streak = Some(BROKEN_STREAK);
            update.junked_date = Some(Some(add_days(today, -1)?));
        }
        HabitState::Junked => {
            // Counts consecutive misses downward; never climbs back above the sentinel.
            let streak = habit.streak.min(BROKEN_STREAK);
            update.streak = Some(streak.saturating_sub(1));
        }
    }
    Ok(update)
}
