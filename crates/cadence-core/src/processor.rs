//! Multi-day catch-up for all of a user's habits.
//!
//! Each run brings every habit not yet processed today up to date:
//!
//! 1. Days the user never saw are resolved silently as misses, one
//!    `GRACE_INCOMPLETE` per elapsed day, until only yesterday is left.
//! 2. A habit still marked TODAY (done on its last processed day) rolls to
//!    YESTERDAY without asking.
//! 3. Anything else needs an explicit answer about yesterday and is returned
//!    in `grace_habits`.
//!
//! One run after a week away ends in the same state as seven daily runs in
//! which every prompt was answered "missed", minus the intermediate prompts.

use jiff::civil::Date;
use serde::Serialize;

use crate::date::{add_days, diff_in_days};
use crate::error::{EngineError, Result};
use crate::habit::{Habit, HabitState, HabitUpdate, LifecycleEvent};
use crate::machine::transition;
use crate::store::LifecycleStore;

/// Pure outcome of catching one habit up to `today`.
#[derive(Clone, Debug, PartialEq)]
pub struct CatchUp {
    /// Everything to persist, including `processed_date = today`.
    pub update: HabitUpdate,
    /// The user must decide yesterday's outcome.
    pub needs_grace: bool,
    /// Misses resolved without asking.
    pub auto_resolved: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct HabitFailure {
    /// Raw id as stored; an unreadable row may not hold a valid UUID.
    pub habit_id: String,
    pub name: String,
    pub error: EngineError,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ProcessReport {
    /// Habits awaiting a grace decision, in their post-catch-up state.
    pub grace_habits: Vec<Habit>,
    pub processed_count: usize,
    pub failures: Vec<HabitFailure>,
}

pub fn catch_up(habit: &Habit, today: Date) -> Result<CatchUp> {
    let stamp = HabitUpdate {
        processed_date: Some(today),
        ..HabitUpdate::default()
    };

    let gap = diff_in_days(habit.processed_date, today)?;
    if gap < 1 {
        // Same day or clock skew: only re-stamp.
        return Ok(CatchUp {
            update: stamp,
            needs_grace: false,
            auto_resolved: 0,
        });
    }

    let mut current = habit.clone();
    let mut update = HabitUpdate::default();
    let mut day = habit.processed_date;
    let mut auto_resolved = 0;

    for _ in 1..gap {
        day = add_days(day, 1)?;
        let step = transition(&current, LifecycleEvent::GraceIncomplete, day)?;
        current.apply(&step);
        update = update.merge(step);
        auto_resolved += 1;
    }

    let needs_grace = if current.habit_state == HabitState::Today {
        let step = transition(&current, LifecycleEvent::GraceIncomplete, today)?;
        update = update.merge(step);
        false
    } else {
        true
    };

    Ok(CatchUp {
        update: update.merge(stamp),
        needs_grace,
        auto_resolved,
    })
}

/// Whether `habit` still owes an answer about yesterday, for rebuilding the
/// grace prompt later on the day it was processed.
pub fn needs_grace_review(habit: &Habit, today: Date) -> Result<bool> {
    if habit.processed_date != today
        || habit.habit_state == HabitState::Today
        || habit.last_resolved_date == Some(today)
    {
        return Ok(false);
    }
    let yesterday = add_days(today, -1)?;
    Ok(habit.completed_date != Some(yesterday))
}

pub struct LifecycleProcessor;

impl LifecycleProcessor {
    /// Catch up every unprocessed habit of `user_id`.
    ///
    /// A failure on one habit, including a row that cannot be decoded, is
    /// recorded in the report and the rest still run; only a failed initial
    /// fetch aborts.
    pub fn run<S: LifecycleStore>(store: &S, user_id: &str, today: Date) -> Result<ProcessReport> {
        let records = store
            .fetch_unprocessed_habits(user_id, today)
            .map_err(Into::into)?;

        let mut report = ProcessReport::default();
        for record in records {
            let habit = match record {
                Ok(habit) => habit,
                Err(unreadable) => {
                    tracing::warn!(
                        habit = %unreadable.habit_id,
                        "unreadable habit skipped: {}",
                        unreadable.error
                    );
                    report.failures.push(HabitFailure {
                        habit_id: unreadable.habit_id,
                        name: unreadable.name,
                        error: unreadable.error,
                    });
                    continue;
                }
            };
            match Self::process_one(store, &habit, today) {
                Ok(outcome) => {
                    report.processed_count += 1;
                    if outcome.needs_grace {
                        report.grace_habits.push(habit.with(&outcome.update));
                    }
                }
                Err(error) => {
                    tracing::warn!(habit = %habit.id, "catch-up failed: {error}");
                    report.failures.push(HabitFailure {
                        habit_id: habit.id.to_string(),
                        name: habit.name.clone(),
                        error,
                    });
                }
            }
        }

        tracing::debug!(
            user_id,
            %today,
            processed = report.processed_count,
            grace = report.grace_habits.len(),
            failed = report.failures.len(),
            "lifecycle pass complete"
        );
        Ok(report)
    }

    fn process_one<S: LifecycleStore>(store: &S, habit: &Habit, today: Date) -> Result<CatchUp> {
        let outcome = catch_up(habit, today)?;
        store
            .update_habit(habit.id, &outcome.update)
            .map_err(Into::into)?;
        tracing::debug!(
            habit = %habit.id,
            auto_resolved = outcome.auto_resolved,
            needs_grace = outcome.needs_grace,
            "habit caught up"
        );
        Ok(outcome)
    }

    /// Apply a user-driven event and persist it. Returns the updated habit.
    pub fn apply<S: LifecycleStore>(
        store: &S,
        habit: &Habit,
        event: LifecycleEvent,
        today: Date,
    ) -> Result<Habit> {
        let update = transition(habit, event, today)?;
        store.update_habit(habit.id, &update).map_err(Into::into)?;
        tracing::debug!(habit = %habit.id, %event, "transition applied");
        Ok(habit.with(&update))
    }

    /// The user says yesterday was missed.
    pub fn resolve_habit_incomplete<S: LifecycleStore>(
        store: &S,
        habit: &Habit,
        today: Date,
    ) -> Result<Habit> {
        Self::resolve(store, habit, LifecycleEvent::GraceIncomplete, today)
    }

    /// The user says yesterday was done after all.
    pub fn resolve_habit_complete<S: LifecycleStore>(
        store: &S,
        habit: &Habit,
        today: Date,
    ) -> Result<Habit> {
        Self::resolve(store, habit, LifecycleEvent::GraceComplete, today)
    }

    fn resolve<S: LifecycleStore>(
        store: &S,
        habit: &Habit,
        event: LifecycleEvent,
        today: Date,
    ) -> Result<Habit> {
        let update = transition(habit, event, today)?.merge(HabitUpdate {
            last_resolved_date: Some(Some(today)),
            ..HabitUpdate::default()
        });
        store.update_habit(habit.id, &update).map_err(Into::into)?;
        tracing::debug!(habit = %habit.id, %event, "grace resolved");
        Ok(habit.with(&update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::habit::BROKEN_STREAK;
    use crate::memory::MemoryStore;
    use crate::store::UnreadableHabit;
    use jiff::civil::date;

    const P: Date = date(2024, 6, 10);

    fn habit(state: HabitState, streak: i32) -> Habit {
        let mut h = Habit::new("u", "meditate", P);
        h.habit_state = state;
        h.streak = streak;
        h.longest_streak = streak.max(0);
        if state == HabitState::Today {
            h.completed_date = Some(P);
        }
        h
    }

    fn day(n: i64) -> Date {
        add_days(P, n).unwrap()
    }

    #[test]
    fn test_same_day_only_stamps() {
        let h = habit(HabitState::Lively, 3);
        let out = catch_up(&h, P).unwrap();
        assert_eq!(
            out.update,
            HabitUpdate {
                processed_date: Some(P),
                ..HabitUpdate::default()
            }
        );
        assert!(!out.needs_grace);
    }

    #[test]
    fn test_clock_skew_restamps_backwards() {
        let h = habit(HabitState::Yesterday, 3);
        let out = catch_up(&h, day(-2)).unwrap();
        assert_eq!(out.update.processed_date, Some(day(-2)));
        assert_eq!(out.update.habit_state, None);
    }

    #[test]
    fn test_one_day_today_rolls_silently() {
        let h = habit(HabitState::Today, 4);
        let out = catch_up(&h, day(1)).unwrap();
        let after = h.with(&out.update);
        assert!(!out.needs_grace);
        assert_eq!(after.habit_state, HabitState::Yesterday);
        assert_eq!(after.streak, 4);
        assert_eq!(after.processed_date, day(1));
    }

    #[test]
    fn test_one_day_lively_surfaces_untouched() {
        let h = habit(HabitState::Lively, 4);
        let out = catch_up(&h, day(1)).unwrap();
        assert!(out.needs_grace);
        assert_eq!(out.auto_resolved, 0);
        assert_eq!(h.with(&out.update).snapshot(), h.snapshot());
    }

    #[test]
    fn test_week_away_from_today() {
        let h = habit(HabitState::Today, 9);
        let out = catch_up(&h, day(7)).unwrap();
        let after = h.with(&out.update);
        // TODAY -> YESTERDAY -> LIVELY -> JUNKED(-1) -> -2 -> -3 -> -4
        assert_eq!(out.auto_resolved, 6);
        assert!(out.needs_grace);
        assert_eq!(after.habit_state, HabitState::Junked);
        assert_eq!(after.streak, -4);
        assert_eq!(after.longest_streak, 9);
        assert_eq!(after.junked_date, Some(day(2)));
    }

    #[test]
    fn test_two_day_gap_from_lively_junks_first_missed_day() {
        let h = habit(HabitState::Lively, 5);
        let after = h.with(&catch_up(&h, day(2)).unwrap().update);
        assert_eq!(after.habit_state, HabitState::Junked);
        assert_eq!(after.streak, BROKEN_STREAK);
        assert_eq!(after.junked_date, Some(P));
    }

    /// Simulate opening the app every day and answering each prompt "missed",
    /// except on the last day.
    fn daily(mut h: Habit, days: i64) -> (Habit, bool) {
        let mut surfaced = false;
        for n in 1..=days {
            let today = day(n);
            let out = catch_up(&h, today).unwrap();
            h = h.with(&out.update);
            surfaced = out.needs_grace;
            if surfaced && n < days {
                h = h.with(&transition(&h, LifecycleEvent::GraceIncomplete, today).unwrap());
            }
        }
        (h, surfaced)
    }

    #[test]
    fn test_catch_up_matches_daily_runs() {
        for state in [
            HabitState::Today,
            HabitState::Yesterday,
            HabitState::Lively,
            HabitState::Junked,
        ] {
            let start = if state == HabitState::Junked {
                habit(state, -2)
            } else {
                habit(state, 6)
            };
            for gap in 1..=9 {
                let once = start.with(&catch_up(&start, day(gap)).unwrap().update);
                let (stepped, surfaced) = daily(start.clone(), gap);
                assert_eq!(
                    (once.habit_state, once.streak, once.junked_date),
                    (stepped.habit_state, stepped.streak, stepped.junked_date),
                    "state {state} gap {gap}"
                );
                assert_eq!(
                    catch_up(&start, day(gap)).unwrap().needs_grace,
                    surfaced,
                    "state {state} gap {gap}"
                );
            }
        }
    }

    #[test]
    fn test_run_reports_unreadable_rows_and_continues() {
        let store = MemoryStore::new();
        let fine = habit(HabitState::Lively, 1);
        let fine_id = fine.id;
        store.insert_habit(fine);
        store.insert_unreadable(
            "u",
            UnreadableHabit {
                habit_id: "not-a-uuid".into(),
                name: "garbled".into(),
                error: EngineError::Corrupt("bad processed_date".into()),
            },
        );

        let report = LifecycleProcessor::run(&store, "u", day(1)).unwrap();

        assert_eq!(report.processed_count, 1);
        assert_eq!(report.grace_habits.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].habit_id, "not-a-uuid");
        assert_eq!(report.failures[0].name, "garbled");
        assert!(report.failures[0].error.is_data_integrity());
        assert_eq!(store.habit(fine_id).unwrap().processed_date, day(1));
    }

    #[test]
    fn test_run_is_idempotent_within_a_day() {
        let store = MemoryStore::new();
        let h = habit(HabitState::Lively, 2);
        let id = h.id;
        store.insert_habit(h);

        let first = LifecycleProcessor::run(&store, "u", day(3)).unwrap();
        assert_eq!(first.processed_count, 1);
        assert_eq!(first.grace_habits.len(), 1);
        let after_first = store.habit(id).unwrap();

        let second = LifecycleProcessor::run(&store, "u", day(3)).unwrap();
        assert_eq!(second.processed_count, 0);
        assert!(second.grace_habits.is_empty());
        assert_eq!(store.habit(id).unwrap(), after_first);
    }

    #[test]
    fn test_run_only_touches_requested_user() {
        let store = MemoryStore::new();
        let mut other = habit(HabitState::Lively, 2);
        other.user_id = "someone-else".into();
        let other_id = other.id;
        store.insert_habit(other);

        let report = LifecycleProcessor::run(&store, "u", day(1)).unwrap();
        assert_eq!(report.processed_count, 0);
        assert_eq!(store.habit(other_id).unwrap().processed_date, P);
    }

    #[test]
    fn test_run_collects_store_failures_and_continues() {
        let store = MemoryStore::new();
        let mut broken = habit(HabitState::Lively, 1);
        broken.name = "a-broken".into();
        let mut fine = habit(HabitState::Today, 3);
        fine.name = "b-fine".into();
        let (broken_id, fine_id) = (broken.id, fine.id);
        store.insert_habit(broken);
        store.insert_habit(fine);
        store.fail_updates_for(broken_id);

        let report = LifecycleProcessor::run(&store, "u", day(1)).unwrap();

        assert_eq!(report.processed_count, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].habit_id, broken_id.to_string());
        assert!(matches!(report.failures[0].error, EngineError::Store(_)));
        assert!(report.grace_habits.is_empty());
        assert_eq!(
            store.habit(fine_id).unwrap().habit_state,
            HabitState::Yesterday
        );
    }

    #[test]
    fn test_resolve_incomplete_marks_resolved() {
        let store = MemoryStore::new();
        let h = habit(HabitState::Yesterday, 5);
        store.insert_habit(h.clone());

        let report = LifecycleProcessor::run(&store, "u", day(1)).unwrap();
        let pending = &report.grace_habits[0];
        assert!(needs_grace_review(pending, day(1)).unwrap());

        let resolved = LifecycleProcessor::resolve_habit_incomplete(&store, pending, day(1)).unwrap();
        assert_eq!(resolved.habit_state, HabitState::Lively);
        assert_eq!(resolved.last_resolved_date, Some(day(1)));
        assert_eq!(store.habit(h.id).unwrap(), resolved);
        assert!(!needs_grace_review(&resolved, day(1)).unwrap());
    }

    #[test]
    fn test_resolve_complete_then_undo_keeps_grace_result() {
        let store = MemoryStore::new();
        let h = habit(HabitState::Lively, 5);
        store.insert_habit(h.clone());

        let graced = LifecycleProcessor::resolve_habit_complete(&store, &h, day(1)).unwrap();
        assert_eq!(graced.habit_state, HabitState::Yesterday);
        assert_eq!(graced.streak, 6);
        assert_eq!(graced.completed_date, Some(P));

        let done = LifecycleProcessor::apply(&store, &graced, LifecycleEvent::UserComplete, day(1)).unwrap();
        assert_eq!(done.streak, 7);
        let undone = LifecycleProcessor::apply(&store, &done, LifecycleEvent::UserUndo, day(1)).unwrap();
        assert_eq!(undone.snapshot(), graced.snapshot());
        assert_eq!(store.habit(h.id).unwrap().streak, 6);
    }

    #[test]
    fn test_apply_propagates_invalid_transition() {
        let store = MemoryStore::new();
        let h = habit(HabitState::Today, 1);
        store.insert_habit(h.clone());
        let err = LifecycleProcessor::apply(&store, &h, LifecycleEvent::UserComplete, P).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(store.habit(h.id).unwrap(), h);
    }

    #[test]
    fn test_rolled_habit_needs_no_review() {
        let h = habit(HabitState::Today, 2);
        let rolled = h.with(&catch_up(&h, day(1)).unwrap().update);
        assert!(!needs_grace_review(&rolled, day(1)).unwrap());
        assert!(!needs_grace_review(&rolled, day(2)).unwrap(), "not processed on day 2 yet");
    }

    #[test]
    fn test_new_habit_has_nothing_to_review_on_day_one() {
        let fresh = Habit::new("u", "floss", P);
        assert!(!needs_grace_review(&fresh, P).unwrap());

        let next = fresh.with(&catch_up(&fresh, day(1)).unwrap().update);
        assert!(needs_grace_review(&next, day(1)).unwrap());
    }
}
