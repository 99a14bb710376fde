//! In-memory [`LifecycleStore`], for embedding the engine without a database
//! and for exercising the processor and migrator in tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use jiff::civil::Date;
use uuid::Uuid;

use crate::error::EngineError;
use crate::habit::{Habit, HabitUpdate};
use crate::store::{BucketKey, HabitRecord, LifecycleStore, UnreadableHabit};
use crate::tree::{ActionNode, Forest};

#[derive(Default)]
pub struct MemoryStore {
    habits: Mutex<HashMap<Uuid, Habit>>,
    buckets: Mutex<HashMap<(String, BucketKey), Forest>>,
    bucket_writes: Mutex<Vec<(String, BucketKey)>>,
    failing: Mutex<HashSet<Uuid>>,
    unreadable: Mutex<Vec<(String, UnreadableHabit)>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_habit(&self, habit: Habit) {
        lock(&self.habits).insert(habit.id, habit);
    }

    pub fn habit(&self, id: Uuid) -> Option<Habit> {
        lock(&self.habits).get(&id).cloned()
    }

    pub fn set_bucket(&self, user_id: &str, key: BucketKey, forest: Forest) {
        lock(&self.buckets).insert((user_id.to_string(), key), forest);
    }

    pub fn bucket(&self, user_id: &str, key: BucketKey) -> Forest {
        lock(&self.buckets)
            .get(&(user_id.to_string(), key))
            .cloned()
            .unwrap_or_default()
    }

    /// Every `update_bucket` call so far, in order.
    pub fn bucket_writes(&self) -> Vec<(String, BucketKey)> {
        lock(&self.bucket_writes).clone()
    }

    /// Stand in for a stored row of `user_id` that no longer decodes. It is
    /// returned by every unprocessed fetch for that user.
    pub fn insert_unreadable(&self, user_id: &str, row: UnreadableHabit) {
        lock(&self.unreadable).push((user_id.to_string(), row));
    }

    /// Make `update_habit` fail for this habit.
    pub fn fail_updates_for(&self, id: Uuid) {
        lock(&self.failing).insert(id);
    }
}

impl LifecycleStore for MemoryStore {
    type Error = EngineError;

    fn fetch_unprocessed_habits(
        &self,
        user_id: &str,
        today: Date,
    ) -> Result<Vec<HabitRecord>, EngineError> {
        let mut habits: Vec<Habit> = lock(&self.habits)
            .values()
            .filter(|h| h.user_id == user_id && h.processed_date != today)
            .cloned()
            .collect();
        habits.sort_by(|a, b| a.name.cmp(&b.name));

        let mut records: Vec<HabitRecord> = habits.into_iter().map(Ok).collect();
        records.extend(
            lock(&self.unreadable)
                .iter()
                .filter(|(owner, _)| owner == user_id)
                .map(|(_, row)| Err(row.clone())),
        );
        Ok(records)
    }

    fn update_habit(&self, id: Uuid, update: &HabitUpdate) -> Result<(), EngineError> {
        if lock(&self.failing).contains(&id) {
            return Err(EngineError::Store(format!("write rejected for habit {id}")));
        }
        let mut habits = lock(&self.habits);
        let habit = habits
            .get_mut(&id)
            .ok_or_else(|| EngineError::Store(format!("habit not found: {id}")))?;
        habit.apply(update);
        Ok(())
    }

    fn fetch_bucket(&self, user_id: &str, key: BucketKey) -> Result<Forest, EngineError> {
        Ok(self.bucket(user_id, key))
    }

    fn update_bucket(&self, user_id: &str, key: BucketKey, forest: &[ActionNode]) -> Result<(), EngineError> {
        lock(&self.bucket_writes).push((user_id.to_string(), key));
        self.set_bucket(user_id, key, forest.to_vec());
        Ok(())
    }
}
