use std::fs;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use cadence_core::{
    ActionNode, BucketKey, Date, DateResolver, Forest, Habit, HabitRecord, HabitState,
    HabitUpdate, LifecycleSnapshot, LifecycleStore, Timestamp, UnreadableHabit, parse_date,
    time_zone,
};

use crate::config::{CadenceConfig, DATABASE_FILE};
use crate::error::{Result, StoreError};
use crate::schema;

const HABIT_COLUMNS: &str = "id, user_id, name, habit_state, streak, longest_streak, \
     junked_date, completed_date, processed_date, last_resolved_date, \
     undo_streak, undo_longest_streak, undo_habit_state, undo_junked_date, undo_completed_date, \
     is_public, goal_value, goal_unit";

/// Per-user overrides kept alongside the data.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserSettings {
    pub timezone: Option<String>,
    /// Frozen "now" for time travel. `None` means the real clock.
    pub simulated_now: Option<Timestamp>,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Open `cadence.db` under `base`, creating the directory if needed.
    pub fn open_in_dir(base: &Path) -> Result<Self> {
        fs::create_dir_all(base).map_err(|e| {
            StoreError::Config(format!("failed to create {}: {e}", base.display()))
        })?;
        Self::open(&base.join(DATABASE_FILE))
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // --- Metadata ---

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // --- Habits ---

    pub fn create_habit(&self, habit: &Habit) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO habits ({HABIT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
            ),
            params![
                habit.id.to_string(),
                habit.user_id,
                habit.name,
                habit.habit_state.as_str(),
                habit.streak,
                habit.longest_streak,
                habit.junked_date.map(|d| d.to_string()),
                habit.completed_date.map(|d| d.to_string()),
                habit.processed_date.to_string(),
                habit.last_resolved_date.map(|d| d.to_string()),
                habit.undo.map(|u| u.streak),
                habit.undo.map(|u| u.longest_streak),
                habit.undo.map(|u| u.habit_state.as_str()),
                habit.undo.and_then(|u| u.junked_date).map(|d| d.to_string()),
                habit.undo.and_then(|u| u.completed_date).map(|d| d.to_string()),
                habit.is_public as i32,
                habit.goal_value,
                habit.goal_unit,
            ],
        )?;
        tracing::debug!(habit = %habit.id, name = %habit.name, "habit created");
        Ok(())
    }

    pub fn get_habit(&self, id: Uuid) -> Result<Habit> {
        load_habit(&self.conn, id)
    }

    /// Every habit of `user_id`. Rows that fail to decode come back as
    /// their own `Err` records instead of failing the listing.
    pub fn list_habits(&self, user_id: &str) -> Result<Vec<HabitRecord>> {
        self.query_records(
            &format!("SELECT {HABIT_COLUMNS} FROM habits WHERE user_id = ?1 ORDER BY name, id"),
            params![user_id],
        )
    }

    /// Look a habit up by full id, exact name, or unique id prefix.
    pub fn find_habit(&self, user_id: &str, needle: &str) -> Result<Habit> {
        if let Ok(id) = Uuid::parse_str(needle) {
            let habit = self.get_habit(id)?;
            if habit.user_id == user_id {
                return Ok(habit);
            }
            return Err(StoreError::NotFound(format!("habit {needle}")));
        }

        let records = self.list_habits(user_id)?;
        let by_name: Vec<&HabitRecord> = records
            .iter()
            .filter(|r| record_name(r).eq_ignore_ascii_case(needle))
            .collect();
        let by_prefix: Vec<&HabitRecord> = records
            .iter()
            .filter(|r| record_id(r).starts_with(needle))
            .collect();

        match (by_name.as_slice(), by_prefix.as_slice()) {
            ([one], _) | ([], [one]) => match one {
                Ok(habit) => Ok(habit.clone()),
                Err(bad) => Err(StoreError::InvalidData(format!(
                    "habit '{}' ({}): {}",
                    bad.name, bad.habit_id, bad.error
                ))),
            },
            ([], []) => Err(StoreError::NotFound(format!("habit '{needle}'"))),
            _ => Err(StoreError::NotFound(format!(
                "habit '{needle}' is ambiguous, use the full id"
            ))),
        }
    }

    /// Apply `update` to the stored row in one transaction and return the
    /// result.
    pub fn update_habit(&self, id: Uuid, update: &HabitUpdate) -> Result<Habit> {
        let tx = self.conn.unchecked_transaction()?;
        let habit = load_habit(&tx, id)?.with(update);
        write_habit(&tx, &habit)?;
        tx.commit()?;
        Ok(habit)
    }

    pub fn fetch_unprocessed_habits(&self, user_id: &str, today: Date) -> Result<Vec<HabitRecord>> {
        self.query_records(
            &format!(
                "SELECT {HABIT_COLUMNS} FROM habits
                 WHERE user_id = ?1 AND processed_date <> ?2 ORDER BY name, id"
            ),
            params![user_id, today.to_string()],
        )
    }

    /// Rows are read first and decoded one by one, so a single bad value
    /// only spoils its own record.
    fn query_records(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<HabitRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows: Vec<HabitRow> = stmt
            .query_map(args, HabitRow::from_row)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows.into_iter().map(HabitRow::into_record).collect())
    }

    // --- Target buckets ---

    /// A bucket that was never written reads as an empty forest.
    pub fn fetch_bucket(&self, user_id: &str, key: BucketKey) -> Result<Forest> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT forest FROM target_buckets WHERE user_id = ?1 AND month_key = ?2",
                params![user_id, key.to_storage()],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => decode_forest(&json, &format!("bucket {key}")),
            None => Ok(Vec::new()),
        }
    }

    pub fn update_bucket(&self, user_id: &str, key: BucketKey, forest: &[ActionNode]) -> Result<()> {
        self.conn.execute(
            "INSERT INTO target_buckets (user_id, month_key, forest, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(user_id, month_key)
             DO UPDATE SET forest = excluded.forest, updated_at = excluded.updated_at",
            params![user_id, key.to_storage(), encode_forest(forest)?],
        )?;
        Ok(())
    }

    /// Every stored bucket for `user_id`, months in order, future last.
    pub fn list_buckets(&self, user_id: &str) -> Result<Vec<(BucketKey, Forest)>> {
        let mut stmt = self.conn.prepare(
            "SELECT month_key, forest FROM target_buckets
             WHERE user_id = ?1 ORDER BY month_key = '', month_key",
        )?;
        let rows: Vec<(String, String)> = stmt
            .query_map([user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;

        rows.into_iter()
            .map(|(raw_key, json)| -> Result<(BucketKey, Forest)> {
                let key = BucketKey::from_storage(&raw_key)?;
                let forest = decode_forest(&json, &format!("bucket {key}"))?;
                Ok((key, forest))
            })
            .collect()
    }

    // --- Daily action tree ---

    pub fn fetch_action_tree(&self, user_id: &str) -> Result<Forest> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT forest FROM action_trees WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => decode_forest(&json, "action tree"),
            None => Ok(Vec::new()),
        }
    }

    pub fn save_action_tree(&self, user_id: &str, forest: &[ActionNode]) -> Result<()> {
        self.conn.execute(
            "INSERT INTO action_trees (user_id, forest, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(user_id)
             DO UPDATE SET forest = excluded.forest, updated_at = excluded.updated_at",
            params![user_id, encode_forest(forest)?],
        )?;
        Ok(())
    }

    // --- User settings ---

    pub fn get_settings(&self, user_id: &str) -> Result<UserSettings> {
        let row: Option<(Option<String>, Option<String>)> = self
            .conn
            .query_row(
                "SELECT timezone, simulated_now FROM user_settings WHERE user_id = ?1",
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((timezone, simulated)) = row else {
            return Ok(UserSettings::default());
        };

        let simulated_now = simulated
            .map(|s| {
                s.parse::<Timestamp>().map_err(|e| {
                    StoreError::InvalidData(format!("simulated_now '{s}' for {user_id}: {e}"))
                })
            })
            .transpose()?;
        Ok(UserSettings {
            timezone,
            simulated_now,
        })
    }

    /// Store `tz` as the user's zone. Unknown zone names are rejected.
    pub fn set_timezone(&self, user_id: &str, tz: &str) -> Result<()> {
        time_zone(tz).map_err(|e| StoreError::Config(e.to_string()))?;
        self.conn.execute(
            "INSERT INTO user_settings (user_id, timezone) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET timezone = excluded.timezone",
            params![user_id, tz],
        )?;
        Ok(())
    }

    pub fn set_simulated_now(&self, user_id: &str, at: Option<Timestamp>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO user_settings (user_id, simulated_now) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET simulated_now = excluded.simulated_now",
            params![user_id, at.map(|t| t.to_string())],
        )?;
        match at {
            Some(at) => tracing::info!(user_id, %at, "time travel enabled"),
            None => tracing::info!(user_id, "time travel cleared"),
        }
        Ok(())
    }

    /// Build the date resolver for `user_id`. Zone precedence: explicit
    /// override, stored user setting, config default.
    pub fn resolver(
        &self,
        user_id: &str,
        config: &CadenceConfig,
        tz_override: Option<&str>,
    ) -> cadence_core::Result<DateResolver> {
        let settings = self.get_settings(user_id)?;
        let tz = tz_override
            .map(str::to_string)
            .or(settings.timezone)
            .unwrap_or_else(|| config.timezone.clone());
        DateResolver::new(&tz, settings.simulated_now)
    }
}

impl LifecycleStore for Store {
    type Error = StoreError;

    fn fetch_unprocessed_habits(&self, user_id: &str, today: Date) -> Result<Vec<HabitRecord>> {
        Store::fetch_unprocessed_habits(self, user_id, today)
    }

    fn update_habit(&self, id: Uuid, update: &HabitUpdate) -> Result<()> {
        Store::update_habit(self, id, update).map(|_| ())
    }

    fn fetch_bucket(&self, user_id: &str, key: BucketKey) -> Result<Forest> {
        Store::fetch_bucket(self, user_id, key)
    }

    fn update_bucket(&self, user_id: &str, key: BucketKey, forest: &[ActionNode]) -> Result<()> {
        Store::update_bucket(self, user_id, key, forest)
    }
}

fn load_habit(conn: &Connection, id: Uuid) -> Result<Habit> {
    let row = conn
        .query_row(
            &format!("SELECT {HABIT_COLUMNS} FROM habits WHERE id = ?1"),
            [id.to_string()],
            HabitRow::from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("habit {id}")))?;
    row.into_habit()
}

fn write_habit(conn: &Connection, habit: &Habit) -> Result<()> {
    let undo = habit.undo;
    conn.execute(
        "UPDATE habits SET
            habit_state = ?2, streak = ?3, longest_streak = ?4,
            junked_date = ?5, completed_date = ?6, processed_date = ?7, last_resolved_date = ?8,
            undo_streak = ?9, undo_longest_streak = ?10, undo_habit_state = ?11,
            undo_junked_date = ?12, undo_completed_date = ?13
         WHERE id = ?1",
        params![
            habit.id.to_string(),
            habit.habit_state.as_str(),
            habit.streak,
            habit.longest_streak,
            habit.junked_date.map(|d| d.to_string()),
            habit.completed_date.map(|d| d.to_string()),
            habit.processed_date.to_string(),
            habit.last_resolved_date.map(|d| d.to_string()),
            undo.map(|u| u.streak),
            undo.map(|u| u.longest_streak),
            undo.map(|u| u.habit_state.as_str()),
            undo.and_then(|u| u.junked_date).map(|d| d.to_string()),
            undo.and_then(|u| u.completed_date).map(|d| d.to_string()),
        ],
    )?;
    Ok(())
}

/// Raw column values. Decoding happens outside the rusqlite closure so that
/// bad data surfaces as `InvalidData` rather than a SQLite error.
struct HabitRow {
    id: String,
    user_id: String,
    name: String,
    habit_state: String,
    streak: i32,
    longest_streak: i32,
    junked_date: Option<String>,
    completed_date: Option<String>,
    processed_date: String,
    last_resolved_date: Option<String>,
    undo_streak: Option<i32>,
    undo_longest_streak: Option<i32>,
    undo_habit_state: Option<String>,
    undo_junked_date: Option<String>,
    undo_completed_date: Option<String>,
    is_public: bool,
    goal_value: Option<f64>,
    goal_unit: Option<String>,
}

impl HabitRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            habit_state: row.get(3)?,
            streak: row.get(4)?,
            longest_streak: row.get(5)?,
            junked_date: row.get(6)?,
            completed_date: row.get(7)?,
            processed_date: row.get(8)?,
            last_resolved_date: row.get(9)?,
            undo_streak: row.get(10)?,
            undo_longest_streak: row.get(11)?,
            undo_habit_state: row.get(12)?,
            undo_junked_date: row.get(13)?,
            undo_completed_date: row.get(14)?,
            is_public: row.get::<_, i32>(15)? != 0,
            goal_value: row.get(16)?,
            goal_unit: row.get(17)?,
        })
    }

    fn into_record(self) -> HabitRecord {
        let (habit_id, name) = (self.id.clone(), self.name.clone());
        self.into_habit().map_err(|e| {
            tracing::warn!(habit = %habit_id, "undecodable habit row: {e}");
            UnreadableHabit {
                habit_id,
                name,
                error: e.into(),
            }
        })
    }

    fn into_habit(self) -> Result<Habit> {
        let id = parse_uuid(&self.id)?;
        let undo = match self.undo_habit_state {
            None => None,
            Some(state) => Some(LifecycleSnapshot {
                streak: self.undo_streak.ok_or_else(|| missing_undo(id, "streak"))?,
                longest_streak: self
                    .undo_longest_streak
                    .ok_or_else(|| missing_undo(id, "longest_streak"))?,
                habit_state: parse_state(&state)?,
                junked_date: parse_opt_date(self.undo_junked_date.as_deref())?,
                completed_date: parse_opt_date(self.undo_completed_date.as_deref())?,
            }),
        };

        Ok(Habit {
            id,
            user_id: self.user_id,
            name: self.name,
            habit_state: parse_state(&self.habit_state)?,
            streak: self.streak,
            longest_streak: self.longest_streak,
            junked_date: parse_opt_date(self.junked_date.as_deref())?,
            completed_date: parse_opt_date(self.completed_date.as_deref())?,
            processed_date: parse_date(&self.processed_date)?,
            last_resolved_date: parse_opt_date(self.last_resolved_date.as_deref())?,
            undo,
            is_public: self.is_public,
            goal_value: self.goal_value,
            goal_unit: self.goal_unit,
        })
    }
}

fn record_name(record: &HabitRecord) -> &str {
    match record {
        Ok(habit) => &habit.name,
        Err(bad) => &bad.name,
    }
}

fn record_id(record: &HabitRecord) -> String {
    match record {
        Ok(habit) => habit.id.to_string(),
        Err(bad) => bad.habit_id.clone(),
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::InvalidData(format!("invalid UUID '{s}': {e}")))
}

fn parse_state(s: &str) -> Result<HabitState> {
    s.parse().map_err(StoreError::InvalidData)
}

fn parse_opt_date(s: Option<&str>) -> Result<Option<Date>> {
    Ok(s.map(parse_date).transpose()?)
}

fn missing_undo(id: Uuid, column: &str) -> StoreError {
    StoreError::InvalidData(format!("habit {id} has an undo state but no undo_{column}"))
}

fn encode_forest(forest: &[ActionNode]) -> Result<String> {
    serde_json::to_string(forest)
        .map_err(|e| StoreError::InvalidData(format!("failed to encode forest: {e}")))
}

fn decode_forest(json: &str, what: &str) -> Result<Forest> {
    serde_json::from_str(json).map_err(|e| StoreError::InvalidData(format!("{what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{
        EngineError, LifecycleEvent, LifecycleProcessor, TargetLifecycleMigrator, collect_ids,
    };
    use jiff::civil::date;

    const USER: &str = "ada";

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    fn seeded(store: &Store, name: &str, processed: Date) -> Habit {
        let habit = Habit::new(USER, name, processed);
        store.create_habit(&habit).unwrap();
        habit
    }

    #[test]
    fn test_create_and_get_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let mut habit = Habit::new(USER, "stretch", date(2024, 6, 1));
        habit.is_public = true;
        habit.goal_value = Some(15.0);
        habit.goal_unit = Some("minutes".to_string());
        store.create_habit(&habit).unwrap();

        assert_eq!(store.get_habit(habit.id).unwrap(), habit);
    }

    #[test]
    fn test_undo_snapshot_survives_storage() {
        let store = Store::open_in_memory().unwrap();
        let today = date(2024, 6, 1);
        let habit = seeded(&store, "read", today);

        let done =
            LifecycleProcessor::apply(&store, &habit, LifecycleEvent::UserComplete, today).unwrap();
        let loaded = store.get_habit(habit.id).unwrap();
        assert_eq!(loaded, done);
        assert_eq!(loaded.undo, Some(habit.snapshot()));

        let undone =
            LifecycleProcessor::apply(&store, &loaded, LifecycleEvent::UserUndo, today).unwrap();
        assert_eq!(undone.habit_state, HabitState::Lively);
        assert_eq!(store.get_habit(habit.id).unwrap().streak, 0);
    }

    #[test]
    fn test_update_missing_habit_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .update_habit(Uuid::new_v4(), &HabitUpdate::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_fetch_unprocessed_filters_by_day_and_user() {
        let store = Store::open_in_memory().unwrap();
        let today = date(2024, 6, 10);
        seeded(&store, "b-stale", date(2024, 6, 8));
        seeded(&store, "a-stale", date(2024, 6, 9));
        seeded(&store, "fresh", today);
        store
            .create_habit(&Habit::new("someone-else", "x", date(2024, 6, 1)))
            .unwrap();

        let names: Vec<String> = store
            .fetch_unprocessed_habits(USER, today)
            .unwrap()
            .into_iter()
            .map(|r| r.unwrap().name)
            .collect();
        assert_eq!(names, vec!["a-stale", "b-stale"]);
    }

    #[test]
    fn test_processor_runs_against_sqlite() {
        let store = Store::open_in_memory().unwrap();
        let habit = seeded(&store, "walk", date(2024, 6, 1));

        let report = LifecycleProcessor::run(&store, USER, date(2024, 6, 2)).unwrap();
        assert_eq!(report.processed_count, 1);
        assert_eq!(report.grace_habits.len(), 1);

        let stored = store.get_habit(habit.id).unwrap();
        assert_eq!(stored.processed_date, date(2024, 6, 2));
        assert!(
            store
                .fetch_unprocessed_habits(USER, date(2024, 6, 2))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_malformed_date_is_data_integrity_error() {
        let store = Store::open_in_memory().unwrap();
        let habit = seeded(&store, "walk", date(2024, 6, 1));
        store
            .conn()
            .execute(
                "UPDATE habits SET processed_date = 'yesterday-ish' WHERE id = ?1",
                [habit.id.to_string()],
            )
            .unwrap();

        let err = store.get_habit(habit.id).unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
        assert!(EngineError::from(err).is_data_integrity());
    }

    #[test]
    fn test_corrupt_row_does_not_block_other_habits() {
        let store = Store::open_in_memory().unwrap();
        let broken = seeded(&store, "run", date(2024, 6, 1));
        let healthy = seeded(&store, "walk", date(2024, 6, 1));
        store
            .conn()
            .execute(
                "UPDATE habits SET processed_date = '2024-06-1x' WHERE id = ?1",
                [broken.id.to_string()],
            )
            .unwrap();

        let report = LifecycleProcessor::run(&store, USER, date(2024, 6, 2)).unwrap();

        assert_eq!(report.processed_count, 1);
        assert_eq!(report.grace_habits.len(), 1);
        assert_eq!(report.grace_habits[0].id, healthy.id);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].habit_id, broken.id.to_string());
        assert_eq!(report.failures[0].name, "run");
        assert!(matches!(report.failures[0].error, EngineError::Corrupt(_)));
        assert_eq!(
            store.get_habit(healthy.id).unwrap().processed_date,
            date(2024, 6, 2)
        );

        assert_eq!(store.find_habit(USER, "walk").unwrap().id, healthy.id);
        assert!(matches!(
            store.find_habit(USER, "run"),
            Err(StoreError::InvalidData(_))
        ));
        let listed = store.list_habits(USER).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].is_err());
        assert!(listed[1].is_ok());
    }

    #[test]
    fn test_find_habit_by_name_and_prefix() {
        let store = Store::open_in_memory().unwrap();
        let habit = seeded(&store, "Meditate", date(2024, 6, 1));
        seeded(&store, "journal", date(2024, 6, 1));

        assert_eq!(store.find_habit(USER, "meditate").unwrap().id, habit.id);
        assert_eq!(
            store.find_habit(USER, &habit.id.to_string()).unwrap().id,
            habit.id
        );
        let prefix = &habit.id.to_string()[..8];
        assert_eq!(store.find_habit(USER, prefix).unwrap().id, habit.id);
        assert!(matches!(
            store.find_habit(USER, "nope"),
            Err(StoreError::NotFound(_))
        ));
        assert!(store.find_habit("other", &habit.id.to_string()).is_err());
    }

    #[test]
    fn test_bucket_upsert_and_missing_bucket() {
        let store = Store::open_in_memory().unwrap();
        let may = BucketKey::Month(date(2024, 5, 1));
        assert!(store.fetch_bucket(USER, may).unwrap().is_empty());

        store
            .update_bucket(USER, may, &[ActionNode::new("a", "first")])
            .unwrap();
        store
            .update_bucket(USER, may, &[ActionNode::new("b", "second")])
            .unwrap();

        let forest = store.fetch_bucket(USER, may).unwrap();
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].id, "b");
    }

    #[test]
    fn test_list_buckets_puts_future_last() {
        let store = Store::open_in_memory().unwrap();
        store
            .update_bucket(USER, BucketKey::Future, &[ActionNode::new("f", "")])
            .unwrap();
        store
            .update_bucket(USER, BucketKey::Month(date(2024, 5, 1)), &[])
            .unwrap();
        store
            .update_bucket(USER, BucketKey::Month(date(2024, 4, 1)), &[])
            .unwrap();

        let keys: Vec<BucketKey> = store
            .list_buckets(USER)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            keys,
            vec![
                BucketKey::Month(date(2024, 4, 1)),
                BucketKey::Month(date(2024, 5, 1)),
                BucketKey::Future,
            ]
        );
    }

    #[test]
    fn test_corrupt_forest_json() {
        let store = Store::open_in_memory().unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO action_trees (user_id, forest) VALUES (?1, '{not json')",
                [USER],
            )
            .unwrap();
        let err = store.fetch_action_tree(USER).unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
    }

    #[test]
    fn test_migrator_runs_against_sqlite() {
        let store = Store::open_in_memory().unwrap();
        let march = BucketKey::Month(date(2024, 3, 1));
        store
            .update_bucket(
                USER,
                march,
                &[
                    ActionNode::new("open", "still going"),
                    ActionNode::new("done", "finished").completed_at(ts("2024-03-02T08:00:00Z")),
                ],
            )
            .unwrap();

        let report = TargetLifecycleMigrator::run(&store, USER, date(2024, 4, 2)).unwrap();
        assert_eq!(report.migrated, 1);

        let april = store.fetch_bucket(USER, report.current).unwrap();
        assert!(collect_ids(&april).contains("open"));
        let history = store.fetch_bucket(USER, march).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, "done");
    }

    #[test]
    fn test_action_tree_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.fetch_action_tree(USER).unwrap().is_empty());

        let forest = vec![
            ActionNode::new("root", "today").with_children(vec![ActionNode::new("leaf", "do it")]),
        ];
        store.save_action_tree(USER, &forest).unwrap();
        assert_eq!(store.fetch_action_tree(USER).unwrap(), forest);
    }

    #[test]
    fn test_settings_and_resolver_precedence() {
        let store = Store::open_in_memory().unwrap();
        let config = CadenceConfig::default();

        assert_eq!(store.get_settings(USER).unwrap(), UserSettings::default());
        assert_eq!(store.resolver(USER, &config, None).unwrap().tz_name(), "UTC");

        store.set_timezone(USER, "Asia/Tokyo").unwrap();
        let at = ts("2024-06-01T20:00:00Z");
        store.set_simulated_now(USER, Some(at)).unwrap();

        let resolver = store.resolver(USER, &config, None).unwrap();
        assert_eq!(resolver.tz_name(), "Asia/Tokyo");
        assert_eq!(resolver.today(), date(2024, 6, 2));

        let overridden = store.resolver(USER, &config, Some("UTC")).unwrap();
        assert_eq!(overridden.today(), date(2024, 6, 1));

        store.set_simulated_now(USER, None).unwrap();
        let settings = store.get_settings(USER).unwrap();
        assert_eq!(settings.simulated_now, None);
        assert_eq!(settings.timezone.as_deref(), Some("Asia/Tokyo"));
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.set_timezone(USER, "Mars/Olympus_Mons").is_err());
    }

    #[test]
    fn test_metadata() {
        let store = Store::open_in_memory().unwrap();

        assert!(store.get_metadata("foo").unwrap().is_none());
        store.set_metadata("foo", "bar").unwrap();
        assert_eq!(store.get_metadata("foo").unwrap(), Some("bar".to_string()));
        store.set_metadata("foo", "baz").unwrap();
        assert_eq!(store.get_metadata("foo").unwrap(), Some("baz".to_string()));
    }

    #[test]
    fn test_open_in_dir_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let base = dir.path().join("nested");
        let habit = {
            let store = Store::open_in_dir(&base).unwrap();
            seeded(&store, "persist", date(2024, 6, 1))
        };
        let store = Store::open_in_dir(&base).unwrap();
        assert_eq!(store.get_habit(habit.id).unwrap().name, "persist");
    }
}
