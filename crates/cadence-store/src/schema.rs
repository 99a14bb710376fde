use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 2;

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "wal_autocheckpoint", 100)?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS habits (
            id                  TEXT PRIMARY KEY,
            user_id             TEXT NOT NULL,
            name                TEXT NOT NULL,
            habit_state         TEXT NOT NULL
                CHECK (habit_state IN ('TODAY', 'YESTERDAY', 'LIVELY', 'JUNKED')),
            streak              INTEGER NOT NULL DEFAULT 0,
            longest_streak      INTEGER NOT NULL DEFAULT 0,
            junked_date         TEXT,
            completed_date      TEXT,
            processed_date      TEXT NOT NULL,
            last_resolved_date  TEXT,
            undo_streak         INTEGER,
            undo_longest_streak INTEGER,
            undo_habit_state    TEXT,
            undo_junked_date    TEXT,
            undo_completed_date TEXT,
            is_public           INTEGER NOT NULL DEFAULT 0,
            goal_value          REAL,
            goal_unit           TEXT,
            created_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS target_buckets (
            user_id    TEXT NOT NULL,
            month_key  TEXT NOT NULL,
            forest     TEXT NOT NULL DEFAULT '[]',
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (user_id, month_key)
        );

        CREATE TABLE IF NOT EXISTS action_trees (
            user_id    TEXT PRIMARY KEY,
            forest     TEXT NOT NULL DEFAULT '[]',
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS user_settings (
            user_id       TEXT PRIMARY KEY,
            timezone      TEXT,
            simulated_now TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_habits_user_processed ON habits(user_id, processed_date);
        ",
    )?;

    // v1 databases predate grace resolution tracking
    if conn
        .prepare("SELECT last_resolved_date FROM habits LIMIT 0")
        .is_err()
    {
        conn.execute_batch("ALTER TABLE habits ADD COLUMN last_resolved_date TEXT;")?;
        tracing::info!("added habits.last_resolved_date");
    }

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;
    tracing::info!(version = SCHEMA_VERSION, "schema initialized");

    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = 'schema_version'")?;
    let version = stmt
        .query_row([], |row| {
            let v: String = row.get(0)?;
            Ok(v.parse::<i64>().unwrap_or(0))
        })
        .ok();
    Ok(version)
}
