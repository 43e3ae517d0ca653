//! Database migrations
//!
//! The schema version lives in SQLite's `user_version` pragma. Each entry
//! of [`MIGRATIONS`] upgrades the schema by exactly one version.

use crate::Result;
use rusqlite::Connection;

const MIGRATIONS: &[(&str, &str)] = &[(
    "key-value store",
    r#"
    CREATE TABLE IF NOT EXISTS kv_store (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    "#,
)];

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let applied: usize = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    for (index, (name, sql)) in MIGRATIONS.iter().enumerate().skip(applied) {
        let version = index + 1;
        tracing::info!(version, name, "Running migration");
        conn.execute_batch(sql)?;
        conn.pragma_update(None, "user_version", version as i64)?;
    }

    Ok(())
}
