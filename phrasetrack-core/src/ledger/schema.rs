//! Local store schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: dedup ledger + source-local daily counts
    r#"
    -- Message ids already counted. Scoped per installation, grows
    -- monotonically; pruning very old entries is external housekeeping.
    CREATE TABLE IF NOT EXISTS seen_messages (
        id            TEXT PRIMARY KEY,
        first_seen_at TEXT NOT NULL
    );

    -- Cumulative per-day, per-pattern match counts for this source.
    CREATE TABLE IF NOT EXISTS daily_counts (
        day     TEXT NOT NULL,
        pattern TEXT NOT NULL,
        count   INTEGER NOT NULL DEFAULT 0,

        PRIMARY KEY (day, pattern)
    );

    -- Cumulative per-day message totals for this source.
    CREATE TABLE IF NOT EXISTS daily_totals (
        day            TEXT PRIMARY KEY,
        total_messages INTEGER NOT NULL DEFAULT 0
    );

    -- Running flagship-pattern count per project.
    CREATE TABLE IF NOT EXISTS project_counts (
        project TEXT PRIMARY KEY,
        count   INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_daily_counts_day ON daily_counts(day);
    "#,
];

/// Apply any migrations newer than the database's recorded version.
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running store migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = [
            "seen_messages",
            "daily_counts",
            "daily_totals",
            "project_counts",
        ];
        for table in tables {
            let count: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }
}
