//! Dedup ledger and source-local daily counts
//!
//! The ledger is the durable record of which message ids have already been
//! counted, plus the cumulative per-day counters they produced. Both live
//! in one SQLite database and are written in a single transaction per file
//! batch: either a message is marked seen *and* its counts applied, or
//! neither happened. A write failure therefore aborts the scan pass
//! instead of risking a double count on the next run.

mod schema;

pub use schema::SCHEMA_VERSION;

use crate::aggregate::FileBatch;
use crate::error::Result;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

/// Cumulative counts for one day from this source, as uploaded.
#[derive(Debug, Clone, Default)]
pub struct DayCounts {
    /// Pattern name -> cumulative matched-message count
    pub patterns: BTreeMap<String, u64>,
    /// Cumulative total_messages for the day
    pub total_messages: u64,
}

impl DayCounts {
    /// True when the day has no data at all.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && self.total_messages == 0
    }
}

/// Durable dedup ledger + daily counters.
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this store.
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        schema::run_migrations(&conn)
    }

    /// Has this message id already been counted?
    pub fn seen(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM seen_messages WHERE id = ?1",
                [id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Mark ids as seen and apply count increments, atomically.
    ///
    /// Replaying a batch whose ids were already marked is a no-op for the
    /// marks (`INSERT OR IGNORE`), but callers are expected to build
    /// batches only from unseen messages.
    pub fn commit(&self, batch: &FileBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let now = Utc::now().to_rfc3339();
        {
            let mut mark = tx.prepare(
                "INSERT OR IGNORE INTO seen_messages (id, first_seen_at) VALUES (?1, ?2)",
            )?;
            for id in &batch.ids {
                mark.execute(params![id, now])?;
            }

            let mut bump_pattern = tx.prepare(
                "INSERT INTO daily_counts (day, pattern, count) VALUES (?1, ?2, ?3)
                 ON CONFLICT(day, pattern) DO UPDATE SET count = count + excluded.count",
            )?;
            let mut bump_total = tx.prepare(
                "INSERT INTO daily_totals (day, total_messages) VALUES (?1, ?2)
                 ON CONFLICT(day) DO UPDATE SET
                     total_messages = total_messages + excluded.total_messages",
            )?;

            for (day, delta) in &batch.days {
                let day = day_key(*day);
                for (pattern, count) in &delta.patterns {
                    bump_pattern.execute(params![day, pattern, *count as i64])?;
                }
                if delta.total_messages > 0 {
                    bump_total.execute(params![day, delta.total_messages as i64])?;
                }
            }

            let mut bump_project = tx.prepare(
                "INSERT INTO project_counts (project, count) VALUES (?1, ?2)
                 ON CONFLICT(project) DO UPDATE SET count = count + excluded.count",
            )?;
            for (project, count) in &batch.projects {
                bump_project.execute(params![project, *count as i64])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Cumulative counts for one day, for upload.
    pub fn day_counts(&self, day: NaiveDate) -> Result<DayCounts> {
        let conn = self.conn.lock().unwrap();
        let day = day_key(day);

        let mut counts = DayCounts::default();

        let mut stmt =
            conn.prepare("SELECT pattern, count FROM daily_counts WHERE day = ?1")?;
        let rows = stmt.query_map([&day], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (pattern, count) = row?;
            counts.patterns.insert(pattern, count.max(0) as u64);
        }

        let total: Option<i64> = conn
            .query_row(
                "SELECT total_messages FROM daily_totals WHERE day = ?1",
                [&day],
                |r| r.get(0),
            )
            .optional()?;
        counts.total_messages = total.unwrap_or(0).max(0) as u64;

        Ok(counts)
    }

    /// Every day with any recorded data, ascending.
    pub fn days_with_data(&self) -> Result<Vec<NaiveDate>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT day FROM daily_counts
             UNION SELECT day FROM daily_totals
             ORDER BY day",
        )?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;

        let mut days = Vec::new();
        for row in rows {
            if let Ok(day) = row?.parse() {
                days.push(day);
            }
        }
        Ok(days)
    }

    /// All-time totals per pattern.
    pub fn pattern_totals(&self) -> Result<BTreeMap<String, u64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT pattern, SUM(count) FROM daily_counts GROUP BY pattern")?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?;

        let mut totals = BTreeMap::new();
        for row in rows {
            let (pattern, total) = row?;
            totals.insert(pattern, total.max(0) as u64);
        }
        Ok(totals)
    }

    /// Flagship-pattern counts per project, highest first.
    pub fn project_counts(&self) -> Result<Vec<(String, u64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT project, count FROM project_counts ORDER BY count DESC, project",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (project, count) = row?;
            counts.push((project, count.max(0) as u64));
        }
        Ok(counts)
    }

    /// Number of message ids the ledger has recorded.
    pub fn seen_count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM seen_messages", [], |r| r.get(0))?;
        Ok(count.max(0) as u64)
    }
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::DayDelta;

    fn ledger() -> Ledger {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.migrate().unwrap();
        ledger
    }

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn batch(ids: &[&str], day_str: &str, patterns: &[(&str, u64)], total: u64) -> FileBatch {
        let mut delta = DayDelta::default();
        for (name, count) in patterns {
            delta.patterns.insert(name.to_string(), *count);
        }
        delta.total_messages = total;

        let mut batch = FileBatch::default();
        batch.ids = ids.iter().map(|s| s.to_string()).collect();
        batch.days.insert(day(day_str), delta);
        batch
    }

    #[test]
    fn test_seen_after_commit() {
        let ledger = ledger();
        assert!(!ledger.seen("m1").unwrap());

        ledger
            .commit(&batch(&["m1"], "2025-01-01", &[("perfect", 1)], 1))
            .unwrap();

        assert!(ledger.seen("m1").unwrap());
        assert!(!ledger.seen("m2").unwrap());
        assert_eq!(ledger.seen_count().unwrap(), 1);
    }

    #[test]
    fn test_counts_accumulate_across_commits() {
        let ledger = ledger();

        ledger
            .commit(&batch(&["m1"], "2025-01-01", &[("perfect", 1)], 1))
            .unwrap();
        ledger
            .commit(&batch(&["m2"], "2025-01-01", &[("perfect", 1), ("right", 1)], 1))
            .unwrap();

        let counts = ledger.day_counts(day("2025-01-01")).unwrap();
        assert_eq!(counts.patterns["perfect"], 2);
        assert_eq!(counts.patterns["right"], 1);
        assert_eq!(counts.total_messages, 2);
    }

    #[test]
    fn test_days_with_data_sorted() {
        let ledger = ledger();
        ledger
            .commit(&batch(&["m2"], "2025-01-02", &[("perfect", 1)], 1))
            .unwrap();
        ledger
            .commit(&batch(&["m1"], "2025-01-01", &[], 1))
            .unwrap();

        assert_eq!(
            ledger.days_with_data().unwrap(),
            vec![day("2025-01-01"), day("2025-01-02")]
        );
    }

    #[test]
    fn test_empty_day_counts() {
        let ledger = ledger();
        let counts = ledger.day_counts(day("2025-01-01")).unwrap();
        assert!(counts.is_empty());
    }

    #[test]
    fn test_pattern_totals_span_days() {
        let ledger = ledger();
        ledger
            .commit(&batch(&["m1"], "2025-01-01", &[("perfect", 2)], 2))
            .unwrap();
        ledger
            .commit(&batch(&["m2"], "2025-01-02", &[("perfect", 1)], 1))
            .unwrap();

        let totals = ledger.pattern_totals().unwrap();
        assert_eq!(totals["perfect"], 3);
    }

    #[test]
    fn test_project_counts_ordered() {
        let ledger = ledger();

        let mut b = batch(&["m1"], "2025-01-01", &[("absolutely", 3)], 3);
        b.projects.insert("alpha".to_string(), 1);
        b.projects.insert("beta".to_string(), 2);
        ledger.commit(&b).unwrap();

        assert_eq!(
            ledger.project_counts().unwrap(),
            vec![("beta".to_string(), 2), ("alpha".to_string(), 1)]
        );
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let ledger = ledger();
        ledger.commit(&FileBatch::default()).unwrap();
        assert_eq!(ledger.seen_count().unwrap(), 0);
    }
}
