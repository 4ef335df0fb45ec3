//! Per-(day, source) storage and read-time aggregation
//!
//! Each source owns its row for a day; a write replaces that row wholesale
//! (last write wins per source, never an additive merge). The aggregated
//! view is recomputed on every read by summing across sources, so the sum
//! is independent of upload order and of repeated uploads from the same
//! source. Distinct (day, source_id) keys are what make concurrent
//! uploads from different sources safe without locking.

use std::collections::BTreeMap;
use tokio_rusqlite::Connection;

pub type Result<T> = std::result::Result<T, tokio_rusqlite::Error>;

/// One stored per-source record.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDay {
    pub day: String,
    pub source_id: String,
    pub patterns: BTreeMap<String, u64>,
    pub total_messages: u64,
}

/// Aggregated counts for one day, summed across sources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DayAggregate {
    pub day: String,
    pub patterns: BTreeMap<String, u64>,
    pub total_messages: u64,
}

/// All of one source's records, for inspection.
#[derive(Debug, Clone)]
pub struct SourceHistory {
    pub source_id: String,
    pub history: Vec<SourceDay>,
}

/// Create the schema if missing.
pub async fn init_schema(conn: &Connection) -> Result<()> {
    conn.call(|conn| {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS day_counts (
                day            TEXT NOT NULL,
                source_id      TEXT NOT NULL,
                patterns       TEXT NOT NULL DEFAULT '{}',
                total_messages INTEGER NOT NULL DEFAULT 0,

                PRIMARY KEY (day, source_id)
            );",
        )?;
        Ok(())
    })
    .await
}

/// Replace the record for a (day, source_id) pair.
pub async fn upsert_day(conn: &Connection, record: SourceDay) -> Result<()> {
    let patterns_json =
        serde_json::to_string(&record.patterns).unwrap_or_else(|_| "{}".to_string());

    conn.call(move |conn| {
        conn.execute(
            "INSERT INTO day_counts (day, source_id, patterns, total_messages)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(day, source_id) DO UPDATE SET
                 patterns = excluded.patterns,
                 total_messages = excluded.total_messages",
            (
                &record.day,
                &record.source_id,
                &patterns_json,
                record.total_messages as i64,
            ),
        )?;
        Ok(())
    })
    .await
}

/// Sum counts across every source with a record for the day.
pub async fn read_day(conn: &Connection, day: String) -> Result<DayAggregate> {
    let rows = conn
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT day, source_id, patterns, total_messages
                 FROM day_counts WHERE day = ?1",
            )?;
            let rows = stmt
                .query_map([&day], row_to_source_day)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?;

    let mut aggregates = aggregate_by_day(rows);
    Ok(aggregates.pop().unwrap_or_default())
}

/// Aggregated counts per day over the full stored range, ascending.
pub async fn read_range(conn: &Connection) -> Result<Vec<DayAggregate>> {
    let rows = conn
        .call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT day, source_id, patterns, total_messages
                 FROM day_counts ORDER BY day",
            )?;
            let rows = stmt
                .query_map([], row_to_source_day)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?;

    Ok(aggregate_by_day(rows))
}

/// Raw per-source records grouped by source, days ascending.
pub async fn read_by_source(conn: &Connection) -> Result<Vec<SourceHistory>> {
    let rows = conn
        .call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT day, source_id, patterns, total_messages
                 FROM day_counts ORDER BY source_id, day",
            )?;
            let rows = stmt
                .query_map([], row_to_source_day)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?;

    let mut sources: Vec<SourceHistory> = Vec::new();
    for row in rows {
        match sources.last_mut() {
            Some(entry) if entry.source_id == row.source_id => entry.history.push(row),
            _ => sources.push(SourceHistory {
                source_id: row.source_id.clone(),
                history: vec![row],
            }),
        }
    }
    Ok(sources)
}

fn row_to_source_day(row: &rusqlite::Row<'_>) -> rusqlite::Result<SourceDay> {
    let patterns_json: String = row.get(2)?;
    let patterns: BTreeMap<String, u64> =
        serde_json::from_str(&patterns_json).unwrap_or_default();
    let total: i64 = row.get(3)?;

    Ok(SourceDay {
        day: row.get(0)?,
        source_id: row.get(1)?,
        patterns,
        total_messages: total.max(0) as u64,
    })
}

/// Fold per-source rows (already ordered by day) into per-day sums.
fn aggregate_by_day(rows: Vec<SourceDay>) -> Vec<DayAggregate> {
    let mut aggregates: Vec<DayAggregate> = Vec::new();

    for row in rows {
        if aggregates.last().map(|a| a.day.as_str()) != Some(row.day.as_str()) {
            aggregates.push(DayAggregate {
                day: row.day.clone(),
                ..Default::default()
            });
        }
        // last_mut is always Some here
        if let Some(agg) = aggregates.last_mut() {
            for (pattern, count) in row.patterns {
                *agg.patterns.entry(pattern).or_insert(0) += count;
            }
            agg.total_messages += row.total_messages;
        }
    }

    aggregates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(day: &str, source: &str, patterns: &[(&str, u64)], total: u64) -> SourceDay {
        SourceDay {
            day: day.to_string(),
            source_id: source.to_string(),
            patterns: patterns
                .iter()
                .map(|(n, c)| (n.to_string(), *c))
                .collect(),
            total_messages: total,
        }
    }

    async fn test_db() -> Connection {
        let conn = Connection::open_in_memory().await.unwrap();
        init_schema(&conn).await.unwrap();
        conn
    }

    #[tokio::test]
    async fn sources_sum_on_read() {
        let db = test_db().await;
        upsert_day(&db, record("2025-01-01", "A", &[("perfect", 3)], 10))
            .await
            .unwrap();
        upsert_day(&db, record("2025-01-01", "B", &[("perfect", 2)], 5))
            .await
            .unwrap();

        let agg = read_day(&db, "2025-01-01".to_string()).await.unwrap();
        assert_eq!(agg.patterns["perfect"], 5);
        assert_eq!(agg.total_messages, 15);
    }

    #[tokio::test]
    async fn same_source_upsert_overwrites() {
        let db = test_db().await;
        upsert_day(&db, record("2025-01-01", "A", &[("perfect", 3)], 10))
            .await
            .unwrap();
        upsert_day(&db, record("2025-01-01", "A", &[("perfect", 7)], 12))
            .await
            .unwrap();

        let agg = read_day(&db, "2025-01-01".to_string()).await.unwrap();
        assert_eq!(agg.patterns["perfect"], 7);
        assert_eq!(agg.total_messages, 12);
    }

    #[tokio::test]
    async fn upload_order_does_not_matter() {
        let db = test_db().await;
        let forward = [
            record("2025-01-01", "A", &[("right", 1)], 4),
            record("2025-01-01", "B", &[("right", 2)], 6),
        ];

        upsert_day(&db, forward[0].clone()).await.unwrap();
        upsert_day(&db, forward[1].clone()).await.unwrap();
        let first = read_day(&db, "2025-01-01".to_string()).await.unwrap();

        let db = test_db().await;
        upsert_day(&db, forward[1].clone()).await.unwrap();
        upsert_day(&db, forward[0].clone()).await.unwrap();
        let second = read_day(&db, "2025-01-01".to_string()).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn range_is_ascending_and_aggregated() {
        let db = test_db().await;
        upsert_day(&db, record("2025-01-02", "A", &[("perfect", 1)], 1))
            .await
            .unwrap();
        upsert_day(&db, record("2025-01-01", "A", &[("perfect", 2)], 2))
            .await
            .unwrap();
        upsert_day(&db, record("2025-01-01", "B", &[("excellent", 1)], 1))
            .await
            .unwrap();

        let range = read_range(&db).await.unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].day, "2025-01-01");
        assert_eq!(range[0].patterns["perfect"], 2);
        assert_eq!(range[0].patterns["excellent"], 1);
        assert_eq!(range[0].total_messages, 3);
        assert_eq!(range[1].day, "2025-01-02");
    }

    #[tokio::test]
    async fn by_source_exposes_raw_records() {
        let db = test_db().await;
        upsert_day(&db, record("2025-01-01", "B", &[("perfect", 2)], 5))
            .await
            .unwrap();
        upsert_day(&db, record("2025-01-01", "A", &[("perfect", 3)], 10))
            .await
            .unwrap();
        upsert_day(&db, record("2025-01-02", "A", &[("perfect", 1)], 2))
            .await
            .unwrap();

        let sources = read_by_source(&db).await.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].source_id, "A");
        assert_eq!(sources[0].history.len(), 2);
        assert_eq!(sources[0].history[0].day, "2025-01-01");
        assert_eq!(sources[1].source_id, "B");
        assert_eq!(sources[1].history[0].patterns["perfect"], 2);
    }

    #[tokio::test]
    async fn missing_day_reads_empty() {
        let db = test_db().await;
        let agg = read_day(&db, "2099-01-01".to_string()).await.unwrap();
        assert!(agg.patterns.is_empty());
        assert_eq!(agg.total_messages, 0);
    }
}
