//! phrasetrack-server - the counting service
//!
//! Owns per-(day, source) records uploaded by scanners and serves the
//! aggregated view. Writes require the shared secret when
//! `PHRASETRACK_SECRET` is set; reads are open. The payload of
//! `POST /api/set` is schemaless beyond its fixed keys: any integer field
//! is stored as a pattern count, so new patterns need no server change.

mod store;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use store::{DayAggregate, SourceDay};
use tokio_rusqlite::Connection;
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct AppState {
    db: Connection,
    secret: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let db_path =
        std::env::var("PHRASETRACK_DB").unwrap_or_else(|_| "counts.db".to_string());
    let db = Connection::open(db_path.clone()).await?;
    store::init_schema(&db).await?;
    tracing::info!(path = %db_path, "Database ready");

    let secret = std::env::var("PHRASETRACK_SECRET").ok();
    if secret.is_none() {
        tracing::warn!("PHRASETRACK_SECRET not set; writes are unauthenticated");
    }

    let app = Router::new()
        .route("/api/today", get(get_today))
        .route("/api/history", get(get_history))
        .route("/api/by-source", get(get_by_source))
        .route("/api/set", post(set_day))
        .with_state(AppState { db, secret });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3003);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Today's counts, aggregated across all sources.
async fn get_today(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let agg = store::read_day(&state.db, today)
        .await
        .map_err(internal)?;
    Ok(Json(day_body(&agg, false)))
}

/// One aggregated entry per day with data, ascending.
async fn get_history(State(state): State<AppState>) -> ApiResult<Json<Vec<serde_json::Value>>> {
    let range = store::read_range(&state.db).await.map_err(internal)?;
    Ok(Json(range.iter().map(|agg| day_body(agg, true)).collect()))
}

/// Raw per-source records, for inspection/debugging.
async fn get_by_source(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<serde_json::Value>>> {
    let sources = store::read_by_source(&state.db).await.map_err(internal)?;

    let body = sources
        .into_iter()
        .map(|source| {
            let history: Vec<serde_json::Value> = source
                .history
                .iter()
                .map(|rec| {
                    day_body(
                        &DayAggregate {
                            day: rec.day.clone(),
                            patterns: rec.patterns.clone(),
                            total_messages: rec.total_messages,
                        },
                        true,
                    )
                })
                .collect();
            serde_json::json!({
                "source_id": source.source_id,
                "history": history,
            })
        })
        .collect();

    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
struct SetRequest {
    day: String,
    source_id: String,
    total_messages: Option<u64>,
    secret: Option<String>,
    /// Every other field; integer values are pattern counts
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

/// Replace one source's record for a day.
async fn set_day(
    State(state): State<AppState>,
    Json(payload): Json<SetRequest>,
) -> ApiResult<Json<&'static str>> {
    if !secret_ok(state.secret.as_deref(), payload.secret.as_deref()) {
        return Err((StatusCode::UNAUTHORIZED, "Invalid secret".to_string()));
    }

    let record = SourceDay {
        day: payload.day,
        source_id: payload.source_id,
        patterns: pattern_counts(&payload.extra),
        total_messages: payload.total_messages.unwrap_or(0),
    };

    tracing::debug!(
        day = %record.day,
        source_id = %record.source_id,
        patterns = record.patterns.len(),
        "Upsert"
    );
    store::upsert_day(&state.db, record)
        .await
        .map_err(internal)?;

    Ok(Json("ok"))
}

/// When a secret is configured, the payload must carry the same one.
fn secret_ok(expected: Option<&str>, provided: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(expected) => provided == Some(expected),
    }
}

/// Integer-valued payload fields become pattern counts; everything else
/// is ignored.
fn pattern_counts(extra: &HashMap<String, serde_json::Value>) -> BTreeMap<String, u64> {
    extra
        .iter()
        .filter_map(|(key, value)| value.as_u64().map(|n| (key.clone(), n)))
        .collect()
}

/// Response shape shared by the read endpoints.
fn day_body(agg: &DayAggregate, include_day: bool) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    if include_day {
        map.insert("day".to_string(), serde_json::Value::from(agg.day.clone()));
    }
    for (pattern, count) in &agg.patterns {
        map.insert(pattern.clone(), serde_json::Value::from(*count));
    }
    map.insert(
        "total_messages".to_string(),
        serde_json::Value::from(agg.total_messages),
    );
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_check() {
        assert!(secret_ok(None, None));
        assert!(secret_ok(None, Some("anything")));
        assert!(secret_ok(Some("s3cret"), Some("s3cret")));
        assert!(!secret_ok(Some("s3cret"), Some("wrong")));
        assert!(!secret_ok(Some("s3cret"), None));
    }

    #[test]
    fn test_pattern_counts_are_schemaless() {
        let payload: SetRequest = serde_json::from_str(
            r#"{
                "day": "2025-01-01",
                "source_id": "A",
                "absolutely": 3,
                "brand_new_pattern": 1,
                "note": "not a count",
                "total_messages": 10,
                "secret": "s"
            }"#,
        )
        .unwrap();

        let patterns = pattern_counts(&payload.extra);
        assert_eq!(patterns["absolutely"], 3);
        assert_eq!(patterns["brand_new_pattern"], 1);
        // Fixed keys and non-numeric fields are not patterns
        assert!(!patterns.contains_key("day"));
        assert!(!patterns.contains_key("total_messages"));
        assert!(!patterns.contains_key("note"));
        assert_eq!(payload.total_messages, Some(10));
    }

    #[test]
    fn test_day_body_shape() {
        let mut patterns = BTreeMap::new();
        patterns.insert("perfect".to_string(), 5u64);
        let agg = DayAggregate {
            day: "2025-01-01".to_string(),
            patterns,
            total_messages: 15,
        };

        let today = day_body(&agg, false);
        assert_eq!(today["perfect"], 5);
        assert_eq!(today["total_messages"], 15);
        assert!(today.get("day").is_none());

        let history = day_body(&agg, true);
        assert_eq!(history["day"], "2025-01-01");
    }
}
