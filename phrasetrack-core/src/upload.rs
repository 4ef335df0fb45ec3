//! Upload client for the counting service
//!
//! Sends one day's *cumulative* counts for this source to `POST /api/set`.
//! The service replaces its record for the (day, source) pair wholesale,
//! so re-sending after new matches is always safe and sending a stale
//! total is self-correcting on the next pass. Network failures never block
//! local accounting; the caller retries on a later pass.

use crate::config::UploadConfig;
use crate::error::{Error, Result};
use crate::ledger::DayCounts;
use chrono::NaiveDate;
use std::path::Path;
use std::time::Duration;

/// HTTP client for the counting service's write endpoint.
pub struct UploadClient {
    http_client: reqwest::blocking::Client,
    base_url: String,
    source_id: String,
    secret: Option<String>,
    max_retries: usize,
}

impl UploadClient {
    /// Create a client from configuration.
    ///
    /// Returns `None` when uploads are disabled; enabling uploads without
    /// a server URL is a configuration error.
    pub fn new(config: &UploadConfig, source_id: String) -> Result<Option<Self>> {
        config.validate()?;
        if !config.is_ready() {
            return Ok(None);
        }

        let base_url = config
            .server_url
            .clone()
            .ok_or_else(|| Error::Config("upload.server_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let http_client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Some(Self {
            http_client,
            base_url,
            source_id,
            secret: config.secret.clone(),
            max_retries: config.max_retries,
        }))
    }

    /// The source id this client reports as.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// The service URL this client reports to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upload one day's cumulative counts.
    ///
    /// Transient failures (transport errors, 5xx) retry with exponential
    /// backoff; an authentication rejection fails immediately as
    /// [`Error::Unauthorized`] and is never retried.
    pub fn set_day(&self, day: NaiveDate, counts: &DayCounts) -> Result<()> {
        let payload = build_payload(
            day,
            &self.source_id,
            counts,
            self.secret.as_deref(),
        );

        let mut last_error = None;
        let mut delay = Duration::from_millis(500);

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tracing::debug!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying upload"
                );
                std::thread::sleep(delay);
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }

            match self.post_set(&payload) {
                Ok(()) => return Ok(()),
                Err(Error::Unauthorized) => return Err(Error::Unauthorized),
                Err(e) => {
                    tracing::warn!(error = %e, "Transient upload error");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Upload("max retries exceeded".to_string())))
    }

    /// One POST to /api/set; expects the literal "ok" body.
    fn post_set(&self, payload: &serde_json::Value) -> Result<()> {
        let url = format!("{}/api/set", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(payload)
            .send()
            .map_err(|e| Error::Upload(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized);
        }

        if !status.is_success() {
            let body = response.text().unwrap_or_else(|_| "unknown".to_string());
            return Err(Error::Upload(format!("API error ({}): {}", status, body)));
        }

        let body: String = response
            .json()
            .map_err(|e| Error::Upload(format!("failed to parse response: {}", e)))?;
        if body != "ok" {
            return Err(Error::Upload(format!("unexpected response: {}", body)));
        }

        Ok(())
    }
}

/// Build the /api/set payload.
///
/// Pattern counts ride as flat top-level fields next to the three fixed
/// keys; the service treats any numeric field it does not recognize as a
/// pattern count.
fn build_payload(
    day: NaiveDate,
    source_id: &str,
    counts: &DayCounts,
    secret: Option<&str>,
) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert(
        "day".to_string(),
        serde_json::Value::from(day.format("%Y-%m-%d").to_string()),
    );
    map.insert("source_id".to_string(), serde_json::Value::from(source_id));

    for (pattern, count) in &counts.patterns {
        map.insert(pattern.clone(), serde_json::Value::from(*count));
    }
    map.insert(
        "total_messages".to_string(),
        serde_json::Value::from(counts.total_messages),
    );

    if let Some(secret) = secret {
        map.insert("secret".to_string(), serde_json::Value::from(secret));
    }

    serde_json::Value::Object(map)
}

/// Load this installation's stable source id, generating and persisting
/// one on first use.
pub fn load_or_create_source_id(data_dir: &Path) -> Result<String> {
    let path = data_dir.join("source_id");

    if let Ok(existing) = std::fs::read_to_string(&path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    std::fs::create_dir_all(data_dir)?;
    std::fs::write(&path, &id)?;
    tracing::info!(source_id = %id, "Generated new source id");
    Ok(id)
}
