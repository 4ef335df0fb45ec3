//! Conversation-log message extraction
//!
//! Reads one JSONL session log and yields [`Message`] records lazily, in
//! file order.
//!
//! # Error Handling
//!
//! The extractor is designed to recover rather than abort:
//!
//! - **Malformed JSON lines**: traced at debug level and skipped, including
//!   a partially flushed final line of a file still being written. The
//!   stream continues at the next line.
//!
//! - **Missing id or role**: the record is not emitted. Ids come from
//!   `uuid` with `requestId` as fallback; the role comes from the record's
//!   `type` field.
//!
//! - **Unknown fields and content blocks**: ignored via serde defaults and
//!   a catch-all block variant.
//!
//! - **File unreadable**: [`MessageStream::open`] fails with an IO error the
//!   caller can report and skip; this is distinct from line-level problems,
//!   which never surface.
//!
//! Re-reading a file is idempotent at this layer; the dedup ledger is what
//! keeps re-read messages from being counted twice.

use crate::error::Result;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

/// Author role of a message record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// A human prompt
    User,
    /// Assistant-authored output; the only role the pattern matcher sees
    Assistant,
    /// Anything else (summaries, system records, ...)
    Other,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Other => "other",
        }
    }
}

/// One logical message extracted from a session log.
#[derive(Debug, Clone)]
pub struct Message {
    /// Unique within its source file; the dedup key
    pub id: String,
    /// Record timestamp (RFC3339 in the log)
    pub timestamp: DateTime<Utc>,
    /// Day the message belongs to, in local time
    pub day: NaiveDate,
    /// Display name of the project the session ran in
    pub project: String,
    /// Author role
    pub role: Role,
    /// Concatenated text content; empty when the record carried none
    pub body: String,
}

// ============================================
// Raw JSONL record types (serde deserialization)
// ============================================

/// Represents a single line from a session log.
///
/// Uses `#[serde(default)]` liberally to tolerate missing and unknown fields.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawRecord {
    uuid: Option<String>,
    request_id: Option<String>,
    #[serde(rename = "type")]
    record_type: Option<String>,
    timestamp: Option<String>,
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMessage {
    content: Option<RawContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    // tool_use, tool_result, images, and anything new do not carry
    // assistant prose
    #[serde(other)]
    Other,
}

/// Consecutive line-read errors tolerated before the stream gives up.
const MAX_READ_ERRORS: u32 = 8;

/// Lazy iterator over the messages of one session log file.
pub struct MessageStream {
    lines: Lines<BufReader<File>>,
    project: String,
    read_errors: u32,
}

impl MessageStream {
    /// Open a session log for reading.
    ///
    /// The project display name is derived from the encoded per-project
    /// directory the file lives in.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        if !file.metadata()?.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )
            .into());
        }

        let project = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .map(project_display_name)
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Self {
            lines: BufReader::new(file).lines(),
            project,
            read_errors: 0,
        })
    }

    /// Parse one line into a message, or None when the line should be
    /// skipped.
    fn parse_line(&self, line: &str) -> Option<Message> {
        if line.trim().is_empty() {
            return None;
        }

        let record: RawRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "skipping malformed line");
                return None;
            }
        };

        let id = record.uuid.or(record.request_id)?;

        let role = match record.record_type.as_deref()? {
            "assistant" => Role::Assistant,
            "user" => Role::User,
            _ => Role::Other,
        };

        // Records without a timestamp fall back to now; their day is the
        // current local day either way.
        let timestamp = record
            .timestamp
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let day = timestamp.with_timezone(&Local).date_naive();

        let body = record
            .message
            .and_then(|m| m.content)
            .map(flatten_content)
            .unwrap_or_default();

        Some(Message {
            id,
            timestamp,
            day,
            project: self.project.clone(),
            role,
            body,
        })
    }
}

impl Iterator for MessageStream {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        loop {
            let line = match self.lines.next()? {
                Ok(l) => l,
                Err(e) => {
                    self.read_errors += 1;
                    if self.read_errors >= MAX_READ_ERRORS {
                        tracing::warn!(error = %e, "giving up on file after repeated read errors");
                        return None;
                    }
                    tracing::debug!(error = %e, "skipping unreadable line");
                    continue;
                }
            };
            self.read_errors = 0;

            if let Some(message) = self.parse_line(&line) {
                return Some(message);
            }
        }
    }
}

/// Join a record's text blocks into one body.
fn flatten_content(content: RawContent) -> String {
    match content {
        RawContent::Text(text) => text,
        RawContent::Blocks(blocks) => {
            let texts: Vec<String> = blocks
                .into_iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text),
                    ContentBlock::Other => None,
                })
                .collect();
            texts.join("\n")
        }
    }
}

/// Turn an encoded project directory name into a display name.
///
/// Session logs live under `projects/-home-user-dev-myproject/`; the
/// leading path prefix is noise for display purposes.
pub fn project_display_name(dir_name: &str) -> String {
    for prefix in ["-Users-", "-home-", "-var-"] {
        if dir_name.starts_with(prefix) {
            let mut parts = dir_name.splitn(4, '-');
            if let Some(tail) = parts.nth(3) {
                return tail.to_string();
            }
            break;
        }
    }
    dir_name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn stream_from(lines: &[&str]) -> Vec<Message> {
        let dir = TempDir::new().unwrap();
        let project_dir = dir.path().join("-home-user-dev-myproject");
        std::fs::create_dir_all(&project_dir).unwrap();
        let path = project_dir.join("session.jsonl");
        let mut file = File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        MessageStream::open(&path).unwrap().collect()
    }

    #[test]
    fn test_extracts_assistant_message() {
        let messages = stream_from(&[
            r#"{"type":"assistant","uuid":"m1","timestamp":"2025-01-01T12:00:00Z","message":{"content":[{"type":"text","text":"You're absolutely right!"}]}}"#,
        ]);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "m1");
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].body, "You're absolutely right!");
        assert_eq!(messages[0].project, "dev-myproject");
    }

    #[test]
    fn test_malformed_line_between_valid_lines() {
        let messages = stream_from(&[
            r#"{"type":"assistant","uuid":"m1","timestamp":"2025-01-01T12:00:00Z","message":{"content":"first"}}"#,
            r#"{"type":"assistant","uuid":"m2","timesta"#,
            r#"{"type":"assistant","uuid":"m3","timestamp":"2025-01-01T12:01:00Z","message":{"content":"third"}}"#,
        ]);

        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m3"]);
    }

    #[test]
    fn test_missing_id_or_role_excluded() {
        let messages = stream_from(&[
            r#"{"type":"assistant","timestamp":"2025-01-01T12:00:00Z","message":{"content":"no id"}}"#,
            r#"{"uuid":"m1","timestamp":"2025-01-01T12:00:00Z","message":{"content":"no role"}}"#,
            r#"{"type":"user","uuid":"m2","timestamp":"2025-01-01T12:00:00Z","message":{"content":"ok"}}"#,
        ]);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "m2");
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn test_request_id_fallback() {
        let messages = stream_from(&[
            r#"{"type":"assistant","requestId":"req-7","timestamp":"2025-01-01T12:00:00Z","message":{"content":"hi"}}"#,
        ]);
        assert_eq!(messages[0].id, "req-7");
    }

    #[test]
    fn test_non_text_blocks_do_not_contribute() {
        let messages = stream_from(&[
            r#"{"type":"assistant","uuid":"m1","timestamp":"2025-01-01T12:00:00Z","message":{"content":[{"type":"tool_use","id":"t1","name":"Bash","input":{}},{"type":"text","text":"Perfect!"}]}}"#,
        ]);
        assert_eq!(messages[0].body, "Perfect!");
    }

    #[test]
    fn test_unknown_record_type_is_other() {
        let messages = stream_from(&[
            r#"{"type":"summary","uuid":"s1","timestamp":"2025-01-01T12:00:00Z"}"#,
        ]);
        assert_eq!(messages[0].role, Role::Other);
        assert!(messages[0].body.is_empty());
    }

    #[test]
    fn test_day_follows_local_time() {
        let messages = stream_from(&[
            r#"{"type":"assistant","uuid":"m1","timestamp":"2025-06-15T12:00:00Z","message":{"content":"hi"}}"#,
        ]);
        let expected = messages[0]
            .timestamp
            .with_timezone(&Local)
            .date_naive();
        assert_eq!(messages[0].day, expected);
    }

    #[test]
    fn test_project_display_name() {
        assert_eq!(
            project_display_name("-Users-test-dev-myproject"),
            "dev-myproject"
        );
        assert_eq!(
            project_display_name("-home-user-dev-myproject"),
            "dev-myproject"
        );
        assert_eq!(project_display_name("plain"), "plain");
    }
}
