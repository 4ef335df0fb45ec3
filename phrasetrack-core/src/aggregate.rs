//! Per-day aggregation of pattern matches
//!
//! The aggregator folds (message, matched-pattern-set) pairs into two
//! shapes at once: a per-file [`FileBatch`] the ledger commits
//! transactionally, and a scan-wide [`ScanTally`] for reporting and
//! uploads. Batch and incremental scans share this code unchanged; with a
//! fresh ledger the tally is the full history, with a warm ledger it is
//! the delta.

use crate::extract::{Message, Role};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Which role increments a day's total_messages counter.
///
/// The two derived metrics of the source system count different roles, so
/// this is a per-aggregator configuration rather than a fixed rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleCount {
    /// Count every assistant message once per day
    Assistant,
    /// Count every user message once per day
    User,
    /// Count every message regardless of role
    All,
}

impl RoleCount {
    /// Whether a message with this role counts toward total_messages.
    pub fn counts(&self, role: Role) -> bool {
        match self {
            RoleCount::Assistant => role == Role::Assistant,
            RoleCount::User => role == Role::User,
            RoleCount::All => true,
        }
    }
}

/// New counts discovered for a single day.
#[derive(Debug, Clone, Default)]
pub struct DayDelta {
    /// Pattern name -> newly matched message count
    pub patterns: BTreeMap<String, u64>,
    /// Newly counted messages per the role rule
    pub total_messages: u64,
}

/// Everything one file contributed; committed to the ledger as one
/// transaction so a failure leaves no partial state behind.
#[derive(Debug, Default)]
pub struct FileBatch {
    /// Message ids to mark as seen
    pub ids: Vec<String>,
    /// Count increments keyed by day
    pub days: BTreeMap<NaiveDate, DayDelta>,
    /// Per-project increments for the flagship pattern
    pub projects: BTreeMap<String, u64>,
}

impl FileBatch {
    /// True when the file contributed nothing new.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A single newly matched message, for watcher notifications.
#[derive(Debug, Clone)]
pub struct MatchEvent {
    /// Project display name
    pub project: String,
    /// Names of the patterns this message satisfied
    pub patterns: Vec<String>,
    /// First part of the message body
    pub preview: String,
}

/// Outcome of one full scan pass.
#[derive(Debug, Default)]
pub struct ScanTally {
    /// Count deltas for every day this pass touched
    pub days: BTreeMap<NaiveDate, DayDelta>,
    /// Newly matched messages per pattern, across all days
    pub new_matches: BTreeMap<String, u64>,
    /// Per-project matches of the flagship pattern
    pub projects: BTreeMap<String, u64>,
    /// Matched messages, in discovery order
    pub events: Vec<MatchEvent>,
    /// Messages counted toward total_messages this pass
    pub messages_counted: u64,
    /// Files that yielded at least one new message
    pub files_with_new: usize,
    /// Files visited
    pub files_scanned: usize,
    /// Files that could not be opened, with the error text
    pub unreadable_files: Vec<(PathBuf, String)>,
}

impl ScanTally {
    /// True when the pass found any new match on any pattern.
    pub fn has_new_matches(&self) -> bool {
        self.new_matches.values().any(|&n| n > 0)
    }
}

const PREVIEW_CHARS: usize = 80;

/// Folds messages into per-day counters.
pub struct DailyAggregator {
    rule: RoleCount,
    flagship: Option<String>,
    tally: ScanTally,
}

impl DailyAggregator {
    /// Create an aggregator with the given role-counting rule and optional
    /// flagship pattern for per-project tallies.
    pub fn new(rule: RoleCount, flagship: Option<String>) -> Self {
        Self {
            rule,
            flagship,
            tally: ScanTally::default(),
        }
    }

    /// Record one never-before-seen message and its matched pattern set.
    ///
    /// Each matched pattern increments that day's counter by exactly one;
    /// the role rule decides total_messages independently of whether
    /// anything matched.
    pub fn record(&mut self, message: &Message, matched: &[&str], batch: &mut FileBatch) {
        batch.ids.push(message.id.clone());

        let day_delta = batch.days.entry(message.day).or_default();
        let tally_delta = self.tally.days.entry(message.day).or_default();

        if self.rule.counts(message.role) {
            day_delta.total_messages += 1;
            tally_delta.total_messages += 1;
            self.tally.messages_counted += 1;
        }

        if matched.is_empty() {
            return;
        }

        for name in matched {
            *day_delta.patterns.entry(name.to_string()).or_insert(0) += 1;
            *tally_delta.patterns.entry(name.to_string()).or_insert(0) += 1;
            *self.tally.new_matches.entry(name.to_string()).or_insert(0) += 1;

            if self.flagship.as_deref() == Some(*name) {
                *batch.projects.entry(message.project.clone()).or_insert(0) += 1;
                *self
                    .tally
                    .projects
                    .entry(message.project.clone())
                    .or_insert(0) += 1;
            }
        }

        self.tally.events.push(MatchEvent {
            project: message.project.clone(),
            patterns: matched.iter().map(|n| n.to_string()).collect(),
            preview: preview(&message.body),
        });
    }

    /// Mutable access to file-level counters.
    pub fn tally_mut(&mut self) -> &mut ScanTally {
        &mut self.tally
    }

    /// Finish the pass and hand back the tally.
    pub fn finish(self) -> ScanTally {
        self.tally
    }
}

/// Trim a body down to a single-line preview.
fn preview(body: &str) -> String {
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        let mut out: String = flat.chars().take(PREVIEW_CHARS).collect();
        out.push('…');
        out
    }
}
