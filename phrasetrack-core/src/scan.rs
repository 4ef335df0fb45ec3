//! Scan driver
//!
//! Orchestrates one pass (batch/backfill) or a continuous poll loop
//! (watch) over the per-project session logs under a root directory:
//!
//! ```text
//! log files -> MessageStream -> ledger filter -> PatternSet -> aggregator
//! ```
//!
//! One file is fully drained before the next begins; nothing runs
//! concurrently within a pass. Each file's contribution is committed to
//! the ledger as one transaction, so cancellation between files (or
//! between passes) never leaves a message half-counted.

use crate::aggregate::{DailyAggregator, FileBatch, RoleCount, ScanTally};
use crate::error::Result;
use crate::extract::MessageStream;
use crate::ledger::Ledger;
use crate::patterns::PatternSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Drives scans over a directory tree of session logs.
pub struct ScanDriver<'a> {
    root: PathBuf,
    patterns: PatternSet,
    ledger: &'a Ledger,
    rule: RoleCount,
    flagship: Option<String>,
}

impl<'a> ScanDriver<'a> {
    /// Create a driver rooted at the given log directory.
    pub fn new(
        root: PathBuf,
        patterns: PatternSet,
        ledger: &'a Ledger,
        rule: RoleCount,
        flagship: Option<String>,
    ) -> Self {
        Self {
            root,
            patterns,
            ledger,
            rule,
            flagship,
        }
    }

    /// The configured log root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Discover every session log under the root, one level of per-project
    /// directories deep. Hidden directories are skipped. Order is
    /// unspecified, but each file appears exactly once.
    pub fn discover_files(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.root.join("*/*.jsonl");
        let pattern_str = pattern.to_string_lossy();

        let entries = glob::glob(&pattern_str)
            .map_err(|e| crate::error::Error::Config(format!("invalid glob pattern: {}", e)))?;

        let files = entries
            .flatten()
            .filter(|path| {
                let hidden_parent = path
                    .parent()
                    .and_then(|p| p.file_name())
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with('.'))
                    .unwrap_or(false);
                !hidden_parent
            })
            .collect();

        Ok(files)
    }

    /// Run one full scan pass.
    pub fn scan_once(&self) -> Result<ScanTally> {
        self.scan_once_with_progress(|_, _, _| {})
    }

    /// Run one full scan pass with a progress callback.
    ///
    /// The callback receives `(current_file_index, total_files, file_path)`
    /// before each file is processed.
    pub fn scan_once_with_progress<F>(&self, mut on_progress: F) -> Result<ScanTally>
    where
        F: FnMut(usize, usize, &Path),
    {
        let files = self.discover_files()?;
        let total = files.len();

        let mut aggregator = DailyAggregator::new(self.rule, self.flagship.clone());

        for (i, path) in files.iter().enumerate() {
            on_progress(i, total, path);
            self.scan_file(path, &mut aggregator)?;
        }

        let mut tally = aggregator.finish();
        tally.files_scanned = total;
        Ok(tally)
    }

    /// Scan one file: filter through the ledger, match, aggregate, and
    /// commit the file's batch in one transaction.
    ///
    /// An unreadable file is recorded and skipped; a ledger write failure
    /// is fatal to the pass.
    fn scan_file(&self, path: &Path, aggregator: &mut DailyAggregator) -> Result<()> {
        let stream = match MessageStream::open(path) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                aggregator
                    .tally_mut()
                    .unreadable_files
                    .push((path.to_path_buf(), e.to_string()));
                return Ok(());
            }
        };

        let mut batch = FileBatch::default();

        for message in stream {
            if self.ledger.seen(&message.id)? {
                continue;
            }
            // A message can reappear within one pass (duplicate id later in
            // the same file, or across files) before it is committed.
            if batch.ids.iter().any(|id| id == &message.id) {
                continue;
            }

            let matched = if message.role == crate::extract::Role::Assistant {
                self.patterns.matches(&message.body)
            } else {
                Vec::new()
            };

            aggregator.record(&message, &matched, &mut batch);
        }

        if !batch.is_empty() {
            aggregator.tally_mut().files_with_new += 1;
        }
        self.ledger.commit(&batch)?;
        Ok(())
    }

    /// Run the continuous poll loop until `running` clears.
    ///
    /// Each pass is followed by the `on_pass` callback (upload, printing)
    /// and then the poll interval. Cancellation is honored only between
    /// passes; a pass in flight always completes.
    pub fn watch<F>(
        &self,
        interval: Duration,
        running: &AtomicBool,
        mut on_pass: F,
    ) -> Result<()>
    where
        F: FnMut(&ScanTally),
    {
        while running.load(Ordering::SeqCst) {
            let tally = self.scan_once()?;
            on_pass(&tally);

            if !running.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(interval);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_log(root: &Path, project: &str, file: &str, lines: &[String]) {
        let dir = root.join(project);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), lines.join("\n") + "\n").unwrap();
    }

    fn assistant_line(id: &str, ts: &str, text: &str) -> String {
        format!(
            r#"{{"type":"assistant","uuid":"{}","timestamp":"{}","message":{{"content":[{{"type":"text","text":"{}"}}]}}}}"#,
            id, ts, text
        )
    }

    fn driver<'a>(root: &Path, ledger: &'a Ledger) -> ScanDriver<'a> {
        let config = crate::config::Config::default();
        ScanDriver::new(
            root.to_path_buf(),
            config.pattern_set().unwrap(),
            ledger,
            RoleCount::Assistant,
            Some("absolutely".to_string()),
        )
    }

    #[test]
    fn test_discover_skips_hidden_dirs() {
        let tmp = TempDir::new().unwrap();
        write_log(
            tmp.path(),
            "-home-u-proj",
            "a.jsonl",
            &[assistant_line("m1", "2025-01-01T12:00:00Z", "hi")],
        );
        write_log(
            tmp.path(),
            ".hidden",
            "b.jsonl",
            &[assistant_line("m2", "2025-01-01T12:00:00Z", "hi")],
        );

        let ledger = Ledger::open_in_memory().unwrap();
        ledger.migrate().unwrap();
        let driver = driver(tmp.path(), &ledger);

        let files = driver.discover_files().unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("-home-u-proj/a.jsonl"));
    }

    #[test]
    fn test_duplicate_id_within_one_pass() {
        let tmp = TempDir::new().unwrap();
        write_log(
            tmp.path(),
            "-home-u-proj",
            "a.jsonl",
            &[
                assistant_line("m1", "2025-01-01T12:00:00Z", "Perfect!"),
                assistant_line("m1", "2025-01-01T12:05:00Z", "Perfect!"),
            ],
        );

        let ledger = Ledger::open_in_memory().unwrap();
        ledger.migrate().unwrap();
        let driver = driver(tmp.path(), &ledger);

        let tally = driver.scan_once().unwrap();
        assert_eq!(tally.new_matches["perfect"], 1);
        assert_eq!(tally.messages_counted, 1);
    }

    #[test]
    fn test_unreadable_file_recorded_and_skipped() {
        let tmp = TempDir::new().unwrap();
        write_log(
            tmp.path(),
            "-home-u-proj",
            "a.jsonl",
            &[assistant_line("m1", "2025-01-01T12:00:00Z", "Perfect!")],
        );
        // A directory matching the glob cannot be opened as a file
        fs::create_dir_all(tmp.path().join("-home-u-proj").join("not-a-file.jsonl")).unwrap();

        let ledger = Ledger::open_in_memory().unwrap();
        ledger.migrate().unwrap();
        let driver = driver(tmp.path(), &ledger);

        let tally = driver.scan_once().unwrap();
        assert_eq!(tally.unreadable_files.len(), 1);
        assert_eq!(tally.new_matches["perfect"], 1);
    }
}
