//! # phrasetrack-core
//!
//! Core library for phrasetrack - a tracker for recurring phrases in AI
//! coding assistant transcripts.
//!
//! This library provides:
//! - A streaming extractor for JSONL session logs
//! - Named pattern rules matched once per message
//! - A durable dedup ledger so rescans never double-count
//! - Per-day, per-source aggregation and the scan driver around it all
//! - An upload client for the counting service
//!
//! ## Example
//!
//! ```rust,no_run
//! use phrasetrack_core::{Config, Ledger, RoleCount, ScanDriver};
//!
//! let config = Config::load().expect("failed to load config");
//! let ledger = Ledger::open(&Config::ledger_path()).expect("failed to open store");
//! ledger.migrate().expect("failed to run migrations");
//!
//! let driver = ScanDriver::new(
//!     config.scan.resolve_projects_dir(),
//!     config.pattern_set().expect("invalid patterns"),
//!     &ledger,
//!     config.scan.count_role,
//!     config.scan.project_pattern.clone(),
//! );
//! let tally = driver.scan_once().expect("scan failed");
//! println!("{} new matches", tally.new_matches.values().sum::<u64>());
//! ```

// Re-export commonly used items at the crate root
pub use aggregate::{DailyAggregator, DayDelta, FileBatch, MatchEvent, RoleCount, ScanTally};
pub use config::Config;
pub use error::{Error, Result};
pub use extract::{Message, MessageStream, Role};
pub use ledger::{DayCounts, Ledger};
pub use patterns::PatternSet;
pub use scan::ScanDriver;
pub use upload::UploadClient;

// Public modules
pub mod aggregate;
pub mod config;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod logging;
pub mod patterns;
pub mod scan;
pub mod upload;
