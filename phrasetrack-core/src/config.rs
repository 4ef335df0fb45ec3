//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/phrasetrack/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/phrasetrack/` (~/.config/phrasetrack/)
//! - Data: `$XDG_DATA_HOME/phrasetrack/` (~/.local/share/phrasetrack/)
//! - State/Logs: `$XDG_STATE_HOME/phrasetrack/` (~/.local/state/phrasetrack/)

use crate::aggregate::RoleCount;
use crate::error::{Error, Result};
use crate::patterns::PatternSet;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Default pattern rules, reproducing the canonical tracked phrases.
const DEFAULT_PATTERNS: &[(&str, &str)] = &[
    ("absolutely", r"You(?:'re| are) absolutely right"),
    ("right", r"You(?:'re| are) right"),
    ("perfect", r"Perfect!"),
    ("excellent", r"Excellent!"),
];

/// Main configuration struct
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scan configuration
    pub scan: ScanConfig,

    /// Pattern name -> regex rule. Replaces the default set wholesale
    /// when present in the config file.
    pub patterns: BTreeMap<String, String>,

    /// Upload configuration (optional)
    pub upload: UploadConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan: ScanConfig::default(),
            patterns: default_patterns(),
            upload: UploadConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_patterns() -> BTreeMap<String, String> {
    DEFAULT_PATTERNS
        .iter()
        .map(|(name, rule)| (name.to_string(), rule.to_string()))
        .collect()
}

/// Scan driver configuration
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Root directory of conversation logs. Falls back to the
    /// CLAUDE_PROJECTS environment variable, then ~/.claude/projects.
    pub projects_dir: Option<PathBuf>,

    /// Seconds between watch-mode passes
    pub poll_interval_secs: u64,

    /// Which role increments the per-day total_messages counter
    pub count_role: RoleCount,

    /// Pattern whose matches are also tallied per project
    pub project_pattern: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            projects_dir: None,
            poll_interval_secs: 2,
            count_role: RoleCount::Assistant,
            project_pattern: Some("absolutely".to_string()),
        }
    }
}

impl ScanConfig {
    /// Resolve the log root: config value, then $CLAUDE_PROJECTS, then
    /// ~/.claude/projects.
    pub fn resolve_projects_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.projects_dir {
            return dir.clone();
        }
        if let Some(dir) = std::env::var_os("CLAUDE_PROJECTS") {
            return PathBuf::from(dir);
        }
        home_dir().join(".claude/projects")
    }
}

/// Counting-service upload configuration
///
/// When enabled, scan passes push each day's cumulative counts to the
/// counting service in addition to storing them locally.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UploadConfig {
    /// Enable/disable uploads
    pub enabled: bool,

    /// Counting service URL (e.g., `https://phrasetrack.example.com`)
    pub server_url: Option<String>,

    /// Stable source identifier. Generated once and persisted in the
    /// data directory when not set.
    pub source_id: Option<String>,

    /// Shared write secret
    pub secret: Option<String>,

    /// HTTP request timeout in seconds
    pub timeout_secs: u64,

    /// Max retry attempts for transient failures
    pub max_retries: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: None,
            source_id: None,
            secret: None,
            timeout_secs: 5,
            max_retries: 3,
        }
    }
}

impl UploadConfig {
    /// Check if uploads are properly configured and enabled
    pub fn is_ready(&self) -> bool {
        self.enabled && self.server_url.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.server_url.is_none() {
            return Err(Error::Config(
                "upload.server_url is required when upload is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Compile the configured pattern rules into a matcher.
    pub fn pattern_set(&self) -> Result<PatternSet> {
        PatternSet::compile(&self.patterns)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/phrasetrack/config.toml`
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("phrasetrack").join("config.toml")
    }

    /// Returns the data directory path (for the local store)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("phrasetrack")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("phrasetrack")
    }

    /// Returns the local store file path
    pub fn ledger_path() -> PathBuf {
        Self::data_dir().join("phrasetrack.db")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("phrasetrack.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
