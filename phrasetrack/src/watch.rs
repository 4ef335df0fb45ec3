//! phrasetrack-watch - continuous transcript watcher
//!
//! Polls the session logs every few seconds, counts new matches as they
//! appear, and pushes the touched days' cumulative counts to the counting
//! service without prompting (it runs unattended). Upload failures only
//! make the remote view stale; local counts keep advancing and catch up
//! on a later pass.

use anyhow::{Context, Result};
use clap::Parser;
use phrasetrack_core::{upload, Config, Error, Ledger, ScanDriver, ScanTally, UploadClient};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "phrasetrack-watch")]
#[command(about = "Continuously watch session logs for tracked phrases")]
#[command(version)]
struct Args {
    /// Counting service URL to upload to
    #[arg(long, value_name = "URL")]
    upload: Option<String>,

    /// Shared write secret for the counting service
    #[arg(long)]
    secret: Option<String>,

    /// Override the stable source id for this installation
    #[arg(long)]
    source_id: Option<String>,

    /// Poll interval in seconds (overrides config)
    #[arg(long)]
    poll: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();
    let mut config = Config::load().context("failed to load configuration")?;

    if let Some(url) = &args.upload {
        config.upload.enabled = true;
        config.upload.server_url = Some(url.clone());
    }
    if let Some(secret) = &args.secret {
        config.upload.secret = Some(secret.clone());
    }
    if let Some(source_id) = &args.source_id {
        config.upload.source_id = Some(source_id.clone());
    }
    if let Some(poll) = args.poll {
        config.scan.poll_interval_secs = poll;
    }

    let _log_guard =
        phrasetrack_core::logging::init(&config.logging).context("failed to initialize logging")?;
    tracing::info!("phrasetrack-watch starting");

    let ledger = Ledger::open(&Config::ledger_path()).context("failed to open local store")?;
    ledger.migrate().context("failed to run store migrations")?;

    let patterns = config.pattern_set().context("invalid pattern rules")?;
    let root = config.scan.resolve_projects_dir();

    if !root.exists() {
        anyhow::bail!(
            "projects directory not found at {} (set CLAUDE_PROJECTS or [scan].projects_dir)",
            root.display()
        );
    }

    let source_id = match config.upload.source_id.clone() {
        Some(id) => id,
        None => upload::load_or_create_source_id(&Config::data_dir())
            .context("failed to resolve source id")?,
    };
    let client = UploadClient::new(&config.upload, source_id)?;

    println!("Phrase Watcher");
    println!("{}", "=".repeat(50));
    println!("Watching: {}", root.display());
    println!("Store:    {}", Config::ledger_path().display());
    println!("Tracking patterns:");
    for pattern in patterns.iter() {
        println!("  {}: {}", pattern.name, pattern.regex.as_str());
    }
    if let Some(ref client) = client {
        println!("Uploading to {} as '{}'", client.base_url(), client.source_id());
    }
    println!("{}", "-".repeat(50));

    // Push the current state once at startup so a restarted watcher
    // refreshes the remote view immediately.
    let mut uploads_enabled = client.is_some();
    if let Some(ref client) = client {
        let today = chrono::Local::now().date_naive();
        match upload_day(&ledger, client, today) {
            Ok(()) => println!("Uploaded today's counts"),
            Err(Error::Unauthorized) => {
                println!("Upload rejected: check the shared secret. Uploads disabled.");
                uploads_enabled = false;
            }
            Err(e) => println!("Startup upload failed (will retry): {}", e),
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    let driver = ScanDriver::new(
        root,
        patterns,
        &ledger,
        config.scan.count_role,
        config.scan.project_pattern.clone(),
    );

    let interval = Duration::from_secs(config.scan.poll_interval_secs.max(1));
    println!(
        "Polling every {}s. Press Ctrl+C to stop.",
        interval.as_secs()
    );

    driver.watch(interval, &running, |tally| {
        report_pass(tally);

        if let Some(client) = client.as_ref().filter(|_| uploads_enabled && !tally.days.is_empty()) {
            for day in tally.days.keys() {
                match upload_day(&ledger, client, *day) {
                    Ok(()) => tracing::debug!(day = %day, "Uploaded day"),
                    Err(Error::Unauthorized) => {
                        println!("Upload rejected: check the shared secret. Uploads disabled.");
                        uploads_enabled = false;
                        break;
                    }
                    Err(e) => {
                        // Stale but not wrong: the next pass resends the
                        // cumulative counts.
                        tracing::warn!(day = %day, error = %e, "Upload failed, will retry");
                    }
                }
            }
        }
    })?;

    println!("{}", "-".repeat(50));
    for (name, total) in ledger.pattern_totals()? {
        println!("Final '{}' count: {}", name, total);
    }
    let projects = ledger.project_counts()?;
    if !projects.is_empty() {
        println!("Top projects:");
        for (project, count) in projects.iter().take(5) {
            println!("  {}: {}", project, count);
        }
    }

    tracing::info!("phrasetrack-watch stopped");
    Ok(())
}

/// Print notifications for one pass's new matches.
fn report_pass(tally: &ScanTally) {
    if !tally.has_new_matches() {
        return;
    }

    let now = chrono::Local::now().format("%H:%M:%S").to_string();
    for event in &tally.events {
        if event.patterns.is_empty() {
            continue;
        }
        let names = event
            .patterns
            .iter()
            .map(|n| n.to_uppercase())
            .collect::<Vec<_>>()
            .join(", ");
        println!("[{}] {} in {}: {}", now, names, event.project, event.preview);
    }

    let updates = tally
        .new_matches
        .iter()
        .map(|(name, count)| format!("{}: +{}", name, count))
        .collect::<Vec<_>>()
        .join(", ");
    println!("Updated: {}", updates);
}

/// Send one day's cumulative counts.
fn upload_day(ledger: &Ledger, client: &UploadClient, day: chrono::NaiveDate) -> Result<(), Error> {
    let counts = ledger.day_counts(day)?;
    if counts.is_empty() {
        return Ok(());
    }
    client.set_day(day, &counts)
}
