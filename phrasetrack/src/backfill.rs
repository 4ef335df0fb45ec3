//! phrasetrack-backfill - one-shot historical scan
//!
//! Scans every session log under the configured root, folds new matches
//! into the local store, and prints per-day counts. With `--upload`, asks
//! for confirmation and then pushes each day's cumulative counts to the
//! counting service; it never uploads silently.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use phrasetrack_core::{upload, Config, Error, Ledger, ScanDriver, UploadClient};
use std::io::{BufRead, Write};

#[derive(Parser)]
#[command(name = "phrasetrack-backfill")]
#[command(about = "Scan all historical session logs and count tracked phrases")]
#[command(version)]
struct Args {
    /// Counting service URL to upload to (asks for confirmation first)
    #[arg(long, value_name = "URL")]
    upload: Option<String>,

    /// Shared write secret for the counting service
    #[arg(long)]
    secret: Option<String>,

    /// Override the stable source id for this installation
    #[arg(long)]
    source_id: Option<String>,

    /// Skip the upload confirmation prompt
    #[arg(short = 'y', long)]
    yes: bool,

    /// Machine-readable JSON output (implies no upload prompt)
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();
    let mut config = Config::load().context("failed to load configuration")?;

    // CLI flags take precedence over the config file
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

    let _log_guard =
        phrasetrack_core::logging::init(&config.logging).context("failed to initialize logging")?;
    tracing::info!("phrasetrack-backfill starting");

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

    if !args.json {
        println!("Scanning {}", root.display());
    }

    let driver = ScanDriver::new(
        root,
        patterns,
        &ledger,
        config.scan.count_role,
        config.scan.project_pattern.clone(),
    );

    let pb = if args.json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    let tally = driver
        .scan_once_with_progress(|current, total, path| {
            if current == 0 {
                pb.set_length(total as u64);
            }
            pb.set_position(current as u64);
            pb.set_message(
                path.file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("...")
                    .to_string(),
            );
        })
        .context("scan failed")?;
    pb.finish_and_clear();

    tracing::info!(
        files_scanned = tally.files_scanned,
        new_matches = tally.new_matches.values().sum::<u64>(),
        messages_counted = tally.messages_counted,
        "Backfill scan complete"
    );

    if args.json {
        print_json(&ledger)?;
        return Ok(());
    }

    print_report(&ledger, &tally)?;

    // Upload only with explicit confirmation
    let source_id = match config.upload.source_id.clone() {
        Some(id) => id,
        None => upload::load_or_create_source_id(&Config::data_dir())
            .context("failed to resolve source id")?,
    };
    if let Some(client) = UploadClient::new(&config.upload, source_id)? {
        upload_all(&ledger, &client, args.yes)?;
    }

    Ok(())
}

fn print_report(ledger: &Ledger, tally: &phrasetrack_core::ScanTally) -> Result<()> {
    let days = ledger.days_with_data()?;

    println!();
    println!("Daily counts:");
    println!("{}", "-".repeat(50));
    for day in &days {
        let counts = ledger.day_counts(*day)?;
        let patterns = counts
            .patterns
            .iter()
            .map(|(name, count)| format!("{}={}", name, count))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{}: {} (total_messages={})",
            day, patterns, counts.total_messages
        );
    }

    println!("{}", "-".repeat(50));
    for (name, total) in ledger.pattern_totals()? {
        println!("Total '{}': {}", name, total);
    }
    println!("Messages on record: {}", ledger.seen_count()?);

    if !tally.unreadable_files.is_empty() {
        println!();
        println!("Skipped {} unreadable file(s):", tally.unreadable_files.len());
        for (path, err) in &tally.unreadable_files {
            println!("  {}: {}", path.display(), err);
        }
    }

    Ok(())
}

fn print_json(ledger: &Ledger) -> Result<()> {
    let mut days = serde_json::Map::new();
    for day in ledger.days_with_data()? {
        let counts = ledger.day_counts(day)?;
        let mut entry = serde_json::Map::new();
        for (name, count) in &counts.patterns {
            entry.insert(name.clone(), serde_json::Value::from(*count));
        }
        entry.insert(
            "total_messages".to_string(),
            serde_json::Value::from(counts.total_messages),
        );
        days.insert(day.to_string(), serde_json::Value::Object(entry));
    }

    let output = serde_json::json!({
        "days": days,
        "totals": ledger.pattern_totals()?,
        "messages_on_record": ledger.seen_count()?,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn upload_all(ledger: &Ledger, client: &UploadClient, assume_yes: bool) -> Result<()> {
    let days = ledger.days_with_data()?;
    if days.is_empty() {
        println!("\nNothing to upload.");
        return Ok(());
    }

    if !assume_yes {
        print!(
            "\nUpload {} day(s) to {}? [y/N] ",
            days.len(),
            client.base_url()
        );
        std::io::stdout().flush()?;

        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            println!("Upload skipped.");
            return Ok(());
        }
    }

    println!("Uploading as source '{}'...", client.source_id());
    let mut uploaded = 0usize;
    let mut failed = 0usize;

    for day in days {
        let counts = ledger.day_counts(day)?;
        if counts.is_empty() {
            continue;
        }

        match client.set_day(day, &counts) {
            Ok(()) => {
                println!("  {} ✓", day);
                uploaded += 1;
            }
            Err(Error::Unauthorized) => {
                println!("  {} ✗ rejected", day);
                anyhow::bail!("upload rejected: check the shared secret and try again");
            }
            Err(e) => {
                println!("  {} ✗ {}", day, e);
                tracing::warn!(day = %day, error = %e, "Upload failed");
                failed += 1;
            }
        }
    }

    println!("{}", "-".repeat(50));
    println!("Upload complete: {} successful, {} failed", uploaded, failed);
    if failed > 0 {
        println!("Failed days keep their local counts; re-run to retry.");
    }

    Ok(())
}
