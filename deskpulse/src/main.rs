//! deskpulse - desktop activity tracker
//!
//! Turns focus-change events into timed sessions, keeps them in a local
//! SQLite log and uploads them to the activity collector.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/deskpulse/data.db (~/.local/share/deskpulse/data.db)
//! - Logs: $XDG_STATE_HOME/deskpulse/deskpulse.<date>.log
//! - Config: $XDG_CONFIG_HOME/deskpulse/config.toml (~/.config/deskpulse/config.toml)

mod process_lock;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deskpulse_core::collector::{AccountSync, ActivityClient, SyncEngine, TickOutcome};
use deskpulse_core::format::format_api_timestamp;
use deskpulse_core::logging::redact_token;
use deskpulse_core::{service, Config, Database, RawEvent};
use indicatif::{ProgressBar, ProgressStyle};
use process_lock::acquire_owner_guard;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Raw events buffered between the reader thread and the recorder
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(name = "deskpulse")]
#[command(about = "Track focused applications and sync them to the activity collector")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record focus events and upload sessions in the background
    Run {
        /// Read events from this file instead of stdin (one JSON object per line)
        #[arg(long)]
        events: Option<PathBuf>,
    },

    /// Upload pending sessions now and refresh account settings
    Sync,

    /// Show configuration and sync status
    Status,

    /// Store the API token used for uploads
    Login {
        /// API token from the account settings page
        token: String,
    },

    /// Remove the stored API token
    Logout,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        deskpulse_core::logging::init(&config.logging).context("failed to initialize logging")?;

    match args.command {
        Command::Run { events } => cmd_run(&config, events),
        Command::Sync => cmd_sync(&config),
        Command::Status => cmd_status(&config),
        Command::Login { token } => cmd_login(&token),
        Command::Logout => cmd_logout(),
    }
}

fn open_database() -> Result<Database> {
    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;
    Ok(db)
}

fn cmd_run(config: &Config, events: Option<PathBuf>) -> Result<()> {
    let _owner = acquire_owner_guard(&Config::database_path())
        .context("failed to acquire process lock")?;
    let db = Arc::new(open_database()?);
    let api = ActivityClient::new(&config.api).context("failed to create collector client")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        let _ = shutdown_tx.send(true);
    })
    .context("failed to set Ctrl+C handler")?;

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let source: Box<dyn BufRead + Send> = match &events {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(path)
                .with_context(|| format!("failed to open events file {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };
    // Blocking reads stay off the runtime; the service sees end of input as a closed channel
    thread::spawn(move || read_events(source, tx));

    match &events {
        Some(path) => println!("Reading events from {}", path.display()),
        None => println!("Reading events from stdin. Press Ctrl+C to stop."),
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let summary = runtime
        .block_on(service::run(db, api, config, rx, shutdown_rx))
        .context("service failed")?;

    println!();
    println!("Stopped:");
    println!("  Events received:   {}", summary.events);
    println!("  Sessions saved:    {}", summary.sessions_saved);
    if summary.sessions_unsaved > 0 {
        println!("  Sessions unsaved:  {}", summary.sessions_unsaved);
    }
    println!("  Batches uploaded:  {}", summary.sync.batches_sent);
    println!("  Entries uploaded:  {}", summary.sync.entries_sent);
    Ok(())
}

/// Parse JSON lines into raw events until input ends or the receiver goes away.
fn read_events(source: Box<dyn BufRead + Send>, tx: mpsc::Sender<RawEvent>) {
    for (index, line) in source.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read event input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RawEvent>(&line) {
            Ok(event) => {
                if tx.blocking_send(event).is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!(line = index + 1, error = %e, "Skipping malformed event"),
        }
    }
}

fn cmd_sync(config: &Config) -> Result<()> {
    let _owner = acquire_owner_guard(&Config::database_path())
        .context("failed to acquire process lock")?;
    let db = Arc::new(open_database()?);

    if db.api_token()?.map_or(true, |t| t.trim().is_empty()) {
        println!("No API token set. Run `deskpulse login <TOKEN>` first.");
        return Ok(());
    }

    let api = ActivityClient::new(&config.api).context("failed to create collector client")?;
    let engine = SyncEngine::new(api, db.clone(), config.api.service.clone(), &config.sync);
    let account = AccountSync::new(db);

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message("Uploading sessions...");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let (last, account_report) = runtime.block_on(async {
        let mut report = engine.tick().await;
        while report.follow_up {
            pb.set_message(format!("Uploading sessions... ({} sent)", engine.stats().entries_sent));
            report = engine.tick().await;
        }
        pb.set_message("Refreshing account settings...");
        let account_report = account.refresh(engine.api()).await;
        (report, account_report)
    });

    pb.finish_and_clear();

    let stats = engine.stats();
    println!("Sync complete:");
    println!("  Batches uploaded:  {}", stats.batches_sent);
    println!("  Entries uploaded:  {}", stats.entries_sent);
    match &last.outcome {
        TickOutcome::NothingPending => println!("  Nothing pending"),
        TickOutcome::IdleSuppressed => println!("  Holding back a lone idle session"),
        TickOutcome::Uploaded { cursor, .. } => {
            println!("  Synced up to:      {}", format_api_timestamp(*cursor))
        }
        _ => {}
    }
    for error in &account_report.errors {
        println!("  Warning: {}", error);
    }

    tracing::info!(
        batches = stats.batches_sent,
        entries = stats.entries_sent,
        "deskpulse sync complete"
    );

    if let TickOutcome::Failed { reason } = last.outcome {
        anyhow::bail!("upload failed: {}", reason);
    }
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("deskpulse Status");
    println!("================");
    println!();
    println!("Config:          {}", Config::config_path().display());
    println!("Collector:       {}", config.api.base_url);
    println!("Service:         {}", config.api.service);
    println!("Sync Interval:   {}s", config.sync.interval_secs);
    println!("Batch Size:      {}", config.sync.max_batch);
    println!();

    let db_path = Config::database_path();
    println!("Database:        {}", db_path.display());
    if !db_path.exists() {
        println!("API Token:       <not set>");
        println!();
        println!("No sessions recorded yet.");
        return Ok(());
    }

    let db = open_database()?;
    println!(
        "API Token:       {}",
        match db.api_token()? {
            Some(token) if !token.trim().is_empty() => redact_token(&token),
            _ => "<not set>".to_string(),
        }
    );
    match db.account_ids()? {
        Some(ids) => println!(
            "Account:         user {} (group {}, root {})",
            ids.user_id, ids.primary_group_id, ids.root_group_id
        ),
        None => println!("Account:         <not fetched>"),
    }

    let cursor = db.sync_cursor()?;
    let pending = db.count_sessions_since(cursor)?;
    let total = db.count_sessions()?;
    let backlog = db.backlog_state()?;
    let policy = db.activity_policy()?;

    println!();
    if cursor > 0 {
        println!("Synced Up To:    {}", format_api_timestamp(cursor));
    } else {
        println!("Synced Up To:    <never>");
    }
    println!("Sessions:        {}", total);
    println!("Pending:         {}", pending);
    println!(
        "Backlog:         {} ({} follow-ups)",
        if backlog.last_batch_was_full {
            "draining"
        } else {
            "clear"
        },
        backlog.consecutive_full_batch_count
    );
    println!(
        "Policies:        activity {}, window titles {}",
        on_off(policy.collect_activity),
        on_off(policy.collect_window_titles)
    );

    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

fn cmd_login(token: &str) -> Result<()> {
    let token = token.trim();
    if token.is_empty() {
        anyhow::bail!("API token must not be empty");
    }

    let db = open_database()?;
    db.set_api_token(token).context("failed to store API token")?;
    tracing::info!(token = %redact_token(token), "API token stored");
    println!("API token saved ({})", redact_token(token));
    Ok(())
}

fn cmd_logout() -> Result<()> {
    let db = open_database()?;
    db.clear_api_token().context("failed to remove API token")?;
    tracing::info!("API token removed");
    println!("API token removed");
    Ok(())
}
