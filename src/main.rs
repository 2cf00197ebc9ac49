use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

use feedstage::config::{default_config_path, Config};
use feedstage::feed::{build_client, SourceOutcome, Stager, SyncReport, Syncer};
use feedstage::launcher::{LaunchRequest, LaunchTarget, Launcher, ProcessLauncher};
use feedstage::storage::{Database, DatabaseError};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Exit status for a sync pass cut short by SIGINT/SIGTERM.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "feedstage", about = "Headless RSS/Atom sync engine", version)]
struct Args {
    /// Config file (default: ~/.config/feedstage/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch every registered source once and store new entries
    Sync {
        /// Print the per-source report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored feeds
    Feeds {
        #[arg(long)]
        json: bool,
    },
    /// List the entries of one feed
    Entries {
        feed_id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Print an entry and mark it read
    Read { entry_id: i64 },
    /// Open an entry's link in the browser (or the media player)
    Open {
        entry_id: i64,
        #[arg(long)]
        player: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let home = std::env::var_os("HOME").map(PathBuf::from);

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path(
            home.as_deref()
                .context("HOME environment variable not set; pass --config")?,
        ),
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    config.apply_env_overrides();

    let paths = config
        .paths(home.as_deref())
        .context("Failed to resolve data paths")?;
    std::fs::create_dir_all(&paths.data_dir).with_context(|| {
        format!(
            "Failed to create data directory {}",
            paths.data_dir.display()
        )
    })?;

    let db_path = paths
        .db_file
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            anyhow::bail!("Another feedstage process appears to be using the database");
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    match args.command {
        Command::Sync { json } => {
            let sources = config.sources();
            if sources.is_empty() {
                anyhow::bail!("No URLs in configuration ({})", config_path.display());
            }

            let client = build_client().context("Failed to build HTTP client")?;
            let stager = Stager::new(client, &paths.staging_dir)
                .with_max_bytes(config.sync.max_feed_bytes);
            let syncer = Syncer::new(db, stager, config.sync_options());
            syncer
                .check_dedup_strategy()
                .await
                .context("Change [sync] dedup back or start a new database")?;

            let cancel = CancellationToken::new();
            spawn_signal_handler(cancel.clone())?;

            let report = syncer.sync(&sources, &cancel).await;
            print_report(&report, json)?;

            if report.interrupted {
                Ok(ExitCode::from(EXIT_INTERRUPTED))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Command::Feeds { json } => {
            let feeds = db.list_feeds().await.context("Failed to load feeds")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&feeds)?);
            } else {
                for feed in feeds {
                    println!("{}\t{}\t{}", feed.id, feed.title, feed.url);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Entries { feed_id, json } => {
            let entries = db
                .list_entries(feed_id)
                .await
                .context("Failed to load entries")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in entries {
                    let marker = if entry.read { " " } else { "*" };
                    println!("{}\t{}\t{}", entry.id, marker, entry.title);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Read { entry_id } => {
            let entry = db
                .get_entry(entry_id)
                .await
                .context("Failed to load entry")?
                .ok_or_else(|| anyhow::anyhow!("Entry {} not found", entry_id))?;

            println!("{}", entry.title);
            if let Some(url) = &entry.url {
                println!("{}", url);
            }
            println!();
            let body = if entry.content.is_empty() {
                &entry.description
            } else {
                &entry.content
            };
            println!("{}", body);

            db.mark_read(entry_id)
                .await
                .context("Failed to mark entry read")?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Open { entry_id, player } => {
            let target = if player {
                LaunchTarget::Player
            } else {
                LaunchTarget::Browser
            };
            let request =
                LaunchRequest::for_entry(&db, entry_id, target, config.program_for(target))
                    .await?;
            ProcessLauncher.launch(&request)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Cancels `cancel` on the first SIGINT or SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = sigterm.recv();
        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate => {}
        }

        tracing::warn!("Interrupt received, cancelling sync");
        cancel.cancel();
    });

    Ok(())
}

fn print_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for r in &report.sources {
        let status = match &r.outcome {
            SourceOutcome::Staged { new_entries, .. } => format!("{} new", new_entries),
            SourceOutcome::NotModified => "not modified".to_string(),
            SourceOutcome::FetchFailed { error } => format!("fetch failed: {}", error),
            SourceOutcome::ParseFailed { error } => format!("parse failed: {}", error),
            SourceOutcome::StoreFailed { error } => format!("store failed: {}", error),
            SourceOutcome::Cancelled => "cancelled".to_string(),
        };
        println!("{}\t{}", r.source, status);
    }

    println!(
        "{} sources, {} new entries, {} failed{}",
        report.sources.len(),
        report.new_entries(),
        report.failures(),
        if report.interrupted { " (interrupted)" } else { "" }
    );
    Ok(())
}
