use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use feedpoll::config::Config;
use feedpoll::feed::Fetcher;
use feedpoll::scraper::Scheduler;
use feedpoll::storage::{Database, DatabaseError};

/// Get the config directory path (~/.config/feedpoll/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedpoll"))
}

#[derive(Parser, Debug)]
#[command(name = "feedpoll", about = "Poll RSS feeds and store new entries in SQLite")]
struct Args {
    /// Config file (default: ~/.config/feedpoll/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database file, overrides `database_path`
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Sources fetched per cycle, overrides `concurrency`
    #[arg(long)]
    concurrency: Option<usize>,

    /// Seconds between cycles, overrides `poll_interval_secs`
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down gracefully"),
                _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down gracefully"),
            }
            shutdown.cancel();
        });
    }

    #[cfg(not(unix))]
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, shutting down gracefully");
        }
        shutdown.cancel();
    });

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("feedpoll=info")),
        )
        .init();

    let args = Args::parse();
    let config_dir = get_config_dir()?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(interval) = args.interval {
        config.poll_interval_secs = interval;
    }
    if let Some(database) = args.database {
        config.database_path = Some(database);
    }
    config.validate().context("Invalid configuration")?;

    let db_path = match &config.database_path {
        Some(path) => path.clone(),
        None => {
            std::fs::create_dir_all(&config_dir).with_context(|| {
                format!("Failed to create config directory {}", config_dir.display())
            })?;
            config_dir.join("feeds.db")
        }
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: {}", DatabaseError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };
    tracing::info!(path = %db_path.display(), "Opened database");

    let fetcher = Fetcher::new(
        config.fetch_timeout(),
        config.max_feed_bytes,
        &config.user_agent,
    )
    .context("Failed to build HTTP client")?;

    let scheduler = Scheduler::new(
        Arc::new(db),
        fetcher,
        config.concurrency,
        config.poll_interval(),
    );

    if args.once {
        let report = scheduler
            .run_cycle()
            .await
            .context("Cycle failed")?;
        let totals = report.totals();
        println!(
            "Fetched {} sources ({} failed): {} new, {} duplicate, {} skipped",
            report.sources(),
            report.failed(),
            totals.inserted,
            totals.duplicates,
            totals.skipped + totals.failed
        );
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone())?;
    scheduler.run(shutdown).await;

    Ok(())
}
