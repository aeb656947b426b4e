mod archive;
mod browser;
mod config;
mod db;
mod loader;
mod logging;
mod parser;
mod pipeline;
mod scheduler;

use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use browser::{ChromeSession, Session};
use config::Config;
use db::MovieStore;
use pipeline::{Crawler, RunStatus};
use scheduler::{Scheduler, StopReason};

#[derive(Parser)]
#[command(name = "imdb_crawler", about = "Scrape the IMDb Top 250 chart on a schedule")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Minutes between runs (overrides MINUTE_INTERVAL)
    #[arg(long, global = true)]
    interval: Option<u64>,

    /// Show the browser window instead of running headless
    #[arg(long, global = true)]
    headed: bool,

    #[arg(long, global = true, default_value = config::ARCHIVE_DIR)]
    archive_dir: PathBuf,

    #[arg(long, global = true, default_value = config::SNAPSHOT_DIR)]
    snapshot_dir: PathBuf,

    #[arg(long, global = true, default_value = config::DB_PATH)]
    db: PathBuf,

    #[arg(long, global = true, default_value = config::LOG_DIR)]
    log_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl now, then again every interval until interrupted (default)
    Run,
    /// Crawl once and exit
    Once,
    /// Show what the database holds
    Stats {
        /// Latest rows to display
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let dotenv_error = config::load_dotenv();
    let _log_guard = logging::init(&cli.log_dir)?;
    if let Some(e) = dotenv_error {
        warn!("Ignoring unreadable .env file: {}", e);
    }

    let config = Config {
        interval_minutes: config::resolve_interval(cli.interval),
        archive_dir: cli.archive_dir,
        snapshot_dir: cli.snapshot_dir,
        db_path: cli.db,
        headless: !cli.headed,
        ..Config::default()
    };

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_scheduled(&config).await,
        Commands::Once => run_once(&config).await,
        Commands::Stats { limit } => show_stats(&config, limit),
    };
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

async fn run_scheduled(config: &Config) -> anyhow::Result<()> {
    MovieStore::new(&config.db_path).ensure_schema()?;
    let session = ChromeSession::launch(config.headless).await?;
    let crawler = Crawler::new(session, config);

    let shutdown = CancellationToken::new();
    listen_for_shutdown(shutdown.clone());

    info!("Running every {} minutes", config.interval_minutes);
    let stopped = Scheduler::new(config.interval())
        .run(crawler, shutdown)
        .await?;

    let mut crawler = stopped.job;
    if let Err(e) = crawler.session_mut().close().await {
        error!("Failed to close browser cleanly: {:#}", e);
    }

    match stopped.reason {
        StopReason::Shutdown => {
            info!("Crawler stopped");
            Ok(())
        }
        StopReason::Fatal(e) => Err(e.context("Crawler stopped after a fatal error")),
    }
}

async fn run_once(config: &Config) -> anyhow::Result<()> {
    MovieStore::new(&config.db_path).ensure_schema()?;
    let session = ChromeSession::launch(config.headless).await?;
    let mut crawler = Crawler::new(session, config);

    let result = crawler.run_once().await;
    pipeline::report(&result);
    crawler.session_mut().close().await?;

    if result.status == RunStatus::Failure {
        let causes: Vec<String> = result
            .errors
            .iter()
            .map(|e| format!("[{}] {}", e.stage, e.message))
            .collect();
        bail!("Run failed: {}", causes.join("; "));
    }
    Ok(())
}

fn show_stats(config: &Config, limit: usize) -> anyhow::Result<()> {
    let store = MovieStore::new(&config.db_path);
    store.ensure_schema()?;

    println!("Database: {}", store.path().display());
    println!("Rows:     {}", store.count()?);

    let rows = store.recent(limit)?;
    if rows.is_empty() {
        println!("No movies stored yet. Run the crawler first.");
        return Ok(());
    }
    println!("\nLatest {}:", rows.len());
    let batch: Vec<_> = rows.into_iter().map(|(_, m)| m).collect();
    println!("{}", pipeline::render_table(&batch));
    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM.
fn listen_for_shutdown(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    error!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
            _ = terminate => info!("Received SIGTERM, shutting down"),
        }
        token.cancel();
    });
}
