use std::fmt;
use std::path::PathBuf;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

use crate::archive::{JsonArchiver, Snapshotter};
use crate::browser::Session;
use crate::config::{Config, ROW_SELECTOR};
use crate::db::MovieStore;
use crate::loader::PageLoader;
use crate::parser::{self, MovieRecord};
use crate::scheduler::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Archive,
    Snapshot,
    Store,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Load => "load",
            Stage::Archive => "archive",
            Stage::Snapshot => "snapshot",
            Stage::Store => "store",
        })
    }
}

#[derive(Debug)]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    PartialFailure,
    Failure,
}

/// Outcome of one end-to-end run. The start time is the run's identity.
#[derive(Debug)]
pub struct RunResult {
    pub started_at: DateTime<Local>,
    pub status: RunStatus,
    pub record_count: usize,
    pub skipped_rows: usize,
    pub stored_rows: Option<usize>,
    pub archive_path: Option<PathBuf>,
    pub snapshot_path: Option<PathBuf>,
    pub errors: Vec<StageError>,
}

impl RunResult {
    fn new(started_at: DateTime<Local>) -> Self {
        Self {
            started_at,
            status: RunStatus::Success,
            record_count: 0,
            skipped_rows: 0,
            stored_rows: None,
            archive_path: None,
            snapshot_path: None,
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, stage: Stage, err: impl fmt::Display) {
        error!("[{}] {:#}", stage, err);
        self.errors.push(StageError {
            stage,
            message: format!("{:#}", err),
        });
    }

    fn settle(&mut self) {
        self.status = if self.errors.iter().any(|e| e.stage == Stage::Load) {
            RunStatus::Failure
        } else if !self.errors.is_empty() || self.skipped_rows > 0 {
            RunStatus::PartialFailure
        } else {
            RunStatus::Success
        };
    }
}

/// Owns the browser session and the three sinks for the life of the process.
pub struct Crawler<S: Session> {
    session: S,
    url: String,
    loader: PageLoader,
    archiver: JsonArchiver,
    snapshotter: Snapshotter,
    store: MovieStore,
}

impl<S: Session> Crawler<S> {
    pub fn new(session: S, config: &Config) -> Self {
        Self {
            session,
            url: config.url.clone(),
            loader: PageLoader::new(ROW_SELECTOR),
            archiver: JsonArchiver::new(&config.archive_dir),
            snapshotter: Snapshotter::new(&config.snapshot_dir),
            store: MovieStore::new(&config.db_path),
        }
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// load -> parse -> archive, snapshot, store -> summary.
    ///
    /// Sinks run one after another and each failure is recorded without
    /// stopping the rest. Only a load failure ends the run early.
    pub async fn run_once(&mut self) -> RunResult {
        let mut result = RunResult::new(Local::now());
        info!("Crawler run started");

        let rows = match self.loader.load(&mut self.session, &self.url).await {
            Ok(rows) => rows,
            Err(e) => {
                result.fail(Stage::Load, e);
                result.settle();
                return result;
            }
        };

        let parsed = parser::parse_rows(&rows);
        for (index, e) in &parsed.rejected {
            warn!("Skipping row {}: {}", index, e);
        }
        result.skipped_rows = parsed.rejected.len();
        result.record_count = parsed.records.len();
        let batch = parsed.records;

        match self.archiver.archive(&batch, &result.started_at) {
            Ok(path) => result.archive_path = Some(path),
            Err(e) => result.fail(Stage::Archive, e),
        }

        match self
            .snapshotter
            .snapshot(&mut self.session, &result.started_at)
            .await
        {
            Ok(path) => result.snapshot_path = Some(path),
            Err(e) => result.fail(Stage::Snapshot, e),
        }

        match self.store.write(&batch) {
            Ok(n) => result.stored_rows = Some(n),
            Err(e) => result.fail(Stage::Store, e),
        }

        info!("Batch summary:\n{}", render_table(&batch));
        result.settle();
        result
    }
}

pub fn report(result: &RunResult) {
    let line = format!(
        "Run {} finished: {:?}, {} records, {} skipped, {} stored",
        result.started_at.format("%Y-%m-%d %H:%M:%S"),
        result.status,
        result.record_count,
        result.skipped_rows,
        result
            .stored_rows
            .map(|n| n.to_string())
            .unwrap_or_else(|| "none".into()),
    );
    for path in result.archive_path.iter().chain(&result.snapshot_path) {
        debug!("Artifact: {}", path.display());
    }
    match result.status {
        RunStatus::Success => info!("{}", line),
        RunStatus::PartialFailure => warn!("{}", line),
        RunStatus::Failure => error!("{}", line),
    }
}

#[async_trait]
impl<S: Session + 'static> Job for Crawler<S> {
    async fn run(&mut self) -> Result<()> {
        let result = self.run_once().await;
        report(&result);
        if !self.session.is_alive() {
            bail!("Browser session lost");
        }
        Ok(())
    }
}

/// Fixed-width table of a batch, one line per record.
pub fn render_table(batch: &[MovieRecord]) -> String {
    let mut out = format!(
        "{:>3} | {:<40} | {:<9} | {:<8} | {:<9} | {:>6}\n",
        "#", "Title", "Year", "Duration", "Placement", "Rating"
    );
    out.push_str(&"-".repeat(90));
    for (i, m) in batch.iter().enumerate() {
        out.push_str(&format!(
            "\n{:>3} | {:<40} | {:<9} | {:<8} | {:<9} | {:>6}",
            i + 1,
            truncate(&m.title, 40),
            m.year,
            m.duration,
            m.placement,
            m.rating
        ));
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max - 3).collect();
        format!("{}...", truncated)
    }
}
