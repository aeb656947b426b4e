use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[async_trait]
pub trait Job: Send + 'static {
    /// One execution. `Err` means the job cannot run again.
    async fn run(&mut self) -> Result<()>;
}

pub enum StopReason {
    Shutdown,
    Fatal(anyhow::Error),
}

pub struct Stopped<J> {
    pub job: J,
    pub reason: StopReason,
    /// Fires dropped because a run was still in progress.
    pub skipped: usize,
}

/// Fixed-interval trigger that never lets two runs of a job overlap.
///
/// The job lives behind an async mutex. A tick spawns a run only if it can
/// take the lock; a tick that finds a run in progress is skipped and logged.
/// Cancelling the shutdown token stops ticking at once, waits for the run in
/// flight, then hands the job back so the caller can release what it owns.
pub struct Scheduler {
    period: Duration,
}

impl Scheduler {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    /// Run `job` now and then every period until `shutdown` is cancelled or
    /// the job reports a fatal error.
    pub async fn run<J: Job>(&self, job: J, shutdown: CancellationToken) -> Result<Stopped<J>> {
        let job = Arc::new(Mutex::new(job));
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: Option<JoinHandle<Result<()>>> = None;
        let mut skipped = 0;
        info!("Scheduler started, every {:?}", self.period);

        let mut reason = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no further runs will start");
                    break StopReason::Shutdown;
                }
                outcome = join(&mut in_flight) => {
                    in_flight = None;
                    if let Err(e) = outcome {
                        break StopReason::Fatal(e);
                    }
                }
                _ = ticker.tick() => {
                    // A run counts as in progress until its result has been reaped.
                    let guard = match in_flight {
                        None => Arc::clone(&job).try_lock_owned().ok(),
                        Some(_) => None,
                    };
                    match guard {
                        Some(mut guard) => {
                            in_flight = Some(tokio::spawn(async move { guard.run().await }));
                        }
                        None => {
                            skipped += 1;
                            info!("Previous run still in progress, skipping this one");
                        }
                    }
                }
            }
        };

        if in_flight.is_some() {
            info!("Waiting for the current run to finish");
            if let Err(e) = join(&mut in_flight).await {
                error!("Final run failed: {:#}", e);
                if matches!(reason, StopReason::Shutdown) {
                    reason = StopReason::Fatal(e);
                }
            }
        }

        let job = Arc::try_unwrap(job)
            .map_err(|_| anyhow!("job still borrowed after drain"))?
            .into_inner();
        info!("Scheduler stopped ({} fires skipped)", skipped);
        Ok(Stopped {
            job,
            reason,
            skipped,
        })
    }
}

/// Resolve the run in flight, or never if there is none.
async fn join(handle: &mut Option<JoinHandle<Result<()>>>) -> Result<()> {
    match handle {
        Some(h) => h.await.map_err(|e| anyhow!("run panicked: {}", e))?,
        None => std::future::pending().await,
    }
}
