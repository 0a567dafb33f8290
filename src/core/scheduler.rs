/// Recurring backup trigger
///
/// Owns the executor and calls it on a fixed interval. Runs never overlap:
/// ticks that come due while a backup is still running are skipped.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::core::backup::{BackupExecutor, RunOutcome};

pub struct Scheduler {
    executor: BackupExecutor,
    interval: Duration,
}

impl Scheduler {
    pub fn new(executor: BackupExecutor, interval: Duration) -> Self {
        Self { executor, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One cycle. Failures are logged here and never reach the loop.
    /// Returns whether a backup was written.
    pub async fn run_once(&self) -> bool {
        match self.executor.run().await {
            Ok(RunOutcome::Completed { .. }) => true,
            Ok(RunOutcome::Skipped(_)) => false,
            Err(e) => {
                tracing::error!(error = %e, "backup cycle failed");
                false
            }
        }
    }

    /// Run a cycle immediately and then every interval, until `shutdown`
    /// resolves or `max_runs` cycles have run. Returns the number of cycles.
    pub async fn run_until<F>(&self, shutdown: F, max_runs: Option<usize>) -> usize
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(
            interval = %humantime::format_duration(self.interval),
            dir = %self.executor.config().backup_dir.display(),
            "backup scheduler started"
        );

        let mut runs = 0;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!(runs, "backup scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_once().await;
                    runs += 1;
                    if max_runs.is_some_and(|max| runs >= max) {
                        break;
                    }
                }
            }
        }

        runs
    }
}
