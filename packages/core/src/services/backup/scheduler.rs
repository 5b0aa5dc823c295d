//! Fixed-interval backup scheduler
//!
//! Runs the job once immediately, then every period. A failed or panicking
//! job is logged and the next tick runs as usual; nothing is retried early.

use super::ExportJob;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Handle to the background backup task
pub struct BackupScheduler {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl BackupScheduler {
    /// Start the background task; the first run happens immediately
    pub fn spawn(job: Arc<dyn ExportJob>, period: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            info!("🗓️ Backup scheduler started (every {}s)", period.as_secs());
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased; // Check shutdown first

                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => run_once(job.as_ref()).await,
                }
            }
            info!("Backup scheduler stopped");
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stop scheduling; a job already running finishes first
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            error!("Backup scheduler task ended abnormally: {}", e);
        }
    }
}

async fn run_once(job: &dyn ExportJob) {
    match AssertUnwindSafe(job.run()).catch_unwind().await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => error!("❌ Backup failed: {:#}", e),
        Err(_) => error!("💥 Backup job panicked; retrying on the next tick"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::backup::ExportSummary;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// First run fails, second panics, then failures and successes alternate
    struct FlakyJob {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl ExportJob for FlakyJob {
        async fn run(&self) -> anyhow::Result<ExportSummary> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            match run {
                1 => panic!("simulated crash"),
                n if n % 2 == 0 => anyhow::bail!("simulated failure"),
                _ => Ok(ExportSummary {
                    path: "x.sql".into(),
                    tables: 0,
                    rows: 0,
                    unsnapshotted: Vec::new(),
                }),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_every_period_despite_failures() {
        let job = Arc::new(FlakyJob {
            runs: AtomicUsize::new(0),
        });
        let scheduler = BackupScheduler::spawn(job.clone(), Duration::from_secs(3600));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);

        // the panic on run 2 did not stop the schedule
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);

        scheduler.shutdown().await;
        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
    }
}
