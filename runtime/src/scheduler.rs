//! Release scheduler: moves matured hold credits into available balances.
//!
//! Each due entry is released in its own unit of work, so one broken entry
//! (a deleted wallet, corrupt balances) is logged and skipped without holding
//! back the rest of the batch.
//!
//! The scheduler never starts itself. The process lifecycle calls
//! [`ReleaseScheduler::start`] and keeps the returned [`SchedulerHandle`];
//! dropping the handle aborts the task, [`SchedulerHandle::shutdown`] stops
//! it after the sweep in flight.

use crate::metrics::SchedulerMetrics;
use crate::wallet::WalletLedger;
use servicehub_core::environment::Clock;
use servicehub_core::error::EngineResult;
use servicehub_core::store::{DueCursor, LedgerStore};
use servicehub_core::types::{Outcome, WalletEntryId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How long [`SchedulerHandle::shutdown`] waits for the sweep in flight.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Counts from one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries moved to available
    pub released: usize,
    /// Entries found already released (or not hold credits) under lock
    pub skipped: usize,
    /// Entries that failed and remain due
    pub failed: usize,
}

impl SweepReport {
    /// Entries the sweep looked at.
    #[must_use]
    pub const fn due(&self) -> usize {
        self.released + self.skipped + self.failed
    }
}

/// Periodic release of matured hold credits.
#[derive(Clone)]
pub struct ReleaseScheduler {
    store: Arc<dyn LedgerStore>,
    wallet: WalletLedger,
    clock: Arc<dyn Clock>,
    interval: Duration,
    batch_size: usize,
}

impl ReleaseScheduler {
    /// Creates a scheduler sweeping every `interval`, at most `batch_size`
    /// entries per sweep.
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            wallet: WalletLedger::new(Arc::clone(&clock)),
            clock,
            interval,
            batch_size: batch_size.max(1),
        }
    }

    /// Release due, unreleased hold credits, oldest first.
    ///
    /// At most `batch_size` entries are released or skipped per sweep.
    /// Failed entries do not count against that budget: the sweep pages past
    /// them, so broken rows at the head of the queue never starve the rest.
    ///
    /// # Errors
    ///
    /// Only if the due entries cannot be listed. Per-entry failures are
    /// counted in [`SweepReport::failed`].
    #[tracing::instrument(skip(self), fields(batch_size = self.batch_size))]
    pub async fn sweep(&self) -> EngineResult<SweepReport> {
        let started = Instant::now();
        let now = self.clock.now();

        let mut report = SweepReport::default();
        let mut cursor: Option<DueCursor> = None;
        loop {
            let budget = self.batch_size - (report.released + report.skipped);
            let page = self.store.due_hold_credits(now, cursor, budget).await?;
            let exhausted = page.len() < budget;

            for entry in page {
                cursor = DueCursor::after(&entry).or(cursor);
                match self.release_one(entry.id).await {
                    Ok(true) => report.released += 1,
                    Ok(false) => report.skipped += 1,
                    Err(error) => {
                        tracing::error!(
                            entry_id = %entry.id,
                            partner_id = %entry.partner_id,
                            %error,
                            "Failed to release hold credit"
                        );
                        report.failed += 1;
                    }
                }
            }

            if exhausted || report.released + report.skipped >= self.batch_size {
                break;
            }
        }

        SchedulerMetrics::record_sweep(&report, started.elapsed());
        if report.due() > 0 {
            tracing::info!(
                released = report.released,
                skipped = report.skipped,
                failed = report.failed,
                "Release sweep finished"
            );
        }
        Ok(report)
    }

    /// `Ok(true)` if released, `Ok(false)` if there was nothing to do.
    async fn release_one(&self, entry_id: WalletEntryId) -> EngineResult<bool> {
        let mut uow = self.store.begin().await?;
        match self.wallet.release(uow.as_mut(), entry_id).await {
            Ok(Outcome::Applied(_)) => {
                uow.commit().await?;
                Ok(true)
            }
            Ok(Outcome::AlreadyProcessed(_) | Outcome::Ignored(_)) => {
                uow.rollback().await?;
                Ok(false)
            }
            Err(error) => {
                if let Err(rollback_error) = uow.rollback().await {
                    tracing::warn!(%rollback_error, "Rollback failed");
                }
                Err(error)
            }
        }
    }

    /// Spawn the periodic sweep on the current tokio runtime.
    ///
    /// The first sweep runs immediately.
    #[must_use]
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let period = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval_secs = period.as_secs(), "Release scheduler started");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(error) = self.sweep().await {
                            tracing::error!(%error, "Release sweep could not list due entries");
                        }
                    }
                }
            }

            tracing::info!("Release scheduler stopped");
        });

        SchedulerHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Owner of a running scheduler task.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop the timer, letting a sweep in flight finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(())) => tracing::debug!("Release scheduler joined"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Release scheduler task failed"),
                Err(_) => tracing::warn!("Release scheduler shutdown timed out"),
            }
        }
    }

    /// Whether the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
