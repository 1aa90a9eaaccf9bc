//! Worker loop that drains the job queue
//!
//! Runs one job at a time. Call [`Worker::run_until_idle`] to drain the queue
//! on the calling thread, or [`Worker::spawn`] to run it on a dedicated
//! background thread until shut down.

use anyhow::{Context, Result};
use log::{error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use super::JobQueue;
use super::job::{FailureDisposition, Job};
use crate::error::SyncError;
use crate::sync::{Clock, MailboxSyncJob, SyncOutcome};

/// Upper bound on a single idle wait, so shutdown and clock drift are noticed
const MAX_IDLE_WAIT: Duration = Duration::from_secs(5);

/// Executes a claimed job
pub trait JobHandler: Send + Sync {
    fn handle(&self, job: &Job) -> Result<SyncOutcome, SyncError>;
}

impl JobHandler for MailboxSyncJob {
    fn handle(&self, job: &Job) -> Result<SyncOutcome, SyncError> {
        self.run(&job.data.user_id)
    }
}

/// Counters from a worker run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub completed: usize,
    pub skipped: usize,
    /// Failed attempts that were scheduled for retry
    pub retried: usize,
    /// Jobs that used up all their attempts
    pub exhausted: usize,
}

impl WorkerReport {
    pub fn jobs_finished(&self) -> usize {
        self.completed + self.skipped + self.exhausted
    }
}

pub struct Worker {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    clock: Arc<dyn Clock>,
}

impl Worker {
    pub fn new(queue: Arc<dyn JobQueue>, handler: Arc<dyn JobHandler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue,
            handler,
            clock,
        }
    }

    /// Claim and run at most one ready job
    ///
    /// Returns false when no job was ready.
    pub fn tick(&self, report: &mut WorkerReport) -> Result<bool> {
        let Some(job) = self.queue.claim_next()? else {
            return Ok(false);
        };

        info!(
            "Running {} for user {} (attempt {}/{})",
            job.name, job.data.user_id, job.attempts_made, job.max_attempts
        );

        match self.handler.handle(&job) {
            Ok(outcome) => {
                self.queue.complete(&job.id, outcome.state())?;
                match outcome {
                    SyncOutcome::Completed(stats) => {
                        report.completed += 1;
                        info!(
                            "Job {} completed: {} pages, {} new messages in {}ms",
                            job.id, stats.pages_fetched, stats.messages_stored, stats.duration_ms
                        );
                    }
                    SyncOutcome::Skipped { reason, .. } => {
                        report.skipped += 1;
                        info!("Job {} skipped: {:?}", job.id, reason);
                    }
                }
            }
            Err(e) => match self.queue.fail(&job.id, &e.to_string())? {
                FailureDisposition::Retry { .. } => report.retried += 1,
                FailureDisposition::Exhausted { attempts } => {
                    report.exhausted += 1;
                    if e.is_likely_permanent() {
                        warn!(
                            "User {} needs to re-authorize; sync gave up after {} attempts",
                            job.data.user_id, attempts
                        );
                    }
                }
            },
        }

        Ok(true)
    }

    /// Run jobs until none are waiting or delayed
    ///
    /// Sleeps (through the clock) until a delayed retry becomes ready.
    pub fn run_until_idle(&self) -> Result<WorkerReport> {
        let mut report = WorkerReport::default();

        loop {
            self.queue.prune()?;
            if self.tick(&mut report)? {
                continue;
            }

            let Some(wake_at) = self.queue.next_wake()? else {
                break;
            };
            let wait = (wake_at - self.clock.now()).to_std().unwrap_or_default();
            self.clock.sleep(wait);
        }

        Ok(report)
    }

    /// Run the worker on a background thread
    pub fn spawn(self) -> Result<WorkerHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let queue = self.queue.clone();
        let thread_stop = stop.clone();

        let join = std::thread::Builder::new()
            .name("mailsync-worker".to_string())
            .spawn(move || self.run_until_stopped(&thread_stop))
            .context("Failed to spawn worker thread")?;

        Ok(WorkerHandle { stop, queue, join })
    }

    fn run_until_stopped(&self, stop: &AtomicBool) -> WorkerReport {
        let mut report = WorkerReport::default();
        info!("Sync worker started");

        while !stop.load(Ordering::SeqCst) {
            if let Err(e) = self.step(&mut report) {
                error!("Queue error: {:#}", e);
                self.clock.sleep(Duration::from_secs(1));
            }
        }

        info!(
            "Sync worker stopped after {} finished jobs",
            report.jobs_finished()
        );
        report
    }

    fn step(&self, report: &mut WorkerReport) -> Result<()> {
        self.queue.prune()?;
        if self.tick(report)? {
            return Ok(());
        }

        let wait = match self.queue.next_wake()? {
            Some(wake_at) => (wake_at - self.clock.now())
                .to_std()
                .unwrap_or_default()
                .min(MAX_IDLE_WAIT),
            None => MAX_IDLE_WAIT,
        };
        if !wait.is_zero() {
            self.queue.wait_for_work(wait)?;
        }
        Ok(())
    }
}

/// Handle to a worker running on its own thread
pub struct WorkerHandle {
    stop: Arc<AtomicBool>,
    queue: Arc<dyn JobQueue>,
    join: JoinHandle<WorkerReport>,
}

impl WorkerHandle {
    /// Stop after the current job finishes and wait for the thread
    pub fn shutdown(self) -> Result<WorkerReport> {
        self.stop.store(true, Ordering::SeqCst);
        self.queue.wake();
        self.join
            .join()
            .map_err(|_| anyhow::anyhow!("Worker thread panicked"))
    }
}
