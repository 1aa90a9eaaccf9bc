//! Job queue trait definition

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;

use super::job::{EnqueueResult, FailureDisposition, Job, JobId, SyncJobData};
use crate::sync::JobState;

/// Durable-enough job queue for mailbox syncs
///
/// Delivery is at-least-once: a job may run again after a failure, so
/// handlers must be idempotent.
pub trait JobQueue: Send + Sync {
    /// Submit a job keyed by the data's user id
    ///
    /// Returns [`EnqueueResult::Duplicate`] without side effects when a job
    /// with the same id is waiting, delayed or active. A finished job with the
    /// same id is replaced.
    fn enqueue(&self, name: &str, data: SyncJobData) -> Result<EnqueueResult>;

    /// Claim the oldest ready job and mark it active
    fn claim_next(&self) -> Result<Option<Job>>;

    /// Record a successful attempt
    fn complete(&self, id: &JobId, outcome: JobState) -> Result<()>;

    /// Record a failed attempt and schedule a retry if attempts remain
    fn fail(&self, id: &JobId, error: &str) -> Result<FailureDisposition>;

    /// Drop finished jobs older than the retention window
    ///
    /// Returns the number of jobs removed.
    fn prune(&self) -> Result<usize>;

    /// Earliest time a delayed job becomes ready
    fn next_wake(&self) -> Result<Option<DateTime<Utc>>>;

    /// Look up a job by id
    fn get(&self, id: &JobId) -> Result<Option<Job>>;

    /// Block until new work may be available or `timeout` elapses
    fn wait_for_work(&self, timeout: Duration) -> Result<()>;

    /// Wake any thread blocked in [`wait_for_work`](Self::wait_for_work)
    fn wake(&self);
}
